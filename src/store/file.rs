// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! File-backed document store
//!
//! Layout under the root directory:
//!
//! ```text
//! units/<id>.json        current-state document per unit
//! history/<id>.jsonl     append-only samples, one JSON document per line
//! predictions.json       latest prediction set
//! alerts/<id>.json       current alerts per unit
//! ```
//!
//! Documents are rewritten via temp file + rename so a concurrent reader
//! sees either the old or the new version, never a torn one.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::TelemetryStore;
use crate::alerts::Alert;
use crate::error::{EngineError, Result};
use crate::fleet::{HistorySample, Unit, UnitUpdate};
use crate::prediction::Prediction;

/// Chunk size when scanning history files backwards
const TAIL_CHUNK: u64 = 8 * 1024;

/// Distinguishes temp files of concurrent writers to the same document
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn unavailable(what: &str, path: &Path, e: impl std::fmt::Display) -> EngineError {
    EngineError::StoreUnavailable(format!("{} {}: {}", what, path.display(), e))
}

/// Map a unit id onto a safe file stem
fn file_stem(unit_id: &str) -> String {
    unit_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Last `limit` non-empty lines of a file, newest (last) first
fn read_tail_lines(path: &Path, limit: usize) -> std::io::Result<Vec<String>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let len = file.metadata()?.len();
    let mut pos = len;
    let mut buf: Vec<u8> = Vec::new();

    // read backwards until we hold more than `limit` newlines or hit the start
    while pos > 0 && buf.iter().filter(|&&b| b == b'\n').count() <= limit {
        let step = TAIL_CHUNK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    // stopped mid-file: everything up to the first newline may be a partial line
    let start = if pos > 0 {
        buf.iter().position(|&b| b == b'\n').map_or(buf.len(), |i| i + 1)
    } else {
        0
    };
    let text = String::from_utf8_lossy(&buf[start..]);
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .rev()
        .take(limit)
        .map(str::to_string)
        .collect())
}

/// Store persisted as JSON documents in a directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating directories as needed)
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["units", "history", "alerts"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| unavailable("create", &dir, e))?;
        }
        log::debug!("Opened file store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unit_path(&self, unit_id: &str) -> PathBuf {
        self.root.join("units").join(format!("{}.json", file_stem(unit_id)))
    }

    fn history_path(&self, unit_id: &str) -> PathBuf {
        self.root.join("history").join(format!("{}.jsonl", file_stem(unit_id)))
    }

    fn alerts_path(&self, unit_id: &str) -> PathBuf {
        self.root.join("alerts").join(format!("{}.json", file_stem(unit_id)))
    }

    fn predictions_path(&self) -> PathBuf {
        self.root.join("predictions.json")
    }

    async fn write_doc<T: Serialize + ?Sized>(&self, path: &Path, doc: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.tmp", seq));
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| unavailable("write", &tmp, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| unavailable("rename", path, e))?;
        Ok(())
    }

    async fn read_doc<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable("read", path, e)),
        }
    }

    async fn list_docs<T: DeserializeOwned>(&self, sub: &str, ext: &str) -> Result<Vec<(PathBuf, T)>> {
        let dir = self.root.join(sub);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| unavailable("list", &dir, e))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable("list", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            match self.read_doc::<T>(&path).await {
                Ok(Some(doc)) => docs.push((path, doc)),
                Ok(None) => {}
                Err(EngineError::Json(e)) => {
                    log::warn!("Skipping unreadable document {}: {}", path.display(), e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl TelemetryStore for FileStore {
    async fn get_all_units(&self) -> Result<Vec<Unit>> {
        Ok(self
            .list_docs::<Unit>("units", "json")
            .await?
            .into_iter()
            .map(|(_, u)| u)
            .collect())
    }

    async fn get_unit(&self, unit_id: &str) -> Result<Option<Unit>> {
        self.read_doc(&self.unit_path(unit_id)).await
    }

    async fn insert_unit(&self, unit: Unit) -> Result<()> {
        self.write_doc(&self.unit_path(&unit.id), &unit).await
    }

    async fn update_unit(&self, unit_id: &str, update: &UnitUpdate) -> Result<()> {
        let path = self.unit_path(unit_id);
        let mut unit: Unit = self
            .read_doc(&path)
            .await?
            .ok_or_else(|| EngineError::DataValidation(format!("unknown unit '{}'", unit_id)))?;
        unit.apply(update);
        self.write_doc(&path, &unit).await
    }

    async fn append_history(&self, sample: &HistorySample) -> Result<()> {
        let path = self.history_path(&sample.unit_id);
        let mut line = serde_json::to_vec(sample)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| unavailable("open", &path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| unavailable("append", &path, e))?;
        file.flush().await.map_err(|e| unavailable("flush", &path, e))?;
        Ok(())
    }

    async fn get_recent_history(&self, unit_id: &str, limit: usize) -> Result<Vec<HistorySample>> {
        let path = self.history_path(unit_id);
        let read_path = path.clone();
        let lines = tokio::task::spawn_blocking(move || read_tail_lines(&read_path, limit))
            .await
            .map_err(|e| unavailable("read", &path, e))?
            .map_err(|e| unavailable("read", &path, e))?;

        let mut samples = Vec::with_capacity(lines.len());
        for line in lines {
            match serde_json::from_str::<HistorySample>(&line) {
                Ok(s) => samples.push(s),
                Err(e) => log::warn!("Skipping malformed history line in {}: {}", path.display(), e),
            }
        }
        Ok(samples)
    }

    async fn get_all_history(&self) -> Result<Vec<HistorySample>> {
        let dir = self.root.join("history");
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| unavailable("list", &dir, e))?;
        let mut all = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable("list", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let text = fs::read_to_string(&path)
                .await
                .map_err(|e| unavailable("read", &path, e))?;
            all.extend(
                text.lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| serde_json::from_str::<HistorySample>(l).ok()),
            );
        }
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.unit_id.cmp(&b.unit_id)));
        Ok(all)
    }

    async fn replace_predictions(&self, predictions: Vec<Prediction>) -> Result<()> {
        self.write_doc(&self.predictions_path(), &predictions).await
    }

    async fn upsert_latest_prediction(&self, prediction: &Prediction) -> Result<()> {
        let mut current: Vec<Prediction> = self
            .read_doc(&self.predictions_path())
            .await?
            .unwrap_or_default();
        current.retain(|p| p.unit_id != prediction.unit_id);
        current.push(prediction.clone());
        current.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        self.write_doc(&self.predictions_path(), &current).await
    }

    async fn get_latest_predictions(&self) -> Result<Vec<Prediction>> {
        Ok(self.read_doc(&self.predictions_path()).await?.unwrap_or_default())
    }

    async fn set_alerts(&self, unit_id: &str, alerts: Vec<Alert>) -> Result<()> {
        let path = self.alerts_path(unit_id);
        if alerts.is_empty() {
            return match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(unavailable("remove", &path, e)),
            };
        }
        self.write_doc(&path, &alerts).await
    }

    async fn get_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self
            .list_docs::<Vec<Alert>>("alerts", "json")
            .await?
            .into_iter()
            .flat_map(|(_, a)| a)
            .collect())
    }
}
