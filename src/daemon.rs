// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Monitoring daemon for headless operation
//!
//! Loads a TOML configuration, opens the file-backed store, wires the
//! explainer and alert synthesizer into a [`PredictiveMonitor`] and runs
//! both loops until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertSynthesizer;
use crate::classifier::{EnsembleConfig, TreeParams};
use crate::error::EngineError;
use crate::explain::{ExplanationSettings, Explainer, RetryPolicy};
use crate::predictive::{MonitorConfig, PredictiveMonitor};
use crate::prediction::DEFAULT_ALERT_THRESHOLD;
use crate::store::FileStore;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Already running (PID file exists): {0}")]
    AlreadyRunning(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Classifier training settings (`[training]` table)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Bagging plus per-node feature subsampling
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let ensemble = EnsembleConfig::default();
        Self {
            n_estimators: ensemble.n_estimators,
            max_depth: ensemble.tree.max_depth,
            min_samples_split: ensemble.tree.min_samples_split,
            bootstrap: ensemble.bootstrap,
            seed: ensemble.seed,
        }
    }
}

impl TrainingSettings {
    pub fn ensemble_config(&self) -> EnsembleConfig {
        EnsembleConfig {
            n_estimators: self.n_estimators,
            tree: TreeParams {
                max_depth: self.max_depth,
                min_samples_split: self.min_samples_split,
                max_features: None,
            },
            bootstrap: self.bootstrap,
            seed: self.seed,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub refresh_interval_secs: u64,
    pub prediction_interval_secs: u64,
    pub tick_timeout_secs: u64,
    pub store_dir: PathBuf,
    pub model_path: PathBuf,
    pub history_window: usize,
    pub alert_threshold: f64,
    pub pid_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub health_report_path: Option<PathBuf>,
    pub explanation: ExplanationSettings,
    pub training: TrainingSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let monitor = MonitorConfig::default();
        Self {
            refresh_interval_secs: monitor.refresh_interval.as_secs(),
            prediction_interval_secs: monitor.prediction_interval.as_secs(),
            tick_timeout_secs: monitor.tick_timeout.as_secs(),
            store_dir: PathBuf::from("data"),
            model_path: monitor.model_path,
            history_window: monitor.history_window,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            pid_file: None,
            log_level: LogLevel::Info,
            health_report_path: None,
            explanation: ExplanationSettings::default(),
            training: TrainingSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, DaemonError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, DaemonError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DaemonError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DaemonError> {
        if self.refresh_interval_secs == 0 || self.prediction_interval_secs == 0 {
            return Err(DaemonError::Config("intervals must be at least 1 second".into()));
        }
        if self.tick_timeout_secs == 0 {
            return Err(DaemonError::Config("tick_timeout_secs must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.alert_threshold) {
            return Err(DaemonError::Config(format!(
                "alert_threshold {} outside [0, 1]",
                self.alert_threshold
            )));
        }
        if self.history_window == 0 {
            return Err(DaemonError::Config("history_window must be at least 1".into()));
        }
        if self.explanation.enabled {
            let worst = RetryPolicy::from(&self.explanation).worst_case();
            if worst >= Duration::from_secs(self.tick_timeout_secs) {
                return Err(DaemonError::Config(format!(
                    "tick_timeout_secs ({}) must exceed the worst-case explanation time ({:?})",
                    self.tick_timeout_secs, worst
                )));
            }
        }
        Ok(())
    }

    /// Orchestrator settings derived from this configuration
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            prediction_interval: Duration::from_secs(self.prediction_interval_secs),
            tick_timeout: Duration::from_secs(self.tick_timeout_secs),
            history_window: self.history_window,
            alert_threshold: self.alert_threshold,
            model_path: self.model_path.clone(),
            health_report_path: self.health_report_path.clone(),
        }
    }

    /// Generate sample config
    pub fn sample_toml() -> String {
        r#"# UPS Monitoring Daemon Configuration
refresh_interval_secs = 60
prediction_interval_secs = 900
tick_timeout_secs = 300
store_dir = "data"
model_path = "models/ups_failure_model.bin"
# Recent samples fed to the feature deriver
history_window = 20
# Minimum failure probability for a prediction to be stored
alert_threshold = 0.4
# pid_file = "/var/run/upsmon.pid"
log_level = "Info"
# health_report_path = "data/fleet_health.json"

[explanation]
enabled = true
endpoint = "https://generativelanguage.googleapis.com"
model = "gemini-1.5-flash"
# The key itself is read from this environment variable
api_key_env = "GEMINI_API_KEY"
request_timeout_secs = 20
attempts = 3
initial_backoff_ms = 1000

[training]
n_estimators = 100
max_depth = 10
min_samples_split = 2
bootstrap = false
seed = 42
"#
        .into()
    }
}

/// Build the explainer described by the settings
///
/// Without the remote feature, a disabled service or a missing key, the
/// explainer only uses the local template.
pub fn build_explainer(settings: &ExplanationSettings) -> Result<Explainer, DaemonError> {
    #[cfg(feature = "remote-explainer")]
    {
        if let Some(adapter) = crate::explain::http::GeminiAdapter::from_env(settings)? {
            log::info!("Remote explanations enabled via {}", adapter.url());
            return Ok(Explainer::new(Arc::new(adapter), settings.into()));
        }
    }
    #[cfg(not(feature = "remote-explainer"))]
    {
        if settings.enabled {
            log::info!("Built without remote explanations; using the local template");
        }
    }
    Ok(Explainer::local_only())
}

/// Monitoring daemon
pub struct MonitoringDaemon {
    config: DaemonConfig,
    /// Set once this daemon has written the PID file
    owns_pid_file: AtomicBool,
}

impl MonitoringDaemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            owns_pid_file: AtomicBool::new(false),
        }
    }

    /// Load from config file
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self, DaemonError> {
        let config = DaemonConfig::from_toml_file(path)?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Write PID file
    pub fn write_pid_file(&self) -> Result<(), DaemonError> {
        if let Some(ref pid_path) = self.config.pid_file {
            if pid_path.exists() {
                let existing = std::fs::read_to_string(pid_path).unwrap_or_default();
                if !existing.trim().is_empty() {
                    return Err(DaemonError::AlreadyRunning(pid_path.display().to_string()));
                }
            }
            if let Some(parent) = pid_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(pid_path, std::process::id().to_string())?;
            self.owns_pid_file.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Remove the PID file if this daemon wrote it
    pub fn remove_pid_file(&self) {
        if !self.owns_pid_file.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(ref pid_path) = self.config.pid_file {
            let _ = std::fs::remove_file(pid_path);
        }
    }

    /// Open the store and wire up the monitor
    pub async fn build_monitor(&self) -> Result<PredictiveMonitor, DaemonError> {
        let store = FileStore::open(&self.config.store_dir).await?;
        let explainer = build_explainer(&self.config.explanation)?;
        Ok(PredictiveMonitor::new(
            Arc::new(store),
            AlertSynthesizer::new(explainer),
            self.config.monitor_config(),
        ))
    }

    /// Run both loops until Ctrl-C or `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DaemonError> {
        self.write_pid_file()?;
        let monitor = self.build_monitor().await?;
        log::info!(
            "Daemon started (pid {}, store {})",
            std::process::id(),
            self.config.store_dir.display()
        );

        let shutdown = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => log::info!("Shutdown signal received"),
                        Err(e) => log::error!("Cannot listen for shutdown signal: {}", e),
                    }
                    shutdown.cancel();
                }
            }
        });

        monitor.run(cancel).await;
        self.remove_pid_file();
        Ok(())
    }
}

impl Drop for MonitoringDaemon {
    fn drop(&mut self) {
        self.remove_pid_file();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sample_toml_parses_to_defaults() {
        let parsed = DaemonConfig::from_toml(&DaemonConfig::sample_toml()).unwrap();
        assert_eq!(parsed, DaemonConfig::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DaemonConfig::from_toml(
            r#"
refresh_interval_secs = 5
[explanation]
enabled = false
"#,
        )
        .unwrap();
        assert_eq!(config.refresh_interval_secs, 5);
        assert_eq!(config.prediction_interval_secs, 900);
        assert_eq!(config.history_window, 20);
        assert!(!config.explanation.enabled);
        assert_eq!(config.explanation.attempts, 3);

        let monitor = config.monitor_config();
        assert_eq!(monitor.refresh_interval, Duration::from_secs(5));
        assert_eq!(monitor.alert_threshold, 0.4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(DaemonConfig::from_toml("alert_threshold = 1.5").is_err());
        assert!(DaemonConfig::from_toml("refresh_interval_secs = 0").is_err());
        assert!(DaemonConfig::from_toml("history_window = \"many\"").is_err());
        // 3 attempts x 20 s plus backoff cannot fit in 30 s
        assert!(DaemonConfig::from_toml("tick_timeout_secs = 30").is_err());
        assert!(DaemonConfig::from_toml(
            "tick_timeout_secs = 30\n[explanation]\nenabled = false"
        )
        .is_ok());
    }

    #[test]
    fn test_pid_file_lifecycle() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("run/upsmon.pid");
        let daemon = MonitoringDaemon::new(DaemonConfig {
            pid_file: Some(pid_path.clone()),
            ..Default::default()
        });

        daemon.write_pid_file().unwrap();
        assert!(pid_path.exists());
        assert!(matches!(
            daemon.write_pid_file(),
            Err(DaemonError::AlreadyRunning(_))
        ));

        // a second instance must not delete the running instance's file
        let second = MonitoringDaemon::new(DaemonConfig {
            pid_file: Some(pid_path.clone()),
            ..Default::default()
        });
        assert!(matches!(
            second.write_pid_file(),
            Err(DaemonError::AlreadyRunning(_))
        ));
        second.remove_pid_file();
        drop(second);
        assert!(pid_path.exists());

        drop(daemon);
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let dir = tempdir().unwrap();
        let daemon = MonitoringDaemon::new(DaemonConfig {
            store_dir: dir.path().join("store"),
            model_path: dir.path().join("model.bin"),
            explanation: ExplanationSettings {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        daemon.run(cancel).await.unwrap();
        assert!(dir.path().join("store/units").is_dir());
    }
}
