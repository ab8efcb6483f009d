//! In-memory store for tests and demos

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::TelemetryStore;
use crate::alerts::Alert;
use crate::error::{EngineError, Result};
use crate::fleet::{HistorySample, Unit, UnitUpdate};
use crate::prediction::Prediction;

#[derive(Default)]
struct Inner {
    units: BTreeMap<String, Unit>,
    history: HashMap<String, VecDeque<HistorySample>>,
    predictions: BTreeMap<String, Prediction>,
    alerts: BTreeMap<String, Vec<Alert>>,
}

/// Store held entirely in process memory
///
/// [`MemoryStore::set_unavailable`] makes every call fail with
/// `StoreUnavailable`, which is how outage handling is exercised in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with units
    pub fn with_units(units: impl IntoIterator<Item = Unit>) -> Self {
        let mut inner = Inner::default();
        for u in units {
            inner.units.insert(u.id.clone(), u);
        }
        Self {
            inner: RwLock::new(inner),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(EngineError::StoreUnavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn get_all_units(&self) -> Result<Vec<Unit>> {
        self.check()?;
        Ok(self.inner.read().await.units.values().cloned().collect())
    }

    async fn get_unit(&self, unit_id: &str) -> Result<Option<Unit>> {
        self.check()?;
        Ok(self.inner.read().await.units.get(unit_id).cloned())
    }

    async fn insert_unit(&self, unit: Unit) -> Result<()> {
        self.check()?;
        self.inner.write().await.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    async fn update_unit(&self, unit_id: &str, update: &UnitUpdate) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner.units.get_mut(unit_id) {
            Some(unit) => {
                unit.apply(update);
                Ok(())
            }
            None => Err(EngineError::DataValidation(format!("unknown unit '{}'", unit_id))),
        }
    }

    async fn append_history(&self, sample: &HistorySample) -> Result<()> {
        self.check()?;
        self.inner
            .write()
            .await
            .history
            .entry(sample.unit_id.clone())
            .or_default()
            .push_back(sample.clone());
        Ok(())
    }

    async fn get_recent_history(&self, unit_id: &str, limit: usize) -> Result<Vec<HistorySample>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .get(unit_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_all_history(&self) -> Result<Vec<HistorySample>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut all: Vec<HistorySample> = inner.history.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.unit_id.cmp(&b.unit_id)));
        Ok(all)
    }

    async fn replace_predictions(&self, predictions: Vec<Prediction>) -> Result<()> {
        self.check()?;
        let next: BTreeMap<String, Prediction> =
            predictions.into_iter().map(|p| (p.unit_id.clone(), p)).collect();
        self.inner.write().await.predictions = next;
        Ok(())
    }

    async fn upsert_latest_prediction(&self, prediction: &Prediction) -> Result<()> {
        self.check()?;
        self.inner
            .write()
            .await
            .predictions
            .insert(prediction.unit_id.clone(), prediction.clone());
        Ok(())
    }

    async fn get_latest_predictions(&self) -> Result<Vec<Prediction>> {
        self.check()?;
        Ok(self.inner.read().await.predictions.values().cloned().collect())
    }

    async fn set_alerts(&self, unit_id: &str, alerts: Vec<Alert>) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if alerts.is_empty() {
            inner.alerts.remove(unit_id);
        } else {
            inner.alerts.insert(unit_id.to_string(), alerts);
        }
        Ok(())
    }

    async fn get_alerts(&self) -> Result<Vec<Alert>> {
        self.check()?;
        Ok(self.inner.read().await.alerts.values().flatten().cloned().collect())
    }
}
