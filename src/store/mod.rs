//! Telemetry store
//!
//! The store is the single source of truth and the only synchronisation
//! point between the refresh and prediction loops. Every call is
//! independently consistent at the single-document level; nothing spans
//! documents atomically.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::alerts::Alert;
use crate::error::Result;
use crate::fleet::{HistorySample, Unit, UnitUpdate};
use crate::prediction::Prediction;

/// Document store consumed by the engine
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// All current unit records
    async fn get_all_units(&self) -> Result<Vec<Unit>>;

    async fn get_unit(&self, unit_id: &str) -> Result<Option<Unit>>;

    /// Create or overwrite a unit record
    async fn insert_unit(&self, unit: Unit) -> Result<()>;

    /// Apply a refresh update; unknown ids are an error
    async fn update_unit(&self, unit_id: &str, update: &UnitUpdate) -> Result<()>;

    /// Append an immutable history sample
    async fn append_history(&self, sample: &HistorySample) -> Result<()>;

    /// Up to `limit` most recent samples for a unit, newest first
    async fn get_recent_history(&self, unit_id: &str, limit: usize) -> Result<Vec<HistorySample>>;

    /// Every stored sample (training)
    async fn get_all_history(&self) -> Result<Vec<HistorySample>>;

    /// Swap the whole prediction set in one write
    async fn replace_predictions(&self, predictions: Vec<Prediction>) -> Result<()>;

    /// Replace a single unit's latest prediction
    async fn upsert_latest_prediction(&self, prediction: &Prediction) -> Result<()>;

    /// Latest prediction per unit (only units with an active prediction)
    async fn get_latest_predictions(&self) -> Result<Vec<Prediction>>;

    /// Replace a unit's alert set
    async fn set_alerts(&self, unit_id: &str, alerts: Vec<Alert>) -> Result<()>;

    /// Current alerts across all units
    async fn get_alerts(&self) -> Result<Vec<Alert>>;
}
