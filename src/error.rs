//! Error types for the UPS monitoring engine

use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the monitoring engine
///
/// Every variant is contained at the smallest unit of work that produced it
/// (one unit, one tick, one remote call). Nothing here is meant to take the
/// monitoring loops down.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Datastore unreachable or a document could not be read/written
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Classifier artefact missing, unreadable or corrupt
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Feature derivation or inference failed for a single unit
    #[error("Compute error for unit {unit_id}: {reason}")]
    UnitCompute {
        /// Unit the failure belongs to
        unit_id: String,
        /// What went wrong
        reason: String,
    },

    /// Remote explanation service timed out, errored or returned nothing
    #[error("Explanation service error: {0}")]
    ExplanationService(String),

    /// Out-of-range or missing metric
    #[error("Invalid data: {0}")]
    DataValidation(String),

    /// Training could not produce a model
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Convenience constructor for per-unit failures
    pub fn unit(unit_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnitCompute {
            unit_id: unit_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should skip the rest of the current tick
    ///
    /// Per-unit and explanation failures are contained locally; store and
    /// model failures abort the tick and wait for the next scheduled one.
    pub fn aborts_tick(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::ModelNotLoaded(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_store_unavailable() {
        let err = EngineError::StoreUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }

    #[test]
    fn test_display_model_not_loaded() {
        let err = EngineError::ModelNotLoaded("model.bin missing".to_string());
        assert_eq!(err.to_string(), "Model not loaded: model.bin missing");
    }

    #[test]
    fn test_display_unit_compute() {
        let err = EngineError::unit("UPS-03", "NaN in feature vector");
        assert_eq!(
            err.to_string(),
            "Compute error for unit UPS-03: NaN in feature vector"
        );
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: EngineError = io_err.into();
        assert!(err.to_string().contains("file missing"));
        assert!(err.aborts_tick());
    }

    #[test]
    fn test_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid }}}").unwrap_err();
        let err: EngineError = json_err.into();
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_contained_errors_do_not_abort_tick() {
        assert!(!EngineError::unit("UPS-01", "x").aborts_tick());
        assert!(!EngineError::ExplanationService("timeout".into()).aborts_tick());
        assert!(!EngineError::DataValidation("battery=NaN".into()).aborts_tick());
        assert!(EngineError::StoreUnavailable("down".into()).aborts_tick());
        assert!(EngineError::ModelNotLoaded("absent".into()).aborts_tick());
    }
}
