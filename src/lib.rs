// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! # UPS Monitor
//!
//! Predictive health and alerting engine for a fleet of backup-power units.
//!
//! The engine keeps a telemetry history per unit, derives a status from
//! fixed threshold bands, scores every unit with a locally trained ensemble
//! classifier and turns statuses and forecasts into deduplicated alerts.
//! All state lives in a [`store::TelemetryStore`]; the refresh and
//! prediction loops in [`predictive`] coordinate only through it.
//!
//! ## Modules
//!
//! - [`fleet`]: units, metrics, history samples, fleet health report
//! - [`status`]: threshold-band status state machine
//! - [`features`]: feature vector and history risk score
//! - [`classifier`]: scaler, median-split trees, ensemble, persistence
//! - [`training`]: training sets from history or synthetic scenarios
//! - [`prediction`]: prediction records and risk bucketing
//! - [`explain`]: remote explanations with retry and local fallback
//! - [`alerts`]: alert synthesis
//! - [`store`]: store trait with in-memory and file-backed implementations
//! - [`predictive`]: refresh and prediction loops
//! - [`daemon`]: TOML configuration and process wiring

pub mod alerts;
pub mod classifier;
pub mod daemon;
pub mod error;
pub mod explain;
pub mod features;
pub mod fleet;
pub mod prediction;
pub mod predictive;
pub mod simulator;
pub mod stats;
pub mod status;
pub mod store;
pub mod training;

pub use error::{EngineError, Result};
pub use fleet::{Unit, UnitMetrics, UnitStatus};
pub use predictive::{CycleReport, MonitorConfig, PredictiveMonitor};
