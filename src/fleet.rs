// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Fleet data model: units, their metrics, history samples and fleet reports
//!
//! Field names on the serialized documents follow the datastore schema
//! (`batteryLevel`, `powerInput`, `unitId`, ...) so documents written here
//! stay readable by the API layer that sits on top of the same store.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::prediction::Prediction;
use crate::status::determine_status;

/// Unit status, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// All metrics inside their healthy bands
    Healthy,
    /// At least one metric drifting out of its healthy band
    Risky,
    /// At least one metric in its warning band
    Warning,
    /// At least one metric in its failure band
    Failed,
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Healthy
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Risky => write!(f, "risky"),
            Self::Warning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for UnitStatus {
    type Err = crate::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(Self::Healthy),
            "risky" => Ok(Self::Risky),
            "warning" => Ok(Self::Warning),
            "failed" => Ok(Self::Failed),
            other => Err(crate::EngineError::DataValidation(format!(
                "unknown status '{}'",
                other
            ))),
        }
    }
}

/// Instantaneous metrics of a unit
///
/// Missing or `null` fields deserialize to the same safe defaults the status
/// machine falls back to, so a partially written document never fails to
/// load. `serde_json` writes a NaN reading as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredMetrics")]
pub struct UnitMetrics {
    /// Battery charge (%)
    pub battery_level: f64,
    /// Internal temperature (°C)
    pub temperature: f64,
    /// Output load (% of rated capacity)
    pub load: f64,
    /// Conversion efficiency (%)
    pub efficiency: f64,
    /// Input power (W)
    pub power_input: f64,
    /// Output power (W)
    pub power_output: f64,
    /// Input voltage (V)
    pub voltage_input: f64,
    /// Output voltage (V)
    pub voltage_output: f64,
    /// Output frequency (Hz)
    pub frequency: f64,
    /// Cumulative uptime (hours)
    pub uptime: f64,
}

impl Default for UnitMetrics {
    fn default() -> Self {
        Self {
            battery_level: 100.0,
            temperature: 25.0,
            load: 50.0,
            efficiency: 95.0,
            power_input: 1000.0,
            power_output: 950.0,
            voltage_input: 230.0,
            voltage_output: 230.0,
            frequency: 50.0,
            uptime: 100.0,
        }
    }
}

/// Metrics as read from a document, before defaults are filled in
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredMetrics {
    battery_level: Option<f64>,
    temperature: Option<f64>,
    load: Option<f64>,
    efficiency: Option<f64>,
    power_input: Option<f64>,
    power_output: Option<f64>,
    voltage_input: Option<f64>,
    voltage_output: Option<f64>,
    frequency: Option<f64>,
    uptime: Option<f64>,
}

impl From<StoredMetrics> for UnitMetrics {
    fn from(raw: StoredMetrics) -> Self {
        let d = UnitMetrics::default();
        Self {
            battery_level: raw.battery_level.unwrap_or(d.battery_level),
            temperature: raw.temperature.unwrap_or(d.temperature),
            load: raw.load.unwrap_or(d.load),
            efficiency: raw.efficiency.unwrap_or(d.efficiency),
            power_input: raw.power_input.unwrap_or(d.power_input),
            power_output: raw.power_output.unwrap_or(d.power_output),
            voltage_input: raw.voltage_input.unwrap_or(d.voltage_input),
            voltage_output: raw.voltage_output.unwrap_or(d.voltage_output),
            frequency: raw.frequency.unwrap_or(d.frequency),
            uptime: raw.uptime.unwrap_or(d.uptime),
        }
    }
}

impl UnitMetrics {
    /// Input minus output power (W)
    pub fn power_balance(&self) -> f64 {
        self.power_input - self.power_output
    }

    /// Absolute input/output voltage difference (V)
    pub fn voltage_delta(&self) -> f64 {
        (self.voltage_input - self.voltage_output).abs()
    }
}

/// A monitored backup-power unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    /// Stable identifier (document key)
    #[serde(rename = "unitId")]
    pub id: String,
    /// Display name
    pub name: String,
    /// Physical location
    #[serde(default)]
    pub location: String,
    /// Rated capacity (VA)
    #[serde(default = "default_capacity", deserialize_with = "capacity_or_default")]
    pub capacity: f64,
    /// Critical-load threshold (W)
    #[serde(default = "default_critical_load", deserialize_with = "critical_load_or_default")]
    pub critical_load: f64,
    /// Current status, always the output of [`determine_status`]
    #[serde(default)]
    pub status: UnitStatus,
    /// Derived short-term failure risk from the recent history window
    #[serde(default, deserialize_with = "risk_or_zero")]
    pub failure_risk: f64,
    /// Current metrics
    #[serde(flatten)]
    pub metrics: UnitMetrics,
    /// Time of the last refresh
    pub last_update: DateTime<Utc>,
}

fn default_capacity() -> f64 {
    2000.0
}

fn default_critical_load() -> f64 {
    500.0
}

fn capacity_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or_else(default_capacity))
}

fn critical_load_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or_else(default_critical_load))
}

fn risk_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(0.0))
}

impl Unit {
    /// Create a unit whose status is derived from the given metrics
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<String>,
        capacity: f64,
        critical_load: f64,
        metrics: UnitMetrics,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
            capacity,
            critical_load,
            status: determine_status(&metrics, 0.0),
            failure_risk: 0.0,
            metrics,
            last_update: Utc::now(),
        }
    }

    /// Apply a refresh update in place
    pub fn apply(&mut self, update: &UnitUpdate) {
        self.metrics = update.metrics;
        self.status = update.status;
        self.failure_risk = update.failure_risk;
        self.last_update = update.last_update;
    }
}

/// Fields rewritten on every refresh tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitUpdate {
    /// New metrics
    #[serde(flatten)]
    pub metrics: UnitMetrics,
    /// Status derived from `metrics` and `failure_risk`
    pub status: UnitStatus,
    /// Derived failure risk used for the status
    pub failure_risk: f64,
    /// Tick time
    pub last_update: DateTime<Utc>,
}

impl UnitUpdate {
    /// Build an update, deriving the status from the metrics
    pub fn derive(metrics: UnitMetrics, failure_risk: f64, at: DateTime<Utc>) -> Self {
        Self {
            metrics,
            status: determine_status(&metrics, failure_risk),
            failure_risk,
            last_update: at,
        }
    }
}

/// Immutable snapshot of one unit at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySample {
    /// Unit the sample belongs to
    pub unit_id: String,
    /// Tick time
    pub timestamp: DateTime<Utc>,
    /// Status at that tick
    #[serde(default)]
    pub status: UnitStatus,
    /// Rated capacity at that tick
    #[serde(default = "default_capacity", deserialize_with = "capacity_or_default")]
    pub capacity: f64,
    /// Critical-load threshold at that tick
    #[serde(default = "default_critical_load", deserialize_with = "critical_load_or_default")]
    pub critical_load: f64,
    /// Derived failure risk at that tick
    #[serde(default, deserialize_with = "risk_or_zero")]
    pub failure_risk: f64,
    /// Metrics at that tick
    #[serde(flatten)]
    pub metrics: UnitMetrics,
}

impl HistorySample {
    /// Snapshot a unit's current state
    pub fn of(unit: &Unit) -> Self {
        Self {
            unit_id: unit.id.clone(),
            timestamp: unit.last_update,
            status: unit.status,
            capacity: unit.capacity,
            critical_load: unit.critical_load,
            failure_risk: unit.failure_risk,
            metrics: unit.metrics,
        }
    }
}

const LOCATIONS: usize = 3;

/// Provision a demo fleet of `count` units named `UPS-01`, `UPS-02`, ...
///
/// Metrics are drawn from healthy operating ranges; statuses are derived.
pub fn provision_fleet<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Unit> {
    (0..count)
        .map(|i| {
            let capacity = rng.random_range(1000..=5000) as f64;
            let critical_load = rng.random_range(500..=2500) as f64;
            let power_input = rng.random_range(800..=4500) as f64;
            let power_output = (power_input - rng.random_range(20.0..80.0)).max(50.0);
            let metrics = UnitMetrics {
                battery_level: rng.random_range(80..=100) as f64,
                temperature: rng.random_range(20..=27) as f64,
                load: rng.random_range(30..=65) as f64,
                efficiency: rng.random_range(92..=98) as f64,
                power_input,
                power_output,
                voltage_input: rng.random_range(225.0..235.0),
                voltage_output: 230.0,
                frequency: 50.0,
                uptime: rng.random_range(95..=100) as f64,
            };
            let name = format!("UPS-{:02}", i + 1);
            Unit::new(
                name.clone(),
                name,
                format!("Datacenter-{}", (i % LOCATIONS) + 1),
                capacity,
                critical_load,
                metrics,
            )
        })
        .collect()
}

/// Per-unit line of a fleet health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    pub id: String,
    pub name: String,
    pub status: UnitStatus,
    pub battery_level: f64,
    pub temperature: f64,
    pub efficiency: f64,
    /// Latest failure probability, if the unit has an active prediction
    pub probability_failure: Option<f64>,
    pub confidence: Option<f64>,
}

/// Fleet health summary produced after each prediction cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetHealthReport {
    pub timestamp: DateTime<Utc>,
    pub total_units: usize,
    pub healthy_count: usize,
    pub risky_count: usize,
    pub warning_count: usize,
    pub failed_count: usize,
    /// Units with an active prediction above the high-risk boundary
    pub high_risk_count: usize,
    pub total_predictions: usize,
    pub average_confidence: f64,
    pub units: Vec<UnitSummary>,
}

impl FleetHealthReport {
    /// Build a report from current units and the latest predictions
    pub fn build(units: &[Unit], predictions: &[Prediction]) -> Self {
        let count = |s: UnitStatus| units.iter().filter(|u| u.status == s).count();
        let average_confidence = if predictions.is_empty() {
            0.0
        } else {
            predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64
        };

        let summaries = units
            .iter()
            .map(|u| {
                let prediction = predictions.iter().find(|p| p.unit_id == u.id);
                UnitSummary {
                    id: u.id.clone(),
                    name: u.name.clone(),
                    status: u.status,
                    battery_level: u.metrics.battery_level,
                    temperature: u.metrics.temperature,
                    efficiency: u.metrics.efficiency,
                    probability_failure: prediction.map(|p| p.probability_failure),
                    confidence: prediction.map(|p| p.confidence),
                }
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            total_units: units.len(),
            healthy_count: count(UnitStatus::Healthy),
            risky_count: count(UnitStatus::Risky),
            warning_count: count(UnitStatus::Warning),
            failed_count: count(UnitStatus::Failed),
            high_risk_count: predictions
                .iter()
                .filter(|p| p.risk_level == crate::prediction::RiskLevel::High)
                .count(),
            total_predictions: predictions.len(),
            average_confidence,
            units: summaries,
        }
    }
}
