//! Feature deriver
//!
//! Turns a unit's current snapshot plus its recent history window into the
//! fixed-order vector the classifier is trained on. The last element is a
//! history risk score built from short-term trends the point-snapshot
//! classifier cannot see on its own.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::fleet::{HistorySample, Unit, UnitMetrics};
use crate::stats;
use crate::status::sanitize_metrics;

/// Number of features in a [`FeatureVector`]
pub const FEATURE_COUNT: usize = 13;

/// Feature names in vector order (datastore field names)
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "powerInput",
    "powerOutput",
    "batteryLevel",
    "temperature",
    "efficiency",
    "load",
    "voltageInput",
    "voltageOutput",
    "frequency",
    "capacity",
    "criticalLoad",
    "uptime",
    "failureRisk",
];

/// Index of the history risk score in the vector
pub const RISK_INDEX: usize = FEATURE_COUNT - 1;

/// Number of newest samples averaged when smoothing current readings
pub const SMOOTHING_SAMPLES: usize = 5;

const RISK_WEIGHT_TEMPERATURE: f64 = 0.3;
const RISK_WEIGHT_BATTERY: f64 = 0.3;
const RISK_WEIGHT_EFFICIENCY: f64 = 0.2;
const RISK_WEIGHT_LOAD: f64 = 0.2;

/// Fixed-length feature vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Build a vector from metrics, rated attributes and a risk score
    pub fn from_parts(m: &UnitMetrics, capacity: f64, critical_load: f64, risk: f64) -> Self {
        Self([
            m.power_input,
            m.power_output,
            m.battery_level,
            m.temperature,
            m.efficiency,
            m.load,
            m.voltage_input,
            m.voltage_output,
            m.frequency,
            capacity,
            critical_load,
            m.uptime,
            risk,
        ])
    }

    /// Vector for a stored history sample (training rows)
    pub fn from_sample(sample: &HistorySample) -> Self {
        Self::from_parts(
            &sample.metrics,
            sample.capacity,
            sample.critical_load,
            sample.failure_risk,
        )
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// History risk score component
    pub fn risk(&self) -> f64 {
        self.0[RISK_INDEX]
    }

    /// Reject vectors with NaN or infinite values
    pub fn ensure_finite(&self, unit_id: &str) -> Result<()> {
        match self.0.iter().position(|v| !v.is_finite()) {
            Some(i) => Err(EngineError::unit(
                unit_id,
                format!("non-finite {} in feature vector", FEATURE_NAMES[i]),
            )),
            None => Ok(()),
        }
    }
}

fn unit_clamp(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Composite short-term risk score in `[0, 1]` from a history window
///
/// `history` is newest-first. Components, each clamped to `[0, 1]`:
/// - temperature: window peak, 28 °C → 0, 45 °C → 1
/// - battery: 0.6 × depletion of the newest level + 0.4 × |newest − oldest| / 20
/// - efficiency: newest value, 95 % → 0, 80 % → 1
/// - load: window peak, 70 % → 0, 95 % → 1
///
/// Weighted 0.3 / 0.3 / 0.2 / 0.2. An empty window scores 0.
pub fn history_risk_score(history: &[HistorySample]) -> f64 {
    let (newest, oldest) = match (history.first(), history.last()) {
        (Some(n), Some(o)) => (&n.metrics, &o.metrics),
        _ => return 0.0,
    };

    let temps: Vec<f64> = history.iter().map(|h| h.metrics.temperature).collect();
    let loads: Vec<f64> = history.iter().map(|h| h.metrics.load).collect();

    let temperature = stats::max(&temps)
        .map(|t| unit_clamp((t - 28.0) / (45.0 - 28.0)))
        .unwrap_or(0.0);

    let level = 1.0 - unit_clamp(newest.battery_level / 100.0);
    let drop = unit_clamp((newest.battery_level - oldest.battery_level).abs() / 20.0);
    let battery = unit_clamp(0.6 * level + 0.4 * drop);

    let efficiency = unit_clamp((95.0 - newest.efficiency) / (95.0 - 80.0));

    let load = stats::max(&loads)
        .map(|l| unit_clamp((l - 70.0) / (95.0 - 70.0)))
        .unwrap_or(0.0);

    unit_clamp(
        RISK_WEIGHT_TEMPERATURE * temperature
            + RISK_WEIGHT_BATTERY * battery
            + RISK_WEIGHT_EFFICIENCY * efficiency
            + RISK_WEIGHT_LOAD * load,
    )
}

/// Metrics as the classifier sees them
///
/// With history, temperature, efficiency and load are replaced by the mean
/// of the newest [`SMOOTHING_SAMPLES`] samples.
pub fn smoothed_metrics(current: &UnitMetrics, history: &[HistorySample]) -> UnitMetrics {
    if history.is_empty() {
        return *current;
    }
    let recent = &history[..history.len().min(SMOOTHING_SAMPLES)];
    let avg = |f: fn(&UnitMetrics) -> f64| {
        let values: Vec<f64> = recent.iter().map(|h| f(&h.metrics)).collect();
        stats::mean(&values)
    };
    UnitMetrics {
        temperature: avg(|m| m.temperature),
        efficiency: avg(|m| m.efficiency),
        load: avg(|m| m.load),
        ..*current
    }
}

/// Derive the feature vector for a unit
///
/// `history` is the unit's recent window, newest-first, possibly empty.
/// Current and historical metrics are sanitised first (see
/// [`sanitize_metrics`]), so a malformed reading is scored with its default
/// instead of poisoning the vector.
pub fn derive_features(unit: &Unit, history: &[HistorySample]) -> FeatureVector {
    let clean: Vec<HistorySample> = history
        .iter()
        .map(|h| HistorySample {
            metrics: sanitize_metrics(&h.metrics),
            ..h.clone()
        })
        .collect();
    let metrics = smoothed_metrics(&sanitize_metrics(&unit.metrics), &clean);
    let risk = history_risk_score(&clean);
    FeatureVector::from_parts(&metrics, unit.capacity, unit.critical_load, risk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(battery: f64, temperature: f64, load: f64, efficiency: f64) -> HistorySample {
        HistorySample {
            unit_id: "UPS-01".into(),
            timestamp: Utc::now(),
            status: Default::default(),
            capacity: 2000.0,
            critical_load: 500.0,
            failure_risk: 0.0,
            metrics: UnitMetrics {
                battery_level: battery,
                temperature,
                load,
                efficiency,
                ..Default::default()
            },
        }
    }

    fn unit(metrics: UnitMetrics) -> Unit {
        Unit::new("UPS-01", "UPS-01", "Datacenter-1", 3000.0, 800.0, metrics)
    }

    #[test]
    fn test_empty_history_scores_zero() {
        assert_eq!(history_risk_score(&[]), 0.0);
    }

    #[test]
    fn test_calm_history_scores_zero() {
        let h = vec![sample(100.0, 25.0, 50.0, 96.0); 10];
        assert_eq!(history_risk_score(&h), 0.0);
    }

    #[test]
    fn test_extreme_temperature_capped_at_weight() {
        let h = vec![sample(100.0, 1000.0, 50.0, 96.0)];
        let risk = history_risk_score(&h);
        assert!((risk - 0.3).abs() < 1e-12, "risk was {}", risk);
    }

    #[test]
    fn test_worst_case_clamped_to_one() {
        let h = vec![sample(0.0, 1000.0, 500.0, -50.0), sample(100.0, 20.0, 10.0, 99.0)];
        let risk = history_risk_score(&h);
        assert!((risk - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_battery_component() {
        // newest 50, oldest 60: level 0.5, drop 10/20 = 0.5
        let h = vec![sample(50.0, 20.0, 10.0, 96.0), sample(60.0, 20.0, 10.0, 96.0)];
        let expected = 0.3 * (0.6 * 0.5 + 0.4 * 0.5);
        assert!((history_risk_score(&h) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_peak_values_drive_components() {
        // only the older sample is hot and loaded
        let h = vec![sample(100.0, 25.0, 50.0, 95.0), sample(100.0, 36.5, 82.5, 95.0)];
        let expected = 0.3 * 0.5 + 0.2 * 0.5;
        assert!((history_risk_score(&h) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_nan_does_not_escape() {
        let h = vec![sample(f64::NAN, f64::NAN, f64::NAN, f64::NAN)];
        let risk = history_risk_score(&h);
        assert!((0.0..=1.0).contains(&risk));
    }

    #[test]
    fn test_derive_without_history_uses_raw_metrics() {
        let m = UnitMetrics {
            temperature: 31.0,
            ..Default::default()
        };
        let fv = derive_features(&unit(m), &[]);
        assert_eq!(fv.0[3], 31.0);
        assert_eq!(fv.risk(), 0.0);
        assert_eq!(fv.0[9], 3000.0);
        assert_eq!(fv.0[10], 800.0);
    }

    #[test]
    fn test_derive_smooths_over_newest_five() {
        let mut h: Vec<HistorySample> = (0..5).map(|_| sample(100.0, 30.0, 60.0, 94.0)).collect();
        h.extend((0..5).map(|_| sample(100.0, 90.0, 99.0, 10.0)));
        let fv = derive_features(&unit(UnitMetrics::default()), &h);
        assert_eq!(fv.0[3], 30.0);
        assert_eq!(fv.0[4], 94.0);
        assert_eq!(fv.0[5], 60.0);
        // battery is not smoothed
        assert_eq!(fv.0[2], 100.0);
    }

    #[test]
    fn test_feature_order_matches_names() {
        let m = UnitMetrics {
            power_input: 1.0,
            power_output: 2.0,
            battery_level: 3.0,
            temperature: 4.0,
            efficiency: 5.0,
            load: 6.0,
            voltage_input: 7.0,
            voltage_output: 8.0,
            frequency: 9.0,
            uptime: 12.0,
        };
        let fv = FeatureVector::from_parts(&m, 10.0, 11.0, 0.13);
        assert_eq!(&fv.0[..12], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        assert_eq!(FEATURE_NAMES[RISK_INDEX], "failureRisk");
    }

    #[test]
    fn test_malformed_metrics_are_defaulted() {
        let m = UnitMetrics {
            battery_level: 10.0,
            temperature: 50.0,
            load: 96.0,
            efficiency: 70.0,
            uptime: f64::NAN,
            power_input: f64::INFINITY,
            ..Default::default()
        };
        let mut h = vec![sample(10.0, 50.0, 96.0, 70.0)];
        h[0].metrics.uptime = f64::NAN;
        h[0].metrics.frequency = f64::NAN;

        let fv = derive_features(&unit(m), &h);
        assert!(fv.ensure_finite("UPS-01").is_ok());
        assert_eq!(fv.0[0], UnitMetrics::default().power_input);
        assert_eq!(fv.0[11], UnitMetrics::default().uptime);
        assert_eq!(fv.0[2], 10.0);
    }

    #[test]
    fn test_ensure_finite() {
        let mut fv = FeatureVector::from_parts(&UnitMetrics::default(), 1.0, 1.0, 0.0);
        assert!(fv.ensure_finite("UPS-01").is_ok());
        fv.0[4] = f64::NAN;
        let err = fv.ensure_finite("UPS-01").unwrap_err();
        assert!(err.to_string().contains("efficiency"));
    }
}
