//! Status state machine
//!
//! `determine_status` maps a unit's instantaneous metrics (and the derived
//! short-term failure risk) onto one of four ordered severity states. The
//! bands are evaluated worst-first and the first band with any breached
//! threshold wins.

use crate::fleet::{UnitMetrics, UnitStatus};

/// Thresholds for one severity band
///
/// A band is breached when any single metric crosses its limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusBand {
    /// Battery below this (%)
    pub battery_below: f64,
    /// Temperature above this (°C)
    pub temperature_above: f64,
    /// Load above this (%)
    pub load_above: f64,
    /// Efficiency below this (%)
    pub efficiency_below: f64,
    /// Derived failure risk above this
    pub risk_above: f64,
}

impl StatusBand {
    fn breached(&self, m: &ClampedInputs) -> bool {
        m.battery < self.battery_below
            || m.temperature > self.temperature_above
            || m.load > self.load_above
            || m.efficiency < self.efficiency_below
            || m.risk > self.risk_above
    }
}

/// Failure band
pub const FAILED_BAND: StatusBand = StatusBand {
    battery_below: 15.0,
    temperature_above: 38.0,
    load_above: 90.0,
    efficiency_below: 80.0,
    risk_above: 0.8,
};

/// Warning band
pub const WARNING_BAND: StatusBand = StatusBand {
    battery_below: 25.0,
    temperature_above: 32.0,
    load_above: 80.0,
    efficiency_below: 85.0,
    risk_above: 0.6,
};

/// Risky band
pub const RISKY_BAND: StatusBand = StatusBand {
    battery_below: 35.0,
    temperature_above: 28.0,
    load_above: 70.0,
    efficiency_below: 90.0,
    risk_above: 0.4,
};

/// Upper bound accepted for power readings (W)
const MAX_POWER: f64 = 1_000_000.0;

/// Upper bound accepted for voltage readings (V)
const MAX_VOLTAGE: f64 = 1_000.0;

/// Inputs after sanitisation
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClampedInputs {
    battery: f64,
    temperature: f64,
    load: f64,
    efficiency: f64,
    risk: f64,
}

/// Replace a reading outside `[lo, hi]` (or non-finite) with `default`
fn sanitize(value: f64, lo: f64, hi: f64, default: f64) -> f64 {
    if value.is_finite() && (lo..=hi).contains(&value) {
        value
    } else {
        default
    }
}

/// Metrics with every out-of-range or non-finite reading replaced by the
/// [`UnitMetrics::default`] value for that field
///
/// Battery, temperature, load and efficiency accept `[0, 100]`; power
/// `[0, 1 MW]`; voltage `[0, 1 kV]`; frequency `[0, 100]`; uptime any
/// non-negative value.
pub fn sanitize_metrics(metrics: &UnitMetrics) -> UnitMetrics {
    let d = UnitMetrics::default();
    let clean = UnitMetrics {
        battery_level: sanitize(metrics.battery_level, 0.0, 100.0, d.battery_level),
        temperature: sanitize(metrics.temperature, 0.0, 100.0, d.temperature),
        load: sanitize(metrics.load, 0.0, 100.0, d.load),
        efficiency: sanitize(metrics.efficiency, 0.0, 100.0, d.efficiency),
        power_input: sanitize(metrics.power_input, 0.0, MAX_POWER, d.power_input),
        power_output: sanitize(metrics.power_output, 0.0, MAX_POWER, d.power_output),
        voltage_input: sanitize(metrics.voltage_input, 0.0, MAX_VOLTAGE, d.voltage_input),
        voltage_output: sanitize(metrics.voltage_output, 0.0, MAX_VOLTAGE, d.voltage_output),
        frequency: sanitize(metrics.frequency, 0.0, 100.0, d.frequency),
        uptime: sanitize(metrics.uptime, 0.0, f64::MAX, d.uptime),
    };
    // NaN != NaN, so any replaced NaN also lands here
    if clean != *metrics {
        log::debug!("Out-of-range metrics replaced with defaults: {:?}", metrics);
    }
    clean
}

fn clamp_inputs(metrics: &UnitMetrics, failure_risk: f64) -> ClampedInputs {
    let clean = sanitize_metrics(metrics);
    ClampedInputs {
        battery: clean.battery_level,
        temperature: clean.temperature,
        load: clean.load,
        efficiency: clean.efficiency,
        risk: sanitize(failure_risk, 0.0, 1.0, 0.0),
    }
}

/// Determine the status of a unit from its current metrics
///
/// Total and deterministic: out-of-range or non-finite readings are
/// replaced with safe defaults (battery 100, temperature 25, load 50,
/// efficiency 95, risk 0) before any band is checked.
pub fn determine_status(metrics: &UnitMetrics, failure_risk: f64) -> UnitStatus {
    let inputs = clamp_inputs(metrics, failure_risk);

    if FAILED_BAND.breached(&inputs) {
        UnitStatus::Failed
    } else if WARNING_BAND.breached(&inputs) {
        UnitStatus::Warning
    } else if RISKY_BAND.breached(&inputs) {
        UnitStatus::Risky
    } else {
        UnitStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(battery: f64, temperature: f64, load: f64, efficiency: f64) -> UnitMetrics {
        UnitMetrics {
            battery_level: battery,
            temperature,
            load,
            efficiency,
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_baseline() {
        assert_eq!(
            determine_status(&metrics(50.0, 20.0, 50.0, 95.0), 0.0),
            UnitStatus::Healthy
        );
    }

    #[test]
    fn test_low_battery_fails_regardless() {
        assert_eq!(
            determine_status(&metrics(10.0, 20.0, 30.0, 98.0), 0.0),
            UnitStatus::Failed
        );
    }

    #[test]
    fn test_each_failed_trigger() {
        assert_eq!(determine_status(&metrics(90.0, 39.0, 50.0, 95.0), 0.0), UnitStatus::Failed);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 91.0, 95.0), 0.0), UnitStatus::Failed);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 50.0, 79.0), 0.0), UnitStatus::Failed);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 50.0, 95.0), 0.81), UnitStatus::Failed);
    }

    #[test]
    fn test_warning_band() {
        assert_eq!(determine_status(&metrics(20.0, 24.0, 50.0, 95.0), 0.0), UnitStatus::Warning);
        assert_eq!(determine_status(&metrics(90.0, 33.0, 50.0, 95.0), 0.0), UnitStatus::Warning);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 85.0, 95.0), 0.0), UnitStatus::Warning);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 50.0, 84.0), 0.0), UnitStatus::Warning);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 50.0, 95.0), 0.7), UnitStatus::Warning);
    }

    #[test]
    fn test_risky_band() {
        assert_eq!(determine_status(&metrics(30.0, 24.0, 50.0, 95.0), 0.0), UnitStatus::Risky);
        assert_eq!(determine_status(&metrics(90.0, 29.0, 50.0, 95.0), 0.0), UnitStatus::Risky);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 75.0, 95.0), 0.0), UnitStatus::Risky);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 50.0, 89.0), 0.0), UnitStatus::Risky);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 50.0, 95.0), 0.5), UnitStatus::Risky);
    }

    #[test]
    fn test_boundaries_are_strict() {
        // exactly on a threshold does not breach it
        assert_eq!(determine_status(&metrics(35.0, 28.0, 70.0, 90.0), 0.4), UnitStatus::Healthy);
        assert_eq!(determine_status(&metrics(15.0, 24.0, 50.0, 95.0), 0.0), UnitStatus::Warning);
    }

    #[test]
    fn test_worst_band_wins() {
        // risky temperature, failed battery
        assert_eq!(determine_status(&metrics(5.0, 30.0, 50.0, 95.0), 0.0), UnitStatus::Failed);
    }

    #[test]
    fn test_out_of_range_inputs_use_defaults() {
        assert_eq!(determine_status(&metrics(-5.0, 24.0, 50.0, 95.0), 0.0), UnitStatus::Healthy);
        assert_eq!(determine_status(&metrics(90.0, 1000.0, 50.0, 95.0), 0.0), UnitStatus::Healthy);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 150.0, 95.0), 0.0), UnitStatus::Healthy);
        assert_eq!(determine_status(&metrics(f64::NAN, 24.0, 50.0, f64::INFINITY), 0.0), UnitStatus::Healthy);
        assert_eq!(determine_status(&metrics(90.0, 24.0, 50.0, 95.0), 3.0), UnitStatus::Healthy);
    }

    #[test]
    fn test_sanitize_metrics_defaults_every_field() {
        let bad = UnitMetrics {
            battery_level: f64::NAN,
            temperature: -40.0,
            load: 250.0,
            efficiency: f64::INFINITY,
            power_input: -10.0,
            power_output: f64::NAN,
            voltage_input: 5000.0,
            voltage_output: f64::NEG_INFINITY,
            frequency: 400.0,
            uptime: f64::NAN,
        };
        assert_eq!(sanitize_metrics(&bad), UnitMetrics::default());

        let good = metrics(42.0, 30.0, 61.0, 91.0);
        assert_eq!(sanitize_metrics(&good), good);
    }

    #[test]
    fn test_deterministic() {
        let m = metrics(27.3, 31.9, 79.9, 85.1);
        let first = determine_status(&m, 0.55);
        for _ in 0..100 {
            assert_eq!(determine_status(&m, 0.55), first);
        }
    }

    #[test]
    fn test_scenario_failed_unit() {
        assert_eq!(determine_status(&metrics(10.0, 50.0, 96.0, 70.0), 0.0), UnitStatus::Failed);
    }

    #[test]
    fn test_scenario_healthy_unit() {
        assert_eq!(determine_status(&metrics(90.0, 24.0, 40.0, 97.0), 0.0), UnitStatus::Healthy);
    }
}
