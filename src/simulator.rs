//! Bounded random-walk telemetry synthesis for the refresh cycle
//!
//! Battery drains slowly and, once below the recharge floor, usually jumps
//! back up; every other metric wanders inside fixed bounds.

use rand::Rng;

use crate::fleet::UnitMetrics;
use crate::status::sanitize_metrics;

/// Battery level below which a recharge may kick in (%)
pub const RECHARGE_FLOOR: f64 = 20.0;

/// Probability of recharging when below the floor
pub const RECHARGE_PROBABILITY: f64 = 0.8;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn walk<R: Rng + ?Sized>(rng: &mut R, value: f64, step: f64, lo: f64, hi: f64) -> f64 {
    (value + rng.random_range(-step..=step)).clamp(lo, hi)
}

/// Next metric values for one unit
///
/// Malformed readings restart from their defaults.
pub fn next_metrics<R: Rng + ?Sized>(current: &UnitMetrics, rng: &mut R) -> UnitMetrics {
    let current = &sanitize_metrics(current);
    let battery = current.battery_level;
    let battery_level = if battery < RECHARGE_FLOOR && rng.random_bool(RECHARGE_PROBABILITY) {
        (battery + rng.random_range(5..=15) as f64).min(100.0)
    } else {
        (battery - rng.random_range(0.1..=0.5)).max(0.0)
    };

    let power_input = (current.power_input + rng.random_range(-50.0..=50.0)).max(100.0);
    let power_output = (current.power_output + rng.random_range(-30.0..=30.0)).max(50.0);

    UnitMetrics {
        battery_level: round2(battery_level),
        temperature: round2(walk(rng, current.temperature, 2.0, 15.0, 45.0)),
        load: round2(walk(rng, current.load, 1.5, 0.0, 100.0)),
        efficiency: round2(walk(rng, current.efficiency, 0.5, 85.0, 99.0)),
        power_input: round2(power_input),
        power_output: round2(power_output),
        voltage_input: round2(walk(rng, current.voltage_input, 1.0, 200.0, 250.0)),
        voltage_output: round2(walk(rng, current.voltage_output, 0.3, 220.0, 240.0)),
        frequency: round2(walk(rng, current.frequency, 0.05, 49.0, 61.0)),
        uptime: current.uptime + 1.0 / 60.0,
    }
}
