//! Deterministic local explanation templates

use crate::fleet::UnitMetrics;

/// Maximum reasons produced by the local template
pub const MAX_FALLBACK_REASONS: usize = 6;

/// Reasons keyed on which metric sits in which band
///
/// Always returns between one and [`MAX_FALLBACK_REASONS`] entries; when
/// no metric band fires a probability-banded statement is emitted.
pub fn fallback_reasons(m: &UnitMetrics, probability_failure: f64) -> Vec<String> {
    let mut reasons = Vec::new();

    let battery = m.battery_level;
    if battery < 20.0 {
        reasons.push(format!(
            "🚨 Critical battery: {:.1}% charge. Backup power will not hold through an outage; replace the battery string within 24 hours.",
            battery
        ));
    } else if battery < 30.0 {
        reasons.push(format!(
            "🚨 High battery failure risk: {:.1}% charge indicates severe wear. Schedule emergency battery replacement.",
            battery
        ));
    } else if battery < 40.0 {
        reasons.push(format!(
            "⚠️ Battery ageing: {:.1}% charge shortens runtime during extended outages. Plan replacement within a week.",
            battery
        ));
    } else if battery < 60.0 {
        reasons.push(format!(
            "ℹ️ Battery wear: {:.1}% charge reduces backup capacity under high load. Monitor discharge cycles.",
            battery
        ));
    }

    let temp = m.temperature;
    if temp > 50.0 {
        reasons.push(format!(
            "🚨 Critical temperature: {:.1}°C exceeds safe limits and will trigger thermal shutdown. Check cooling immediately.",
            temp
        ));
    } else if temp > 45.0 {
        reasons.push(format!(
            "⚠️ High temperature: {:.1}°C is close to critical and degrades capacitors and battery life. Inspect cooling within 4 hours.",
            temp
        ));
    } else if temp > 40.0 {
        reasons.push(format!(
            "ℹ️ Elevated temperature: {:.1}°C accelerates component ageing. Verify ventilation.",
            temp
        ));
    }

    let load = m.load;
    if load > 95.0 {
        reasons.push(format!(
            "🚨 Critical load: {:.1}% is beyond rated capacity. Shed load or add capacity now.",
            load
        ));
    } else if load > 90.0 {
        reasons.push(format!(
            "⚠️ High load: {:.1}% leaves no headroom during an outage. Rebalance load or upgrade capacity.",
            load
        ));
    } else if load > 80.0 {
        reasons.push(format!(
            "ℹ️ Elevated load: {:.1}% reduces backup runtime and increases thermal stress.",
            load
        ));
    }

    let balance = m.power_balance();
    if balance.abs() > 50.0 {
        reasons.push(format!(
            "🚨 Power imbalance: {:.0}W between input and output points to a regulation fault. Arrange an electrical inspection.",
            balance
        ));
    } else if balance.abs() > 20.0 {
        reasons.push(format!(
            "⚠️ Power imbalance: {:.0}W between input and output. Schedule maintenance within 24 hours.",
            balance
        ));
    }

    let eff = m.efficiency;
    if eff < 80.0 {
        reasons.push(format!(
            "🚨 Critical efficiency: {:.1}% means heavy internal losses and excess heat. Investigate the conversion stage.",
            eff
        ));
    } else if eff < 85.0 {
        reasons.push(format!(
            "⚠️ Low efficiency: {:.1}% is below the optimal band. Inspect conversion components and cooling.",
            eff
        ));
    }

    if reasons.is_empty() {
        let pct = probability_failure * 100.0;
        reasons.push(if probability_failure > 0.8 {
            format!("🚨 Failure imminent: model predicts {:.1}% failure probability from several converging indicators. Schedule emergency maintenance.", pct)
        } else if probability_failure > 0.6 {
            format!("⚠️ Elevated failure risk: model predicts {:.1}% failure probability. The unit is operating outside optimal parameters.", pct)
        } else if probability_failure > 0.4 {
            format!("ℹ️ Moderate failure risk: model predicts {:.1}% failure probability. Early intervention can prevent escalation.", pct)
        } else {
            format!("ℹ️ Low failure risk: model predicts {:.1}% failure probability. Continue routine monitoring.", pct)
        });
    }

    reasons.truncate(MAX_FALLBACK_REASONS);
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal() -> UnitMetrics {
        UnitMetrics {
            power_output: 990.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_nominal_unit_gets_probability_statement() {
        let reasons = fallback_reasons(&nominal(), 0.85);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("85.0%"));
        assert!(reasons[0].starts_with("🚨"));
    }

    #[test]
    fn test_low_probability_is_never_empty() {
        let reasons = fallback_reasons(&nominal(), 0.0);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("Low failure risk"));
    }

    #[test]
    fn test_band_reasons() {
        let m = UnitMetrics {
            battery_level: 10.0,
            temperature: 50.5,
            load: 96.0,
            efficiency: 70.0,
            power_input: 1000.0,
            power_output: 900.0,
            ..Default::default()
        };
        let reasons = fallback_reasons(&m, 1.0);
        assert_eq!(reasons.len(), 5);
        assert!(reasons[0].contains("Critical battery"));
        assert!(reasons[1].contains("50.5°C"));
        assert!(reasons[3].contains("100W"));
        assert!(reasons.iter().all(|r| !r.contains("model predicts")));
    }

    #[test]
    fn test_deterministic() {
        let m = UnitMetrics {
            battery_level: 35.0,
            ..Default::default()
        };
        assert_eq!(fallback_reasons(&m, 0.5), fallback_reasons(&m, 0.5));
    }
}
