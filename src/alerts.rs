// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Alert synthesis
//!
//! Alerts are a read model over the current unit state and its latest
//! prediction. They are rebuilt on every tick and replace the unit's
//! previous alert set, so identifiers are deterministic per
//! `(unit, kind, category)` rather than random.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::explain::{fallback, ExplanationRequest, Explainer};
use crate::fleet::{Unit, UnitMetrics, UnitStatus};
use crate::prediction::{Prediction, Timeframe};
use crate::status::{FAILED_BAND, RISKY_BAND, WARNING_BAND};
use tokio::time::Instant;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Battery,
    Thermal,
    Load,
    PowerBalance,
    Efficiency,
    Voltage,
    Frequency,
    Composite,
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Battery => write!(f, "battery"),
            Self::Thermal => write!(f, "thermal"),
            Self::Load => write!(f, "load"),
            Self::PowerBalance => write!(f, "power_balance"),
            Self::Efficiency => write!(f, "efficiency"),
            Self::Voltage => write!(f, "voltage"),
            Self::Frequency => write!(f, "frequency"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

/// What produced the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "status_alert")]
    Status,
    #[serde(rename = "metric_alert")]
    Metric,
    #[serde(rename = "ml_prediction")]
    Prediction,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::Metric => write!(f, "metric"),
            Self::Prediction => write!(f, "prediction"),
        }
    }
}

/// A derived notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub unit_id: String,
    pub unit_name: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    #[serde(alias = "primary_risk")]
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub recommended_action: String,
    pub confidence: f64,
    pub prediction_timeframe: Timeframe,
    pub value: f64,
    pub threshold: f64,
    pub failure_reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Metric alert thresholds
pub const LOW_BATTERY: f64 = 20.0;
pub const CRITICAL_BATTERY: f64 = 10.0;
pub const HIGH_TEMPERATURE: f64 = 40.0;
pub const CRITICAL_TEMPERATURE: f64 = 45.0;
pub const LOW_EFFICIENCY: f64 = 90.0;
pub const CRITICAL_EFFICIENCY: f64 = 80.0;
pub const POWER_IMBALANCE_W: f64 = 50.0;
pub const VOLTAGE_DELTA_V: f64 = 10.0;
pub const FREQUENCY_DEVIATION_HZ: f64 = 1.0;

/// Prediction alert thresholds
pub const PREDICTION_CRITICAL: f64 = 0.7;
pub const PREDICTION_WARNING: f64 = 0.5;

/// Category of the most severe breached status band
///
/// Within a band the order is battery, thermal, load, efficiency. Falls
/// back to [`AlertCategory::Composite`] when only the derived risk (or
/// nothing) is out of band.
pub fn dominant_category(m: &UnitMetrics) -> AlertCategory {
    for band in [FAILED_BAND, WARNING_BAND, RISKY_BAND] {
        if m.battery_level < band.battery_below {
            return AlertCategory::Battery;
        }
        if m.temperature > band.temperature_above {
            return AlertCategory::Thermal;
        }
        if m.load > band.load_above {
            return AlertCategory::Load;
        }
        if m.efficiency < band.efficiency_below {
            return AlertCategory::Efficiency;
        }
    }
    AlertCategory::Composite
}

fn frequency_deviation(hz: f64) -> f64 {
    (hz - 50.0).abs().min((hz - 60.0).abs())
}

/// Short machine tags for the breached metric thresholds
fn failure_tags(m: &UnitMetrics) -> Vec<String> {
    let mut tags = Vec::new();
    if m.battery_level < LOW_BATTERY {
        tags.push("low_battery".to_string());
    }
    if m.temperature > HIGH_TEMPERATURE {
        tags.push("high_temperature".to_string());
    }
    if m.efficiency < LOW_EFFICIENCY {
        tags.push("low_efficiency".to_string());
    }
    if tags.is_empty() {
        tags.push("unknown".to_string());
    }
    tags
}

struct AlertDraft {
    kind: AlertKind,
    severity: AlertSeverity,
    category: AlertCategory,
    title: String,
    message: String,
    recommended_action: &'static str,
    confidence: f64,
    timeframe: Timeframe,
    value: f64,
    threshold: f64,
    failure_reasons: Vec<String>,
}

impl AlertDraft {
    fn finish(self, unit: &Unit, at: DateTime<Utc>) -> Alert {
        Alert {
            id: format!("{}:{}:{}", unit.id, self.kind, self.category),
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            kind: self.kind,
            severity: self.severity,
            category: self.category,
            title: self.title,
            message: self.message,
            recommended_action: self.recommended_action.to_string(),
            confidence: self.confidence,
            prediction_timeframe: self.timeframe,
            value: self.value,
            threshold: self.threshold,
            failure_reasons: self.failure_reasons,
            timestamp: at,
        }
    }
}

/// Converts unit state and predictions into alerts
#[derive(Clone)]
pub struct AlertSynthesizer {
    explainer: Explainer,
}

impl AlertSynthesizer {
    pub fn new(explainer: Explainer) -> Self {
        Self { explainer }
    }

    pub fn explainer(&self) -> &Explainer {
        &self.explainer
    }

    /// Attach failure reasons to a prediction
    ///
    /// Remote first; remote attempts stop at `deadline` and the local
    /// template fills in.
    pub async fn explain(&self, unit: &Unit, prediction: &mut Prediction, deadline: Instant) {
        let request = ExplanationRequest::new(unit, prediction);
        prediction.failure_reasons = self.explainer.explain_before(&request, deadline).await;
    }

    /// Alerts for a unit, most severe first
    pub fn synthesize(
        &self,
        unit: &Unit,
        prediction: Option<&Prediction>,
        at: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut drafts = Vec::new();
        let m = &unit.metrics;

        Self::status_alert(unit, prediction, &mut drafts);
        Self::metric_alerts(unit.name.as_str(), m, &mut drafts);
        if let Some(p) = prediction {
            Self::prediction_alert(unit, p, &mut drafts);
        }

        let mut alerts: Vec<Alert> = drafts.into_iter().map(|d| d.finish(unit, at)).collect();
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
        alerts
    }

    fn status_alert(unit: &Unit, prediction: Option<&Prediction>, out: &mut Vec<AlertDraft>) {
        let m = &unit.metrics;
        let reasons = match prediction {
            Some(p) if !p.failure_reasons.is_empty() => p.failure_reasons.clone(),
            _ => failure_tags(m),
        };
        let summary = format!(
            "Battery: {:.1}%, Temperature: {:.1}°C, Load: {:.1}%, Efficiency: {:.1}%",
            m.battery_level, m.temperature, m.load, m.efficiency
        );

        match unit.status {
            UnitStatus::Failed => out.push(AlertDraft {
                kind: AlertKind::Status,
                severity: AlertSeverity::Critical,
                category: dominant_category(m),
                title: format!("UPS {} - System Failure", unit.name),
                message: format!("UPS {} has failed. {}", unit.name, summary),
                recommended_action: "Immediate maintenance required. Check battery, temperature, load and efficiency.",
                confidence: 1.0,
                timeframe: Timeframe::Immediate,
                value: unit.failure_risk,
                threshold: FAILED_BAND.risk_above,
                failure_reasons: reasons,
            }),
            UnitStatus::Warning => out.push(AlertDraft {
                kind: AlertKind::Status,
                severity: AlertSeverity::Warning,
                category: dominant_category(m),
                title: format!("UPS {} - Warning Condition", unit.name),
                message: format!("UPS {} is showing warning signs. {}", unit.name, summary),
                recommended_action: "Monitor closely. Schedule maintenance if conditions worsen.",
                confidence: 0.8,
                timeframe: Timeframe::TwentyFourHours,
                value: unit.failure_risk,
                threshold: WARNING_BAND.risk_above,
                failure_reasons: reasons,
            }),
            UnitStatus::Risky | UnitStatus::Healthy => {}
        }
    }

    fn metric_alerts(name: &str, m: &UnitMetrics, out: &mut Vec<AlertDraft>) {
        if m.battery_level < LOW_BATTERY {
            let critical = m.battery_level < CRITICAL_BATTERY;
            out.push(AlertDraft {
                kind: AlertKind::Metric,
                severity: if critical { AlertSeverity::Critical } else { AlertSeverity::Warning },
                category: AlertCategory::Battery,
                title: format!("UPS {} - Low Battery", name),
                message: format!("Battery level is critically low: {:.1}%", m.battery_level),
                recommended_action: "Check battery health and consider replacement.",
                confidence: 0.9,
                timeframe: if critical { Timeframe::Immediate } else { Timeframe::FourHours },
                value: m.battery_level,
                threshold: LOW_BATTERY,
                failure_reasons: vec!["low_battery".into()],
            });
        }

        if m.temperature > HIGH_TEMPERATURE {
            let critical = m.temperature > CRITICAL_TEMPERATURE;
            out.push(AlertDraft {
                kind: AlertKind::Metric,
                severity: if critical { AlertSeverity::Critical } else { AlertSeverity::Warning },
                category: AlertCategory::Thermal,
                title: format!("UPS {} - High Temperature", name),
                message: format!("Temperature is elevated: {:.1}°C", m.temperature),
                recommended_action: "Check cooling system and ventilation.",
                confidence: 0.85,
                timeframe: if critical { Timeframe::Immediate } else { Timeframe::EightHours },
                value: m.temperature,
                threshold: HIGH_TEMPERATURE,
                failure_reasons: vec!["high_temperature".into()],
            });
        }

        if m.efficiency < LOW_EFFICIENCY {
            let critical = m.efficiency < CRITICAL_EFFICIENCY;
            out.push(AlertDraft {
                kind: AlertKind::Metric,
                severity: if critical { AlertSeverity::Critical } else { AlertSeverity::Warning },
                category: AlertCategory::Efficiency,
                title: format!("UPS {} - Low Efficiency", name),
                message: format!("Efficiency is below normal: {:.1}%", m.efficiency),
                recommended_action: if critical {
                    "Inspect conversion stages and cooling; schedule immediate maintenance."
                } else {
                    "Monitor performance and schedule maintenance."
                },
                confidence: 0.7,
                timeframe: if critical { Timeframe::EightHours } else { Timeframe::TwentyFourHours },
                value: m.efficiency,
                threshold: LOW_EFFICIENCY,
                failure_reasons: vec!["low_efficiency".into()],
            });
        }

        let balance = m.power_balance();
        if balance.abs() > POWER_IMBALANCE_W {
            out.push(AlertDraft {
                kind: AlertKind::Metric,
                severity: AlertSeverity::Warning,
                category: AlertCategory::PowerBalance,
                title: format!("UPS {} - Power Imbalance", name),
                message: format!("Input/output power differ by {:.0}W", balance),
                recommended_action: "Inspect power regulation and conversion stages.",
                confidence: 0.6,
                timeframe: Timeframe::TwentyFourHours,
                value: balance,
                threshold: POWER_IMBALANCE_W,
                failure_reasons: vec!["power_imbalance".into()],
            });
        }

        if m.voltage_delta() > VOLTAGE_DELTA_V {
            out.push(AlertDraft {
                kind: AlertKind::Metric,
                severity: AlertSeverity::Warning,
                category: AlertCategory::Voltage,
                title: format!("UPS {} - Voltage Regulation", name),
                message: format!(
                    "Input {:.1}V vs output {:.1}V ({:.1}V difference)",
                    m.voltage_input,
                    m.voltage_output,
                    m.voltage_delta()
                ),
                recommended_action: "Check input supply and output regulation.",
                confidence: 0.6,
                timeframe: Timeframe::TwentyFourHours,
                value: m.voltage_delta(),
                threshold: VOLTAGE_DELTA_V,
                failure_reasons: vec!["voltage_regulation".into()],
            });
        }

        if frequency_deviation(m.frequency) > FREQUENCY_DEVIATION_HZ {
            out.push(AlertDraft {
                kind: AlertKind::Metric,
                severity: AlertSeverity::Warning,
                category: AlertCategory::Frequency,
                title: format!("UPS {} - Frequency Deviation", name),
                message: format!("Output frequency off nominal: {:.2}Hz", m.frequency),
                recommended_action: "Verify inverter synchronisation.",
                confidence: 0.6,
                timeframe: Timeframe::TwentyFourHours,
                value: m.frequency,
                threshold: FREQUENCY_DEVIATION_HZ,
                failure_reasons: vec!["frequency_deviation".into()],
            });
        }
    }

    fn prediction_alert(unit: &Unit, p: &Prediction, out: &mut Vec<AlertDraft>) {
        let (severity, timeframe, threshold, title, action) = if p.probability_failure > PREDICTION_CRITICAL {
            (
                AlertSeverity::Critical,
                Timeframe::SixHours,
                PREDICTION_CRITICAL,
                "High Failure Risk",
                "Immediate inspection and preventive maintenance required.",
            )
        } else if p.probability_failure > PREDICTION_WARNING {
            (
                AlertSeverity::Warning,
                Timeframe::TwentyFourHours,
                PREDICTION_WARNING,
                "Elevated Failure Risk",
                "Schedule maintenance and monitor closely.",
            )
        } else {
            return;
        };

        let reasons = if p.failure_reasons.is_empty() {
            fallback::fallback_reasons(&unit.metrics, p.probability_failure)
        } else {
            p.failure_reasons.clone()
        };

        out.push(AlertDraft {
            kind: AlertKind::Prediction,
            severity,
            category: dominant_category(&unit.metrics),
            title: format!("UPS {} - {}", unit.name, title),
            message: format!(
                "Model predicts {:.1}% chance of failure within {}",
                p.probability_failure * 100.0,
                timeframe
            ),
            recommended_action: action,
            confidence: p.confidence,
            timeframe,
            value: p.probability_failure,
            threshold,
            failure_reasons: reasons,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassLabel, ClassProbabilities};
    use crate::features::FeatureVector;
    use crate::fleet::UnitUpdate;

    fn unit_with(m: UnitMetrics) -> Unit {
        let mut unit = Unit::new("UPS-09", "UPS-09", "Datacenter-3", 2000.0, 500.0, m);
        unit.apply(&UnitUpdate::derive(m, 0.0, Utc::now()));
        unit
    }

    fn quiet() -> UnitMetrics {
        UnitMetrics {
            battery_level: 90.0,
            temperature: 24.0,
            load: 40.0,
            efficiency: 97.0,
            power_output: 980.0,
            ..Default::default()
        }
    }

    fn prediction(unit: &Unit, healthy: f64) -> Prediction {
        let fv = FeatureVector::from_parts(&unit.metrics, unit.capacity, unit.critical_load, 0.0);
        let probs = ClassProbabilities {
            healthy,
            degraded: 0.0,
            failed: 1.0 - healthy,
        };
        Prediction::new(unit, &fv, ClassLabel::Failed, &probs, Utc::now())
    }

    fn synth() -> AlertSynthesizer {
        AlertSynthesizer::new(Explainer::local_only())
    }

    #[test]
    fn test_healthy_unit_has_no_alerts() {
        let unit = unit_with(quiet());
        assert!(synth().synthesize(&unit, None, Utc::now()).is_empty());
    }

    #[test]
    fn test_failed_status_yields_critical() {
        let unit = unit_with(UnitMetrics {
            battery_level: 12.0,
            ..quiet()
        });
        assert_eq!(unit.status, UnitStatus::Failed);
        let alerts = synth().synthesize(&unit, None, Utc::now());
        let status = alerts.iter().find(|a| a.kind == AlertKind::Status).unwrap();
        assert_eq!(status.severity, AlertSeverity::Critical);
        assert_eq!(status.category, AlertCategory::Battery);
        assert_eq!(status.confidence, 1.0);
        assert_eq!(status.prediction_timeframe, Timeframe::Immediate);
        assert_eq!(status.failure_reasons, vec!["low_battery"]);
        // battery 12 is below 20 but not below 10
        let battery = alerts.iter().find(|a| a.kind == AlertKind::Metric).unwrap();
        assert_eq!(battery.severity, AlertSeverity::Warning);
        assert_eq!(battery.prediction_timeframe, Timeframe::FourHours);
    }

    #[test]
    fn test_warning_status_yields_warning() {
        let unit = unit_with(UnitMetrics {
            temperature: 33.0,
            ..quiet()
        });
        assert_eq!(unit.status, UnitStatus::Warning);
        let alerts = synth().synthesize(&unit, None, Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].category, AlertCategory::Thermal);
        assert_eq!(alerts[0].id, "UPS-09:status:thermal");
    }

    #[test]
    fn test_metric_severity_scales() {
        let unit = unit_with(UnitMetrics {
            battery_level: 5.0,
            temperature: 46.0,
            efficiency: 85.0,
            ..quiet()
        });
        let alerts = synth().synthesize(&unit, None, Utc::now());
        let metric = |c: AlertCategory| {
            alerts
                .iter()
                .find(|a| a.kind == AlertKind::Metric && a.category == c)
                .unwrap()
        };
        assert_eq!(metric(AlertCategory::Battery).severity, AlertSeverity::Critical);
        assert_eq!(metric(AlertCategory::Thermal).severity, AlertSeverity::Critical);
        assert_eq!(metric(AlertCategory::Efficiency).severity, AlertSeverity::Warning);
        // most severe first
        assert!(alerts.windows(2).all(|w| w[0].severity >= w[1].severity));
    }

    #[test]
    fn test_efficiency_in_failed_band_is_critical() {
        let unit = unit_with(UnitMetrics {
            efficiency: 75.0,
            ..quiet()
        });
        let alerts = synth().synthesize(&unit, None, Utc::now());
        let eff = alerts
            .iter()
            .find(|a| a.kind == AlertKind::Metric && a.category == AlertCategory::Efficiency)
            .unwrap();
        assert_eq!(eff.severity, AlertSeverity::Critical);
        assert_eq!(eff.prediction_timeframe, Timeframe::EightHours);
    }

    #[test]
    fn test_prediction_alert_bands() {
        let unit = unit_with(quiet());
        let high = prediction(&unit, 0.1);
        let alerts = synth().synthesize(&unit, Some(&high), Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Prediction);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].prediction_timeframe, Timeframe::SixHours);
        assert_eq!(alerts[0].category, AlertCategory::Composite);
        assert!(!alerts[0].failure_reasons.is_empty());

        let medium = prediction(&unit, 0.4);
        let alerts = synth().synthesize(&unit, Some(&medium), Utc::now());
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].prediction_timeframe, Timeframe::TwentyFourHours);

        let low = prediction(&unit, 0.55);
        assert!(synth().synthesize(&unit, Some(&low), Utc::now()).is_empty());
    }

    #[test]
    fn test_ids_are_stable() {
        let unit = unit_with(UnitMetrics {
            battery_level: 5.0,
            ..quiet()
        });
        let a = synth().synthesize(&unit, None, Utc::now());
        let b = synth().synthesize(&unit, None, Utc::now());
        let ids = |v: &[Alert]| v.iter().map(|a| a.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_power_voltage_frequency_alerts() {
        let unit = unit_with(UnitMetrics {
            power_input: 1200.0,
            power_output: 1000.0,
            voltage_input: 210.0,
            voltage_output: 230.0,
            frequency: 57.5,
            ..quiet()
        });
        let alerts = synth().synthesize(&unit, None, Utc::now());
        let cats: Vec<AlertCategory> = alerts.iter().map(|a| a.category).collect();
        assert!(cats.contains(&AlertCategory::PowerBalance));
        assert!(cats.contains(&AlertCategory::Voltage));
        assert!(cats.contains(&AlertCategory::Frequency));
    }

    #[tokio::test]
    async fn test_explain_attaches_reasons() {
        let unit = unit_with(quiet());
        let mut p = prediction(&unit, 0.0);
        synth()
            .explain(&unit, &mut p, Instant::now() + std::time::Duration::from_secs(30))
            .await;
        assert!(!p.failure_reasons.is_empty());
    }

    #[test]
    fn test_alert_document_fields() {
        let unit = unit_with(UnitMetrics {
            battery_level: 5.0,
            ..quiet()
        });
        let alerts = synth().synthesize(&unit, None, Utc::now());
        let doc = serde_json::to_value(&alerts[0]).unwrap();
        for key in ["severity", "category", "message", "recommended_action", "confidence", "prediction_timeframe"] {
            assert!(doc.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(doc["severity"], "critical");
    }
}
