//! Prediction records and risk bucketing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassLabel, ClassProbabilities};
use crate::features::FeatureVector;
use crate::fleet::{Unit, UnitStatus};

/// Probability at or above which a prediction is persisted and alerted on
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.4;

/// Boundary above which a prediction is high risk
pub const HIGH_RISK_BOUNDARY: f64 = 0.7;

/// Coarse risk bucket, monotonic in failure probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// `> 0.7` high, `>= 0.4` medium, else low
    ///
    /// NaN buckets as low.
    pub fn from_probability(p: f64) -> Self {
        if p > HIGH_RISK_BOUNDARY {
            Self::High
        } else if p >= DEFAULT_ALERT_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn timeframe(self) -> Timeframe {
        match self {
            Self::High => Timeframe::SixHours,
            Self::Medium => Timeframe::TwelveHours,
            Self::Low => Timeframe::TwentyFourHours,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Window in which a predicted condition is expected to materialise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "immediate")]
    Immediate,
    #[serde(rename = "4_hours")]
    FourHours,
    #[serde(rename = "6_hours")]
    SixHours,
    #[serde(rename = "8_hours")]
    EightHours,
    #[serde(rename = "12_hours")]
    TwelveHours,
    #[serde(rename = "24_hours")]
    TwentyFourHours,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::FourHours => write!(f, "4_hours"),
            Self::SixHours => write!(f, "6_hours"),
            Self::EightHours => write!(f, "8_hours"),
            Self::TwelveHours => write!(f, "12_hours"),
            Self::TwentyFourHours => write!(f, "24_hours"),
        }
    }
}

/// Snapshot of the inputs that drove a score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalDetails {
    pub battery_health: f64,
    pub temperature_status: f64,
    pub efficiency_rating: f64,
    pub load_percentage: f64,
    pub power_balance: f64,
    pub voltage_input: f64,
    pub voltage_output: f64,
    pub frequency: f64,
    pub capacity: f64,
    pub uptime: f64,
    pub history_risk: f64,
}

impl TechnicalDetails {
    pub fn from_features(fv: &FeatureVector) -> Self {
        let v = &fv.0;
        Self {
            battery_health: v[2],
            temperature_status: v[3],
            efficiency_rating: v[4],
            load_percentage: v[5],
            power_balance: v[0] - v[1],
            voltage_input: v[6],
            voltage_output: v[7],
            frequency: v[8],
            capacity: v[9],
            uptime: v[11],
            history_risk: fv.risk(),
        }
    }
}

/// Per-unit, per-cycle failure forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub unit_id: String,
    pub unit_name: String,
    pub timestamp: DateTime<Utc>,
    pub predicted_class: ClassLabel,
    pub probability_failure: f64,
    pub probability_healthy: f64,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub timeframe: Timeframe,
    pub current_status: UnitStatus,
    pub failure_reasons: Vec<String>,
    pub technical_details: TechnicalDetails,
}

impl Prediction {
    /// Build a prediction; explanation strings are attached later
    pub fn new(
        unit: &Unit,
        features: &FeatureVector,
        predicted_class: ClassLabel,
        probabilities: &ClassProbabilities,
        at: DateTime<Utc>,
    ) -> Self {
        let probability_failure = probabilities.failure();
        let risk_level = RiskLevel::from_probability(probability_failure);
        Self {
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            timestamp: at,
            predicted_class,
            probability_failure,
            probability_healthy: 1.0 - probability_failure,
            confidence: probabilities.confidence(),
            risk_level,
            timeframe: risk_level.timeframe(),
            current_status: unit.status,
            failure_reasons: Vec::new(),
            technical_details: TechnicalDetails::from_features(features),
        }
    }

    /// Whether this prediction crosses the given alert-worthy threshold
    pub fn is_alert_worthy(&self, threshold: f64) -> bool {
        self.probability_failure >= threshold
    }

    /// One-line operator summary
    pub fn summary(&self) -> String {
        format!(
            "Model predicts {:.1}% chance of failure within {}. Monitor closely.",
            self.probability_failure * 100.0,
            self.timeframe
        )
    }
}
