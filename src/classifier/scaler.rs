//! Per-feature standardisation (zero mean, unit variance)

use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::stats;

/// Standard scaler fitted on a training matrix
///
/// Zero-variance features get a scale of 1 so they pass through centred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

impl Default for StandardScaler {
    fn default() -> Self {
        Self {
            mean: [0.0; FEATURE_COUNT],
            scale: [1.0; FEATURE_COUNT],
        }
    }
}

impl StandardScaler {
    /// Fit mean and population std-dev per column
    pub fn fit(rows: &[FeatureVector]) -> Self {
        let mut scaler = Self::default();
        if rows.is_empty() {
            return scaler;
        }
        for col in 0..FEATURE_COUNT {
            let column: Vec<f64> = rows.iter().map(|r| r.0[col]).collect();
            scaler.mean[col] = stats::mean(&column);
            let sd = stats::std_dev(&column);
            scaler.scale[col] = if sd > 0.0 && sd.is_finite() { sd } else { 1.0 };
        }
        scaler
    }

    /// Standardise one vector
    pub fn transform(&self, row: &FeatureVector) -> [f64; FEATURE_COUNT] {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, v) in out.iter_mut().enumerate() {
            *v = (row.0[i] - self.mean[i]) / self.scale[i];
        }
        out
    }

    pub fn mean(&self) -> &[f64; FEATURE_COUNT] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64; FEATURE_COUNT] {
        &self.scale
    }
}
