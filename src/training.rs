//! Training pipeline
//!
//! Builds labelled feature sets from stored history (or from synthetic
//! scenarios when no history exists yet), splits them per class, fits an
//! [`EnsembleClassifier`] and reports hold-out metrics.

use std::path::Path;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::classifier::evaluate::Evaluation;
use crate::classifier::{ClassLabel, EnsembleClassifier, EnsembleConfig};
use crate::error::{EngineError, Result};
use crate::features::{history_risk_score, FeatureVector};
use crate::fleet::{HistorySample, UnitMetrics};
use crate::status::determine_status;

/// Fraction of each class held out for evaluation
pub const TEST_FRACTION: f64 = 0.2;

/// Seed used for the train/test split
pub const SPLIT_SEED: u64 = 42;

/// Labelled feature rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<ClassLabel>,
}

impl TrainingSet {
    /// One row per history sample, labelled from the recorded status
    pub fn from_history(samples: &[HistorySample]) -> Self {
        let mut set = Self::default();
        for sample in samples {
            let fv = FeatureVector::from_sample(sample);
            if fv.0.iter().any(|v| !v.is_finite()) {
                log::debug!(
                    "Skipping non-finite history sample for {} at {}",
                    sample.unit_id,
                    sample.timestamp
                );
                continue;
            }
            set.push(fv, ClassLabel::from(sample.status));
        }
        set
    }

    pub fn push(&mut self, features: FeatureVector, label: ClassLabel) {
        self.features.push(features);
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Rows per class, indexed by [`ClassLabel::index`]
    pub fn class_counts(&self) -> [usize; ClassLabel::COUNT] {
        let mut counts = [0; ClassLabel::COUNT];
        for label in &self.labels {
            counts[label.index()] += 1;
        }
        counts
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            features: indices.iter().map(|&i| self.features[i]).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Per-class shuffled split; each class keeps `floor(n × (1 − test_fraction))` rows for training
    pub fn stratified_split(&self, test_fraction: f64, seed: u64) -> (Self, Self) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut test = Vec::new();

        for label in ClassLabel::ALL {
            let mut idx: Vec<usize> = self
                .labels
                .iter()
                .enumerate()
                .filter(|(_, l)| **l == label)
                .map(|(i, _)| i)
                .collect();
            idx.shuffle(&mut rng);
            let split = (idx.len() as f64 * (1.0 - test_fraction.clamp(0.0, 1.0))) as usize;
            train.extend_from_slice(&idx[..split]);
            test.extend_from_slice(&idx[split..]);
        }

        (self.subset(&train), self.subset(&test))
    }
}

struct Scenario {
    battery: (f64, f64),
    temperature: (f64, f64),
    efficiency: (f64, f64),
    load: (f64, f64),
}

const SCENARIOS: [Scenario; 6] = [
    Scenario { battery: (80.0, 100.0), temperature: (20.0, 35.0), efficiency: (90.0, 98.0), load: (30.0, 60.0) },
    Scenario { battery: (70.0, 85.0), temperature: (25.0, 40.0), efficiency: (85.0, 95.0), load: (40.0, 70.0) },
    Scenario { battery: (15.0, 25.0), temperature: (35.0, 45.0), efficiency: (80.0, 90.0), load: (70.0, 85.0) },
    Scenario { battery: (20.0, 30.0), temperature: (40.0, 50.0), efficiency: (75.0, 85.0), load: (75.0, 90.0) },
    Scenario { battery: (5.0, 15.0), temperature: (45.0, 55.0), efficiency: (70.0, 80.0), load: (85.0, 100.0) },
    Scenario { battery: (0.0, 10.0), temperature: (50.0, 60.0), efficiency: (65.0, 75.0), load: (90.0, 100.0) },
];

/// Labelled rows cycled across healthy, degraded and failed scenarios
///
/// Labels come from [`determine_status`], so the model learns the same
/// boundaries the refresh loop applies. Electrical readings stay at their
/// nominal values.
pub fn synthetic_training_set(n: usize, seed: u64) -> TrainingSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut set = TrainingSet::default();

    for i in 0..n {
        let s = &SCENARIOS[i % SCENARIOS.len()];
        let mut draw = |(lo, hi): (f64, f64), jitter: f64, min: f64, max: f64| {
            (rng.random_range(lo..=hi) + rng.random_range(-jitter..=jitter)).clamp(min, max)
        };
        let battery_level = draw(s.battery, 5.0, 0.0, 100.0);
        let temperature = draw(s.temperature, 3.0, 15.0, 60.0);
        let efficiency = draw(s.efficiency, 2.0, 60.0, 100.0);
        let load = draw(s.load, 3.0, 0.0, 100.0);
        let nominal = UnitMetrics::default();
        let metrics = UnitMetrics {
            battery_level,
            temperature,
            efficiency,
            load,
            power_output: nominal.power_input * efficiency / 100.0,
            ..nominal
        };

        let sample = HistorySample {
            unit_id: format!("SYN-{:04}", i),
            timestamp: Utc::now(),
            status: Default::default(),
            capacity: 2000.0,
            critical_load: 500.0,
            failure_risk: 0.0,
            metrics,
        };
        let risk = history_risk_score(std::slice::from_ref(&sample));
        let status = determine_status(&metrics, risk);
        set.push(
            FeatureVector::from_parts(&metrics, sample.capacity, sample.critical_load, risk),
            ClassLabel::from(status),
        );
    }
    set
}

/// Outcome of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub class_counts: [usize; ClassLabel::COUNT],
    /// Hold-out metrics; absent when no rows were held out
    pub evaluation: Option<Evaluation>,
}

/// Split, fit, evaluate and persist a classifier
pub fn train_and_save<P: AsRef<Path>>(
    set: &TrainingSet,
    config: EnsembleConfig,
    model_path: P,
) -> Result<(EnsembleClassifier, TrainingReport)> {
    if set.is_empty() {
        return Err(EngineError::Training("training set is empty".into()));
    }

    let counts = set.class_counts();
    log::info!(
        "Training on {} samples (healthy={}, degraded={}, failed={})",
        set.len(),
        counts[0],
        counts[1],
        counts[2]
    );

    let (train, test) = set.stratified_split(TEST_FRACTION, SPLIT_SEED);
    let model = EnsembleClassifier::fit(&train.features, &train.labels, config)?;

    let evaluation = if test.is_empty() {
        log::warn!("No rows held out; skipping evaluation");
        None
    } else {
        let predicted: Vec<ClassLabel> = test.features.iter().map(|f| model.predict(f)).collect();
        let eval = Evaluation::compute(&test.labels, &predicted);
        log::info!("Hold-out evaluation:\n{}", eval);
        Some(eval)
    };

    model.save(model_path)?;

    let report = TrainingReport {
        samples: set.len(),
        train_size: train.len(),
        test_size: test.len(),
        class_counts: counts,
        evaluation,
    };
    Ok((model, report))
}
