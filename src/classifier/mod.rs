// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Ensemble failure classifier
//!
//! A vote-counting ensemble of median-split decision trees over standardised
//! feature vectors. Class probabilities are the fraction of trees voting
//! for each class.
//!
//! By default every tree is grown from the full training set with all
//! features available, so the trees are identical and the ensemble behaves
//! as a single tree whose probabilities are always 0 or 1. Setting
//! [`EnsembleConfig::bootstrap`] enables bagging (row resampling with
//! replacement) and √d feature subsampling per node, seeded for
//! reproducibility.
//!
//! # Examples
//!
//! ```no_run
//! use upsmonlib::classifier::EnsembleClassifier;
//!
//! match EnsembleClassifier::load("models/ups_classifier.bin") {
//!     Ok(model) => println!("{} trees", model.n_trees()),
//!     Err(e) => eprintln!("skipping cycle: {}", e),
//! }
//! ```

pub mod evaluate;
pub mod scaler;
pub mod tree;

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::fleet::UnitStatus;

pub use scaler::StandardScaler;
pub use tree::{DecisionTree, TreeParams};

/// Magic bytes identifying a classifier artefact
const MAGIC_BYTES: &[u8; 8] = b"UPSMODL\0";

/// Current artefact format version
const MODEL_VERSION: u32 = 1;

/// Health class predicted by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassLabel {
    Healthy,
    Degraded,
    Failed,
}

impl ClassLabel {
    pub const COUNT: usize = 3;
    pub const ALL: [ClassLabel; 3] = [Self::Healthy, Self::Degraded, Self::Failed];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Self {
        match i {
            0 => Self::Healthy,
            1 => Self::Degraded,
            _ => Self::Failed,
        }
    }
}

impl From<UnitStatus> for ClassLabel {
    fn from(status: UnitStatus) -> Self {
        match status {
            UnitStatus::Healthy => Self::Healthy,
            UnitStatus::Risky | UnitStatus::Warning => Self::Degraded,
            UnitStatus::Failed => Self::Failed,
        }
    }
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-class vote fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub healthy: f64,
    pub degraded: f64,
    pub failed: f64,
}

impl ClassProbabilities {
    fn from_votes(votes: &[usize; ClassLabel::COUNT]) -> Self {
        let total = votes.iter().sum::<usize>().max(1) as f64;
        Self {
            healthy: votes[0] as f64 / total,
            degraded: votes[1] as f64 / total,
            failed: votes[2] as f64 / total,
        }
    }

    pub fn get(&self, label: ClassLabel) -> f64 {
        match label {
            ClassLabel::Healthy => self.healthy,
            ClassLabel::Degraded => self.degraded,
            ClassLabel::Failed => self.failed,
        }
    }

    /// Probability of any non-healthy outcome, in `[0, 1]`
    pub fn failure(&self) -> f64 {
        (1.0 - self.healthy).clamp(0.0, 1.0)
    }

    /// Largest class probability
    pub fn confidence(&self) -> f64 {
        self.healthy.max(self.degraded).max(self.failed)
    }
}

/// Ensemble hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub n_estimators: usize,
    pub tree: TreeParams,
    /// Bagging with √d feature subsampling
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams::default(),
            bootstrap: false,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelHeader {
    magic: [u8; 8],
    version: u32,
}

impl Default for ModelHeader {
    fn default() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: MODEL_VERSION,
        }
    }
}

/// Trained ensemble plus the scaler it was trained behind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleClassifier {
    config: EnsembleConfig,
    scaler: StandardScaler,
    trees: Vec<DecisionTree>,
    trained_at: DateTime<Utc>,
    training_samples: usize,
}

impl EnsembleClassifier {
    /// Fit a new ensemble
    pub fn fit(
        features: &[FeatureVector],
        labels: &[ClassLabel],
        config: EnsembleConfig,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(EngineError::Training("no training samples".into()));
        }
        if features.len() != labels.len() {
            return Err(EngineError::Training(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        if config.n_estimators == 0 {
            return Err(EngineError::Training("n_estimators must be at least 1".into()));
        }
        if let Some(i) = features.iter().position(|f| f.0.iter().any(|v| !v.is_finite())) {
            return Err(EngineError::Training(format!("non-finite value in row {}", i)));
        }

        let scaler = StandardScaler::fit(features);
        let rows: Vec<[f64; FEATURE_COUNT]> = features.iter().map(|f| scaler.transform(f)).collect();
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = if config.bootstrap {
            let params = TreeParams {
                max_features: Some((FEATURE_COUNT as f64).sqrt().round() as usize),
                ..config.tree
            };
            (0..config.n_estimators)
                .map(|_| {
                    let picks: Vec<usize> =
                        (0..rows.len()).map(|_| rng.random_range(0..rows.len())).collect();
                    let sample_rows: Vec<_> = picks.iter().map(|&i| rows[i]).collect();
                    let sample_labels: Vec<_> = picks.iter().map(|&i| labels[i]).collect();
                    DecisionTree::fit(&sample_rows, &sample_labels, &params, &mut rng)
                })
                .collect()
        } else {
            // every tree would see identical input
            let tree = DecisionTree::fit(&rows, labels, &config.tree, &mut rng);
            vec![tree; config.n_estimators]
        };

        log::info!(
            "Trained ensemble: {} trees over {} samples (bootstrap={})",
            config.n_estimators,
            features.len(),
            config.bootstrap
        );

        Ok(Self {
            config,
            scaler,
            trees,
            trained_at: Utc::now(),
            training_samples: features.len(),
        })
    }

    fn votes(&self, features: &FeatureVector) -> [usize; ClassLabel::COUNT] {
        let row = self.scaler.transform(features);
        let mut votes = [0usize; ClassLabel::COUNT];
        for tree in &self.trees {
            votes[tree.predict(&row).index()] += 1;
        }
        votes
    }

    /// Majority-vote class; ties go to the more severe class
    pub fn predict(&self, features: &FeatureVector) -> ClassLabel {
        let votes = self.votes(features);
        let mut best = 0;
        for (i, v) in votes.iter().enumerate() {
            if *v >= votes[best] {
                best = i;
            }
        }
        ClassLabel::from_index(best)
    }

    /// Fraction of trees voting for each class
    pub fn predict_probability(&self, features: &FeatureVector) -> ClassProbabilities {
        ClassProbabilities::from_votes(&self.votes(features))
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn training_samples(&self) -> usize {
        self.training_samples
    }

    /// Write the model atomically (temp file + rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut bytes = bincode::serialize(&ModelHeader::default())
            .map_err(|e| EngineError::Training(format!("Failed to serialize header: {}", e)))?;
        let body = bincode::serialize(self)
            .map_err(|e| EngineError::Training(format!("Failed to serialize model: {}", e)))?;
        bytes.extend_from_slice(&body);

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        log::info!("Saved classifier to {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Load a model, failing with `ModelNotLoaded` if absent or corrupt
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            EngineError::ModelNotLoaded(format!("{}: {}", path.display(), e))
        })?;

        let header_len = bincode::serialized_size(&ModelHeader::default())
            .map_err(|e| EngineError::ModelNotLoaded(e.to_string()))? as usize;
        if bytes.len() < header_len {
            return Err(EngineError::ModelNotLoaded(format!(
                "{}: truncated artefact",
                path.display()
            )));
        }

        let header: ModelHeader = bincode::deserialize(&bytes[..header_len]).map_err(|e| {
            EngineError::ModelNotLoaded(format!("Invalid model header: {}", e))
        })?;
        if &header.magic != MAGIC_BYTES {
            return Err(EngineError::ModelNotLoaded(
                "Invalid model file (magic bytes mismatch)".to_string(),
            ));
        }
        if header.version > MODEL_VERSION {
            return Err(EngineError::ModelNotLoaded(format!(
                "Model version {} is newer than supported version {}",
                header.version, MODEL_VERSION
            )));
        }

        let model: Self = bincode::deserialize(&bytes[header_len..])
            .map_err(|e| EngineError::ModelNotLoaded(format!("Corrupt model body: {}", e)))?;
        if model.trees.is_empty() {
            return Err(EngineError::ModelNotLoaded("model has no trees".into()));
        }

        log::debug!(
            "Loaded classifier from {} ({} trees, trained {})",
            path.display(),
            model.trees.len(),
            model.trained_at
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::UnitMetrics;

    fn vector(battery: f64, temperature: f64) -> FeatureVector {
        let m = UnitMetrics {
            battery_level: battery,
            temperature,
            ..Default::default()
        };
        FeatureVector::from_parts(&m, 2000.0, 500.0, 0.0)
    }

    fn toy_set() -> (Vec<FeatureVector>, Vec<ClassLabel>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..10 {
            x.push(vector(90.0 + i as f64 * 0.5, 22.0 + i as f64 * 0.1));
            y.push(ClassLabel::Healthy);
            x.push(vector(10.0 + i as f64 * 0.5, 48.0 + i as f64 * 0.1));
            y.push(ClassLabel::Failed);
        }
        (x, y)
    }

    #[test]
    fn test_label_from_status() {
        assert_eq!(ClassLabel::from(UnitStatus::Healthy), ClassLabel::Healthy);
        assert_eq!(ClassLabel::from(UnitStatus::Risky), ClassLabel::Degraded);
        assert_eq!(ClassLabel::from(UnitStatus::Warning), ClassLabel::Degraded);
        assert_eq!(ClassLabel::from(UnitStatus::Failed), ClassLabel::Failed);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        assert!(EnsembleClassifier::fit(&[], &[], EnsembleConfig::default()).is_err());
        let (x, _) = toy_set();
        assert!(EnsembleClassifier::fit(&x, &[ClassLabel::Healthy], EnsembleConfig::default()).is_err());
    }

    #[test]
    fn test_separable_classes() {
        let (x, y) = toy_set();
        let model = EnsembleClassifier::fit(&x, &y, EnsembleConfig::default()).unwrap();
        assert_eq!(model.n_trees(), 100);
        assert_eq!(model.predict(&vector(95.0, 23.0)), ClassLabel::Healthy);
        assert_eq!(model.predict(&vector(5.0, 50.0)), ClassLabel::Failed);

        let p = model.predict_probability(&vector(5.0, 50.0));
        assert_eq!(p.failure(), 1.0);
        assert_eq!(p.confidence(), 1.0);
        let sum = p.healthy + p.degraded + p.failed;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inference_is_deterministic() {
        let (x, y) = toy_set();
        let model = EnsembleClassifier::fit(&x, &y, EnsembleConfig::default()).unwrap();
        let probe = vector(50.0, 35.0);
        let first = model.predict_probability(&probe);
        for _ in 0..10 {
            assert_eq!(model.predict_probability(&probe), first);
        }
    }

    #[test]
    fn test_bootstrap_is_seeded() {
        let (x, y) = toy_set();
        let config = EnsembleConfig {
            n_estimators: 15,
            bootstrap: true,
            ..Default::default()
        };
        let a = EnsembleClassifier::fit(&x, &y, config).unwrap();
        let b = EnsembleClassifier::fit(&x, &y, config).unwrap();
        let probe = vector(40.0, 36.0);
        assert_eq!(a.predict_probability(&probe), b.predict_probability(&probe));
        assert_eq!(a.n_trees(), 15);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("m.bin");
        let (x, y) = toy_set();
        let model = EnsembleClassifier::fit(&x, &y, EnsembleConfig::default()).unwrap();
        model.save(&path).unwrap();
        let loaded = EnsembleClassifier::load(&path).unwrap();
        let probe = vector(12.0, 47.0);
        assert_eq!(loaded.predict_probability(&probe), model.predict_probability(&probe));
        assert_eq!(loaded.training_samples(), 20);
    }

    #[test]
    fn test_load_missing_is_model_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let err = EnsembleClassifier::load(dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, EngineError::ModelNotLoaded(_)));
    }

    #[test]
    fn test_load_corrupt_is_model_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        fs::write(&path, b"not a model at all, just some bytes").unwrap();
        assert!(matches!(
            EnsembleClassifier::load(&path).unwrap_err(),
            EngineError::ModelNotLoaded(_)
        ));

        let mut bytes = bincode::serialize(&ModelHeader::default()).unwrap();
        bytes.extend_from_slice(&[0xff, 0x01, 0x02]);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            EnsembleClassifier::load(&path).unwrap_err(),
            EngineError::ModelNotLoaded(_)
        ));
    }
}
