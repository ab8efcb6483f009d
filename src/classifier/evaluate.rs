//! Hold-out evaluation metrics

use serde::{Deserialize, Serialize};

use super::ClassLabel;

/// Precision / recall / F1 for one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: ClassLabel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Evaluation of predictions against ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy: f64,
    /// `confusion[true][predicted]`
    pub confusion: [[usize; ClassLabel::COUNT]; ClassLabel::COUNT],
    pub per_class: Vec<ClassMetrics>,
}

impl Evaluation {
    pub fn compute(truth: &[ClassLabel], predicted: &[ClassLabel]) -> Self {
        let mut confusion = [[0usize; ClassLabel::COUNT]; ClassLabel::COUNT];
        for (t, p) in truth.iter().zip(predicted) {
            confusion[t.index()][p.index()] += 1;
        }

        let n = truth.len().min(predicted.len());
        let correct: usize = (0..ClassLabel::COUNT).map(|i| confusion[i][i]).sum();
        let accuracy = if n == 0 { 0.0 } else { correct as f64 / n as f64 };

        let per_class = ClassLabel::ALL
            .iter()
            .map(|&label| {
                let i = label.index();
                let tp = confusion[i][i] as f64;
                let fp: f64 = (0..ClassLabel::COUNT).filter(|&r| r != i).map(|r| confusion[r][i] as f64).sum();
                let fn_: f64 = (0..ClassLabel::COUNT).filter(|&c| c != i).map(|c| confusion[i][c] as f64).sum();
                let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
                let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label,
                    precision,
                    recall,
                    f1,
                    support: confusion[i].iter().sum(),
                }
            })
            .collect();

        Self {
            accuracy,
            confusion,
            per_class,
        }
    }
}

impl std::fmt::Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Accuracy: {:.4}", self.accuracy)?;
        writeln!(f, "{:<10} {:>9} {:>9} {:>9} {:>8}", "class", "precision", "recall", "f1", "support")?;
        for m in &self.per_class {
            writeln!(
                f,
                "{:<10} {:>9.4} {:>9.4} {:>9.4} {:>8}",
                m.label.to_string(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            )?;
        }
        write!(f, "Confusion (rows=true, cols=predicted): {:?}", self.confusion)
    }
}
