// SPDX-License-Identifier: AGPL-3.0-or-later
//! Benchmark for per-unit scoring.
//!
//! Measures status determination, feature derivation over a full history
//! window and ensemble inference, the work a prediction cycle repeats for
//! every unit.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use upsmonlib::classifier::{EnsembleClassifier, EnsembleConfig};
use upsmonlib::features::derive_features;
use upsmonlib::fleet::{HistorySample, Unit, UnitMetrics};
use upsmonlib::status::determine_status;
use upsmonlib::training::synthetic_training_set;

fn degraded_unit() -> Unit {
    Unit::new(
        "UPS-01",
        "UPS-01",
        "Datacenter-1",
        2000.0,
        500.0,
        UnitMetrics {
            battery_level: 30.0,
            temperature: 33.0,
            load: 78.0,
            efficiency: 88.0,
            ..Default::default()
        },
    )
}

fn bench_determine_status(c: &mut Criterion) {
    let unit = degraded_unit();
    c.bench_function("determine_status", |b| {
        b.iter(|| determine_status(black_box(&unit.metrics), black_box(0.35)));
    });
}

fn bench_derive_features(c: &mut Criterion) {
    let unit = degraded_unit();
    let history: Vec<HistorySample> = (0..20)
        .map(|i| {
            let mut s = HistorySample::of(&unit);
            s.timestamp = Utc::now() - chrono::Duration::minutes(i);
            s.metrics.battery_level += i as f64;
            s
        })
        .collect();
    c.bench_function("derive_features_window_20", |b| {
        b.iter(|| derive_features(black_box(&unit), black_box(&history)));
    });
}

fn bench_predict_probability(c: &mut Criterion) {
    let set = synthetic_training_set(600, 42);
    let model = EnsembleClassifier::fit(&set.features, &set.labels, EnsembleConfig::default())
        .expect("training on synthetic data");
    let bagged = EnsembleClassifier::fit(
        &set.features,
        &set.labels,
        EnsembleConfig {
            bootstrap: true,
            ..Default::default()
        },
    )
    .expect("training on synthetic data");
    let features = derive_features(&degraded_unit(), &[]);

    c.bench_function("predict_probability_100_trees", |b| {
        b.iter(|| model.predict_probability(black_box(&features)));
    });
    c.bench_function("predict_probability_100_bagged_trees", |b| {
        b.iter(|| bagged.predict_probability(black_box(&features)));
    });
}

criterion_group!(
    benches,
    bench_determine_status,
    bench_derive_features,
    bench_predict_probability
);
criterion_main!(benches);
