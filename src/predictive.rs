// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Prediction cycle orchestration
//!
//! Two independently scheduled loops share the telemetry store and nothing
//! else:
//!
//! - the **refresh** loop advances every unit's metrics, re-derives its
//!   status, appends a history sample and recomputes its alerts;
//! - the **prediction** loop scores every unit with the persisted
//!   classifier, keeps predictions at or above the alert threshold and
//!   replaces the stored prediction set in one write.
//!
//! A reader may see a unit whose status is newer than its prediction. That
//! staleness window is bounded by the prediction interval.
//!
//! Remote explanations within one prediction cycle share a budget of
//! [`EXPLANATION_BUDGET`] of the tick timeout. Units scored after it runs
//! out get the local template, so a hanging service cannot keep a cycle
//! from persisting its predictions.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use upsmonlib::alerts::AlertSynthesizer;
//! use upsmonlib::explain::Explainer;
//! use upsmonlib::predictive::{MonitorConfig, PredictiveMonitor};
//! use upsmonlib::store::MemoryStore;
//!
//! # async fn demo() -> upsmonlib::Result<()> {
//! let monitor = PredictiveMonitor::new(
//!     Arc::new(MemoryStore::new()),
//!     AlertSynthesizer::new(Explainer::local_only()),
//!     MonitorConfig::default(),
//! );
//! let report = monitor.run_prediction_cycle().await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertSynthesizer;
use crate::classifier::EnsembleClassifier;
use crate::error::{EngineError, Result};
use crate::features::{derive_features, history_risk_score};
use crate::fleet::{FleetHealthReport, HistorySample, Unit, UnitMetrics, UnitUpdate};
use crate::prediction::{Prediction, DEFAULT_ALERT_THRESHOLD};
use crate::simulator;
use crate::store::TelemetryStore;

/// Fraction of the prediction interval that must elapse before the gate reopens
const GATE_FRACTION: f64 = 0.95;

/// Share of the tick timeout a prediction cycle may spend on remote
/// explanations before the remaining units use the local template
pub const EXPLANATION_BUDGET: f64 = 0.5;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub refresh_interval: Duration,
    pub prediction_interval: Duration,
    /// Upper bound on a single tick of either loop
    pub tick_timeout: Duration,
    /// Number of recent history samples fed to the feature deriver
    pub history_window: usize,
    /// Minimum failure probability for a prediction to be persisted
    pub alert_threshold: f64,
    pub model_path: PathBuf,
    /// Where to write the fleet health report after each cycle
    pub health_report_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            prediction_interval: Duration::from_secs(900),
            tick_timeout: Duration::from_secs(300),
            history_window: 20,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            model_path: PathBuf::from("models/ups_failure_model.bin"),
            health_report_path: None,
        }
    }
}

/// Why a prediction cycle did not score anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ModelNotLoaded(String),
    NoUnits,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ModelNotLoaded(why) => write!(f, "model not loaded ({})", why),
            SkipReason::NoUnits => write!(f, "no units"),
        }
    }
}

/// Outcome of one prediction cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub units_scored: usize,
    /// Predictions written by this cycle (at or above the alert threshold)
    pub predictions: Vec<Prediction>,
    /// Units whose scoring failed, with the reason
    pub failures: Vec<(String, String)>,
    /// Set when the cycle returned without touching stored predictions
    pub skipped: Option<SkipReason>,
    pub health: Option<FleetHealthReport>,
    pub duration: Duration,
}

impl CycleReport {
    fn skipped(started_at: DateTime<Utc>, clock: Instant, reason: SkipReason) -> Self {
        Self {
            started_at,
            units_scored: 0,
            predictions: Vec::new(),
            failures: Vec::new(),
            skipped: Some(reason),
            health: None,
            duration: clock.elapsed(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.skipped {
            return write!(f, "prediction cycle skipped: {}", reason);
        }
        write!(
            f,
            "prediction cycle: {} units scored, {} predictions, {} failures in {:.2?}",
            self.units_scored,
            self.predictions.len(),
            self.failures.len(),
            self.duration
        )
    }
}

/// Outcome of one refresh tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub units_updated: usize,
    pub status_changes: usize,
    pub failures: usize,
}

/// Refresh and prediction loops over a shared store
pub struct PredictiveMonitor {
    store: Arc<dyn TelemetryStore>,
    synthesizer: AlertSynthesizer,
    config: MonitorConfig,
    rng: Mutex<StdRng>,
    last_prediction: Mutex<Option<Instant>>,
}

impl PredictiveMonitor {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        synthesizer: AlertSynthesizer,
        config: MonitorConfig,
    ) -> Self {
        Self::with_rng(store, synthesizer, config, StdRng::from_rng(&mut rand::rng()))
    }

    /// Monitor whose telemetry walk is reproducible
    pub fn with_seed(
        store: Arc<dyn TelemetryStore>,
        synthesizer: AlertSynthesizer,
        config: MonitorConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(store, synthesizer, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        store: Arc<dyn TelemetryStore>,
        synthesizer: AlertSynthesizer,
        config: MonitorConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            synthesizer,
            config,
            rng: Mutex::new(rng),
            last_prediction: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.store
    }

    /// Advance every unit by one telemetry step
    ///
    /// Store outages abort the tick; any other per-unit error is logged and
    /// the remaining units are still refreshed.
    pub async fn refresh_tick(&self) -> Result<RefreshReport> {
        let units = self.store.get_all_units().await?;
        let latest: HashMap<String, Prediction> = self
            .store
            .get_latest_predictions()
            .await?
            .into_iter()
            .map(|p| (p.unit_id.clone(), p))
            .collect();
        let at = Utc::now();
        let mut report = RefreshReport::default();

        for unit in &units {
            let next = {
                let mut rng = self.rng.lock().await;
                simulator::next_metrics(&unit.metrics, &mut *rng)
            };
            match self.refresh_unit(unit, next, latest.get(&unit.id), at).await {
                Ok(changed) => {
                    report.units_updated += 1;
                    if changed {
                        report.status_changes += 1;
                    }
                }
                Err(e) if e.aborts_tick() => return Err(e),
                Err(e) => {
                    log::warn!("Refresh failed for {}: {}", unit.id, e);
                    report.failures += 1;
                }
            }
        }

        log::debug!(
            "Refresh tick: {} updated, {} status changes, {} failures",
            report.units_updated,
            report.status_changes,
            report.failures
        );
        Ok(report)
    }

    async fn refresh_unit(
        &self,
        unit: &Unit,
        next: UnitMetrics,
        prediction: Option<&Prediction>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let window = self.config.history_window.max(1);
        let mut updated = unit.clone();
        updated.metrics = next;
        updated.last_update = at;

        let mut recent = self.store.get_recent_history(&unit.id, window - 1).await?;
        recent.insert(0, HistorySample::of(&updated));
        let risk = history_risk_score(&recent);

        let update = UnitUpdate::derive(next, risk, at);
        updated.apply(&update);

        self.store.append_history(&HistorySample::of(&updated)).await?;
        self.store.update_unit(&unit.id, &update).await?;

        let alerts = self.synthesizer.synthesize(&updated, prediction, at);
        self.store.set_alerts(&unit.id, alerts).await?;

        let changed = updated.status != unit.status;
        if changed {
            log::info!(
                "{} status {} -> {} (risk {:.2})",
                unit.id,
                unit.status,
                updated.status,
                risk
            );
        }
        Ok(changed)
    }

    /// Run a prediction cycle unless one completed within the prediction
    /// interval
    ///
    /// Returns `None` when gated. The gate only closes once a cycle returns
    /// `Ok`; an aborted or timed-out cycle is retried on the next tick.
    pub async fn prediction_tick(&self) -> Result<Option<CycleReport>> {
        let mut last = self.last_prediction.lock().await;
        let gate = self.config.prediction_interval.mul_f64(GATE_FRACTION);
        if let Some(t) = *last {
            if t.elapsed() < gate {
                log::debug!("Prediction cycle gated ({:.0?} since last run)", t.elapsed());
                return Ok(None);
            }
        }
        let started = Instant::now();
        let report = self.run_prediction_cycle().await?;
        *last = Some(started);
        Ok(Some(report))
    }

    /// Score every unit and replace the stored prediction set
    ///
    /// A missing model or an empty fleet leaves stored predictions untouched.
    pub async fn run_prediction_cycle(&self) -> Result<CycleReport> {
        let clock = Instant::now();
        let started_at = Utc::now();

        let model = match self.load_model().await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Skipping prediction cycle: {}", e);
                return Ok(CycleReport::skipped(
                    started_at,
                    clock,
                    SkipReason::ModelNotLoaded(e.to_string()),
                ));
            }
        };

        let units = self.store.get_all_units().await?;
        if units.is_empty() {
            log::info!("Skipping prediction cycle: no units");
            return Ok(CycleReport::skipped(started_at, clock, SkipReason::NoUnits));
        }

        let explain_deadline = clock + self.config.tick_timeout.mul_f64(EXPLANATION_BUDGET);
        let mut predictions = Vec::new();
        let mut failures = Vec::new();
        for unit in &units {
            match self.score_unit(&model, unit, started_at, explain_deadline).await {
                Ok(Some(p)) => {
                    log::info!("{}: {}", unit.id, p.summary());
                    predictions.push(p);
                }
                Ok(None) => {}
                Err(e) if e.aborts_tick() => return Err(e),
                Err(e) => {
                    log::warn!("Prediction failed for {}: {}", unit.id, e);
                    failures.push((unit.id.clone(), e.to_string()));
                }
            }
        }

        self.store.replace_predictions(predictions.clone()).await?;

        let by_unit: HashMap<&str, &Prediction> =
            predictions.iter().map(|p| (p.unit_id.as_str(), p)).collect();
        for unit in &units {
            let alerts = self
                .synthesizer
                .synthesize(unit, by_unit.get(unit.id.as_str()).copied(), started_at);
            if let Err(e) = self.store.set_alerts(&unit.id, alerts).await {
                if e.aborts_tick() {
                    return Err(e);
                }
                log::warn!("Could not store alerts for {}: {}", unit.id, e);
            }
        }

        let health = FleetHealthReport::build(&units, &predictions);
        log::info!(
            "Fleet health: {} units ({} healthy, {} risky, {} warning, {} failed), {} predictions, {} high risk, avg confidence {:.2}",
            health.total_units,
            health.healthy_count,
            health.risky_count,
            health.warning_count,
            health.failed_count,
            health.total_predictions,
            health.high_risk_count,
            health.average_confidence
        );
        self.write_health_report(&health).await;

        let report = CycleReport {
            started_at,
            units_scored: units.len() - failures.len(),
            predictions,
            failures,
            skipped: None,
            health: Some(health),
            duration: clock.elapsed(),
        };
        log::info!("{}", report);
        Ok(report)
    }

    async fn load_model(&self) -> Result<EnsembleClassifier> {
        let path = self.config.model_path.clone();
        tokio::task::spawn_blocking(move || EnsembleClassifier::load(path))
            .await
            .map_err(|e| EngineError::ModelNotLoaded(format!("loader task failed: {}", e)))?
    }

    async fn score_unit(
        &self,
        model: &EnsembleClassifier,
        unit: &Unit,
        at: DateTime<Utc>,
        explain_deadline: Instant,
    ) -> Result<Option<Prediction>> {
        let history = self
            .store
            .get_recent_history(&unit.id, self.config.history_window)
            .await?;
        let features = derive_features(unit, &history);
        features.ensure_finite(&unit.id)?;

        let probabilities = model.predict_probability(&features);
        let mut prediction =
            Prediction::new(unit, &features, model.predict(&features), &probabilities, at);
        if !prediction.is_alert_worthy(self.config.alert_threshold) {
            return Ok(None);
        }

        self.synthesizer
            .explain(unit, &mut prediction, explain_deadline)
            .await;
        Ok(Some(prediction))
    }

    async fn write_health_report(&self, report: &FleetHealthReport) {
        let Some(path) = &self.config.health_report_path else {
            return;
        };
        let result = async {
            let body = serde_json::to_vec_pretty(report)?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, body).await?;
            tokio::fs::rename(&tmp, path).await?;
            Ok::<_, EngineError>(())
        }
        .await;
        if let Err(e) = result {
            log::warn!("Could not write health report to {}: {}", path.display(), e);
        }
    }

    /// Run both loops until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!(
            "Monitor started: refresh every {:?}, predictions every {:?}",
            self.config.refresh_interval,
            self.config.prediction_interval
        );
        tokio::join!(self.refresh_loop(cancel.clone()), self.prediction_loop(cancel));
        log::info!("Monitor stopped");
    }

    async fn refresh_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Refresh loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    match tokio::time::timeout(self.config.tick_timeout, self.refresh_tick()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => log::error!("Refresh tick aborted: {}", e),
                        Err(_) => log::warn!(
                            "Refresh tick exceeded {:?}; continuing at next tick",
                            self.config.tick_timeout
                        ),
                    }
                }
            }
        }
    }

    async fn prediction_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.prediction_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Prediction loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    match tokio::time::timeout(self.config.tick_timeout, self.prediction_tick()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => log::error!("Prediction tick aborted: {}", e),
                        Err(_) => log::warn!(
                            "Prediction tick exceeded {:?}; continuing at next tick",
                            self.config.tick_timeout
                        ),
                    }
                }
            }
        }
    }
}
