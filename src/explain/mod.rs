// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Human-readable failure explanations
//!
//! The [`Explainer`] asks a remote generative text service (any
//! [`ExplanationAdapter`]) for bullet-point failure reasons. Each attempt
//! runs under a hard timeout; failed or empty attempts are retried with
//! exponential backoff, and once the attempts are exhausted the explainer
//! falls back to a deterministic local template. Callers always get a
//! non-empty list and never see an error.

pub mod fallback;
#[cfg(feature = "remote-explainer")]
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{EngineError, Result};
use crate::fleet::{Unit, UnitMetrics};
use crate::prediction::Prediction;

/// Maximum reasons kept from a remote response
pub const MAX_REMOTE_REASONS: usize = 5;

/// Remote text-generation backend
#[async_trait]
pub trait ExplanationAdapter: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Send a prompt, return the raw completion text
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Everything the explanation prompt and fallback are built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRequest {
    pub unit_id: String,
    pub unit_name: String,
    pub probability_failure: f64,
    pub confidence: f64,
    pub capacity: f64,
    pub metrics: UnitMetrics,
}

impl ExplanationRequest {
    pub fn new(unit: &Unit, prediction: &Prediction) -> Self {
        Self {
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            probability_failure: prediction.probability_failure,
            confidence: prediction.confidence,
            capacity: unit.capacity,
            metrics: unit.metrics,
        }
    }
}

/// Explanation service settings (`[explanation]` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplanationSettings {
    /// Use the remote service at all
    pub enabled: bool,
    /// Base URL of the generative endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Hard timeout per attempt (seconds)
    pub request_timeout_secs: u64,
    /// Attempts before falling back
    pub attempts: u32,
    /// Backoff before the second attempt (milliseconds), doubled each retry
    pub initial_backoff_ms: u64,
}

impl Default for ExplanationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            request_timeout_secs: 20,
            attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

/// Retry schedule for remote calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ExplanationSettings::default())
    }
}

impl From<&ExplanationSettings> for RetryPolicy {
    fn from(s: &ExplanationSettings) -> Self {
        Self {
            attempts: s.attempts.max(1),
            initial_backoff: Duration::from_millis(s.initial_backoff_ms),
            call_timeout: Duration::from_secs(s.request_timeout_secs.max(1)),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based): initial × 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(1u32 << attempt.min(16))
    }

    /// Upper bound on the time one explanation can take
    pub fn worst_case(&self) -> Duration {
        let backoffs: Duration = (0..self.attempts.saturating_sub(1)).map(|a| self.backoff(a)).sum();
        self.call_timeout.saturating_mul(self.attempts) + backoffs
    }
}

/// Remote-first explanation generator with local fallback
#[derive(Clone)]
pub struct Explainer {
    adapter: Option<Arc<dyn ExplanationAdapter>>,
    policy: RetryPolicy,
}

impl Explainer {
    pub fn new(adapter: Arc<dyn ExplanationAdapter>, policy: RetryPolicy) -> Self {
        Self {
            adapter: Some(adapter),
            policy,
        }
    }

    /// Explainer that only uses the local template
    pub fn local_only() -> Self {
        Self {
            adapter: None,
            policy: RetryPolicy::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Produce failure reasons; never empty, never fails
    pub async fn explain(&self, request: &ExplanationRequest) -> Vec<String> {
        self.explain_with(request, None).await
    }

    /// Like [`Explainer::explain`], but remote attempts stop at `deadline`
    ///
    /// Past the deadline the local template is used without calling out.
    pub async fn explain_before(&self, request: &ExplanationRequest, deadline: Instant) -> Vec<String> {
        self.explain_with(request, Some(deadline)).await
    }

    async fn explain_with(&self, request: &ExplanationRequest, deadline: Option<Instant>) -> Vec<String> {
        if let Some(adapter) = &self.adapter {
            let remote = self.try_remote(adapter.as_ref(), request);
            let outcome = match deadline {
                Some(d) if Instant::now() >= d => Err(EngineError::ExplanationService(
                    "cycle explanation budget exhausted".into(),
                )),
                Some(d) => tokio::time::timeout_at(d, remote).await.unwrap_or_else(|_| {
                    Err(EngineError::ExplanationService(
                        "cycle explanation budget exhausted".into(),
                    ))
                }),
                None => remote.await,
            };
            match outcome {
                Ok(reasons) => return reasons,
                Err(e) => log::warn!(
                    "Explanation for {} falling back to local template: {}",
                    request.unit_id,
                    e
                ),
            }
        }
        fallback::fallback_reasons(&request.metrics, request.probability_failure)
    }

    async fn try_remote(
        &self,
        adapter: &dyn ExplanationAdapter,
        request: &ExplanationRequest,
    ) -> Result<Vec<String>> {
        let prompt = build_prompt(request);
        let mut last_err = EngineError::ExplanationService("no attempts made".into());

        for attempt in 0..self.policy.attempts {
            let outcome = tokio::time::timeout(self.policy.call_timeout, adapter.generate(&prompt)).await;
            match outcome {
                Ok(Ok(text)) => {
                    let reasons = parse_reasons(&text);
                    if !reasons.is_empty() {
                        log::info!(
                            "Generated {} failure reasons via {} for {} (attempt {})",
                            reasons.len(),
                            adapter.name(),
                            request.unit_id,
                            attempt + 1
                        );
                        return Ok(reasons);
                    }
                    last_err = EngineError::ExplanationService("empty response".into());
                }
                Ok(Err(e)) => last_err = e,
                Err(_) => {
                    last_err = EngineError::ExplanationService(format!(
                        "timed out after {:?}",
                        self.policy.call_timeout
                    ))
                }
            }
            log::warn!(
                "{} attempt {}/{} for {} failed: {}",
                adapter.name(),
                attempt + 1,
                self.policy.attempts,
                request.unit_id,
                last_err
            );
            if attempt + 1 < self.policy.attempts {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }

        Err(last_err)
    }
}

/// Bulleted technical context for the prompt
pub fn build_context(request: &ExplanationRequest) -> String {
    let m = &request.metrics;
    let mut parts = vec![
        format!("• Battery Level: {:.1}%", m.battery_level),
        format!("• Temperature: {:.1}°C", m.temperature),
        format!("• Load: {:.1}%", m.load),
        format!("• Efficiency: {:.1}%", m.efficiency),
        format!("• Power Input: {:.0}W", m.power_input),
        format!("• Power Output: {:.0}W", m.power_output),
        format!("• Input Voltage: {:.1}V", m.voltage_input),
        format!("• Output Voltage: {:.1}V", m.voltage_output),
        format!("• Frequency: {:.1}Hz", m.frequency),
        format!("• Runtime: {:.0} hours", m.uptime),
        format!("• Capacity: {:.0}VA", request.capacity),
    ];

    let balance = m.power_balance();
    let conversion = if m.power_input > 0.0 {
        m.power_output / m.power_input * 100.0
    } else {
        0.0
    };
    parts.push(format!("• Power Balance: {:.0}W", balance));
    parts.push(format!("• Power Efficiency: {:.1}%", conversion));
    if balance.abs() > 50.0 {
        parts.push(format!(
            "• Power Imbalance: {:.0}W difference between input and output",
            balance.abs()
        ));
    }
    if conversion < 85.0 {
        parts.push(format!("• Low Power Efficiency: {:.1}% conversion", conversion));
    }

    if m.load > 90.0 {
        parts.push(format!("• Critical Load: {:.1}% exceeds safe operating limits", m.load));
    } else if m.load > 80.0 {
        parts.push(format!("• High Load: {:.1}% approaching capacity", m.load));
    } else if m.load < 20.0 {
        parts.push(format!("• Low Load: {:.1}%", m.load));
    }

    if m.temperature > 50.0 {
        parts.push(format!("• Critical Temperature: {:.1}°C", m.temperature));
    } else if m.temperature > 45.0 {
        parts.push(format!("• High Temperature: {:.1}°C", m.temperature));
    } else if m.temperature > 40.0 {
        parts.push(format!("• Elevated Temperature: {:.1}°C", m.temperature));
    }

    if m.battery_level < 30.0 {
        parts.push(format!("• Critical Battery: {:.1}%", m.battery_level));
    } else if m.battery_level < 50.0 {
        parts.push(format!("• Low Battery: {:.1}%", m.battery_level));
    } else if m.battery_level < 70.0 {
        parts.push(format!("• Battery Wear: {:.1}%", m.battery_level));
    }

    if m.voltage_delta() > 10.0 {
        parts.push(format!(
            "• Voltage Regulation: {:.1}V input/output difference",
            m.voltage_delta()
        ));
    }

    if request.confidence > 0.0 {
        parts.push(format!("• Model Confidence: {:.1}%", request.confidence * 100.0));
    }

    parts.join("\n")
}

/// Full prompt sent to the remote service
pub fn build_prompt(request: &ExplanationRequest) -> String {
    format!(
        "You are a UPS power systems analyst. Give 4 to 6 specific technical reasons \
         why this unit is at risk of failure, one per line, each starting with a bullet (•). \
         Quote the exact values below, state the likely impact and the recommended action.\n\n\
         Unit: {} ({})\nFailure Probability: {:.1}%\n\nCurrent Metrics:\n{}",
        request.unit_name,
        request.unit_id,
        request.probability_failure * 100.0,
        build_context(request)
    )
}

const BULLETS: [&str; 3] = ["•", "-", "*"];
const SEVERITY_MARKERS: [&str; 3] = ["🚨", "⚠️", "ℹ️"];

/// Extract at most [`MAX_REMOTE_REASONS`] reasons from a completion
///
/// Bullet lines win; otherwise the text is split on severity markers.
pub fn parse_reasons(text: &str) -> Vec<String> {
    let mut reasons: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| {
            BULLETS.iter().any(|b| l.starts_with(b)) || SEVERITY_MARKERS.iter().any(|m| l.starts_with(m))
        })
        .map(|l| l.trim_start_matches(['•', '-', '*', ' ']).trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    if reasons.is_empty() {
        for marker in SEVERITY_MARKERS {
            reasons = text
                .split(marker)
                .skip(1)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| format!("{} {}", marker, p))
                .collect();
            if !reasons.is_empty() {
                break;
            }
        }
    }

    reasons.truncate(MAX_REMOTE_REASONS);
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExplanationAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::ExplanationService("HTTP 503".into()))
        }
    }

    struct HangingAdapter;

    #[async_trait]
    impl ExplanationAdapter for HangingAdapter {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("• too late".into())
        }
    }

    struct FlakyAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExplanationAdapter for FlakyAdapter {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(String::new())
            } else {
                Ok("• Battery at 12% is deeply discharged\n• Temperature of 47°C stresses capacitors".into())
            }
        }
    }

    fn request() -> ExplanationRequest {
        ExplanationRequest {
            unit_id: "UPS-03".into(),
            unit_name: "UPS-03".into(),
            probability_failure: 0.9,
            confidence: 0.9,
            capacity: 3000.0,
            metrics: UnitMetrics {
                battery_level: 12.0,
                temperature: 47.0,
                ..Default::default()
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_adapter_falls_back() {
        let adapter = Arc::new(FailingAdapter {
            calls: AtomicUsize::new(0),
        });
        let explainer = Explainer::new(adapter.clone(), RetryPolicy::default());
        let reasons = explainer.explain(&request()).await;
        assert!(!reasons.is_empty());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_adapter_is_timed_out() {
        let policy = RetryPolicy {
            attempts: 2,
            initial_backoff: Duration::from_millis(10),
            call_timeout: Duration::from_secs(1),
        };
        let explainer = Explainer::new(Arc::new(HangingAdapter), policy);
        let started = tokio::time::Instant::now();
        let reasons = explainer.explain(&request()).await;
        assert!(!reasons.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_remote_attempts_short() {
        let explainer = Explainer::new(Arc::new(HangingAdapter), RetryPolicy::default());
        let started = Instant::now();
        let reasons = explainer
            .explain_before(&request(), started + Duration::from_secs(5))
            .await;
        assert!(!reasons.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_skips_remote() {
        let adapter = Arc::new(FailingAdapter {
            calls: AtomicUsize::new(0),
        });
        let explainer = Explainer::new(adapter.clone(), RetryPolicy::default());
        let reasons = explainer.explain_before(&request(), Instant::now()).await;
        assert!(!reasons.is_empty());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_retried() {
        let adapter = Arc::new(FlakyAdapter {
            calls: AtomicUsize::new(0),
        });
        let explainer = Explainer::new(adapter.clone(), RetryPolicy::default());
        let reasons = explainer.explain(&request()).await;
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].starts_with("Battery at 12%"));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_local_only_never_empty() {
        let mut req = request();
        req.metrics = UnitMetrics::default();
        req.probability_failure = 0.1;
        let reasons = Explainer::local_only().explain(&req).await;
        assert!(!reasons.is_empty());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_secs(1),
            call_timeout: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.worst_case(), Duration::from_secs(33));
    }

    #[test]
    fn test_context_contains_metrics_and_annotations() {
        let ctx = build_context(&request());
        assert!(ctx.contains("• Battery Level: 12.0%"));
        assert!(ctx.contains("High Temperature: 47.0°C"));
        assert!(ctx.contains("Critical Battery"));
        assert!(ctx.contains("Model Confidence: 90.0%"));
        assert!(ctx.lines().all(|l| l.starts_with('•')));
    }

    #[test]
    fn test_parse_bullets_capped() {
        let text = "Here is the analysis:\n• one\n- two\n* three\n🚨 four\n• five\n• six\n";
        let reasons = parse_reasons(text);
        assert_eq!(reasons.len(), MAX_REMOTE_REASONS);
        assert_eq!(reasons[0], "one");
        assert_eq!(reasons[3], "🚨 four");
    }

    #[test]
    fn test_parse_without_bullets() {
        assert!(parse_reasons("nothing useful here").is_empty());
        let reasons = parse_reasons("Summary. ⚠️ heat is high ⚠️ battery is low");
        assert_eq!(reasons, vec!["⚠️ heat is high", "⚠️ battery is low"]);
    }
}
