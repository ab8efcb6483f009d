//! Gemini-style `generateContent` REST adapter

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ExplanationAdapter, ExplanationSettings};
use crate::error::{EngineError, Result};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Remote explanation backend over HTTPS
pub struct GeminiAdapter {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl GeminiAdapter {
    pub fn new(settings: &ExplanationSettings, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| EngineError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                settings.endpoint.trim_end_matches('/'),
                settings.model
            ),
            api_key,
        })
    }

    /// Build from settings, reading the key from the configured variable
    ///
    /// `Ok(None)` when the service is disabled or no key is set.
    pub fn from_env(settings: &ExplanationSettings) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }
        match std::env::var(&settings.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Self::new(settings, key).map(Some),
            _ => {
                log::warn!(
                    "{} not set; explanations use the local template",
                    settings.api_key_env
                );
                Ok(None)
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExplanationAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::ExplanationService(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::ExplanationService(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ExplanationService(format!("bad response body: {}", e)))?;

        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(EngineError::ExplanationService("empty response".into()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let settings = ExplanationSettings {
            endpoint: "https://example.invalid/".into(),
            model: "m1".into(),
            ..Default::default()
        };
        let adapter = GeminiAdapter::new(&settings, "k".into()).unwrap();
        assert_eq!(adapter.url(), "https://example.invalid/v1beta/models/m1:generateContent");
    }

    #[test]
    fn test_disabled_yields_none() {
        let settings = ExplanationSettings {
            enabled: false,
            ..Default::default()
        };
        assert!(GeminiAdapter::from_env(&settings).unwrap().is_none());
    }

    #[test]
    fn test_missing_key_yields_none() {
        let settings = ExplanationSettings {
            api_key_env: "UPSMON_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(GeminiAdapter::from_env(&settings).unwrap().is_none());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"• a"},{"text":"• b"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "• a\n• b");
        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.text().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_errors() {
        let settings = ExplanationSettings {
            endpoint: "http://127.0.0.1:9".into(),
            request_timeout_secs: 2,
            ..Default::default()
        };
        let adapter = GeminiAdapter::new(&settings, "k".into()).unwrap();
        let err = adapter.generate("hi").await.unwrap_err();
        assert!(matches!(err, EngineError::ExplanationService(_)));
    }
}
