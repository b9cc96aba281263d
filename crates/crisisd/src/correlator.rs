//! LLM-assisted correlation between a new ticket and active incidents.
//!
//! The model call sits behind the [`Correlator`] trait so the deterministic
//! pipeline can be tested with a fake. The Ollama implementation fails
//! closed: timeout, non-2xx, or unparsable output all surface as an error
//! that the matcher treats as "no match".

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use crisis_common::config::LlmSettings;
use crisis_common::CrisisError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Base delay for the retry backoff.
const BACKOFF_BASE_MS: u64 = 500;

/// Compact view of the new ticket handed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct TicketSummary {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// Compact view of one active incident handed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentSummary {
    pub id: String,
    pub title: String,
    pub linked_count: u32,
}

/// Parsed correlation decision.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationDecision {
    pub matches: bool,
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Pluggable correlation capability.
#[async_trait]
pub trait Correlator: Send + Sync {
    /// Ask whether the new ticket belongs to one of the active incidents.
    async fn correlate(
        &self,
        ticket: &TicketSummary,
        incidents: &[IncidentSummary],
    ) -> Result<CorrelationDecision, CrisisError>;
}

/// Ollama-backed correlator.
pub struct OllamaCorrelator {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: u32,
}

impl OllamaCorrelator {
    pub fn new(settings: &LlmSettings) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(settings.timeout_secs))
                .build()
                .unwrap_or_default(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            max_retries: settings.max_retries,
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
        });

        let mut attempt = 0u32;
        loop {
            let response = self
                .http_client
                .post(format!("{}/api/generate", self.endpoint))
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let json: serde_json::Value =
                        resp.json().await.context("correlator response body")?;
                    return Ok(json
                        .get("response")
                        .and_then(|r| r.as_str())
                        .unwrap_or("")
                        .to_string());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let transient = status.as_u16() == 429 || status.as_u16() == 503;
                    if !transient || attempt >= self.max_retries {
                        return Err(anyhow!("correlator request failed: {}", status));
                    }
                    warn!("Correlator returned {}, retrying", status);
                }
                Err(e) => {
                    // reqwest timeouts and connection errors are transient
                    if attempt >= self.max_retries {
                        return Err(anyhow!("correlator unreachable: {}", e));
                    }
                    warn!("Correlator call failed ({}), retrying", e);
                }
            }

            let delay = BACKOFF_BASE_MS * 2u64.pow(attempt);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Correlator for OllamaCorrelator {
    async fn correlate(
        &self,
        ticket: &TicketSummary,
        incidents: &[IncidentSummary],
    ) -> Result<CorrelationDecision, CrisisError> {
        let prompt = build_prompt(ticket, incidents);
        debug!("Correlation prompt: {} chars", prompt.len());

        let raw = self
            .generate(&prompt)
            .await
            .map_err(|e| CrisisError::Llm(e.to_string()))?;
        let decision =
            parse_decision(&raw).map_err(|e| CrisisError::Data(e.to_string()))?;
        validate_decision(decision, incidents)
    }
}

/// A yes-decision naming an unknown incident is a data error and fails
/// closed like any other malformed response.
fn validate_decision(
    decision: CorrelationDecision,
    incidents: &[IncidentSummary],
) -> Result<CorrelationDecision, CrisisError> {
    if decision.matches {
        match &decision.incident_id {
            Some(id) if incidents.iter().any(|i| &i.id == id) => {}
            other => {
                return Err(CrisisError::Data(format!(
                    "correlator matched unknown incident id {:?}",
                    other
                )));
            }
        }
    }
    Ok(decision)
}

/// Build the structured correlation prompt.
fn build_prompt(ticket: &TicketSummary, incidents: &[IncidentSummary]) -> String {
    let mut prompt = String::from(
        "You correlate support tickets with open incidents.\n\
         Decide whether the NEW TICKET describes the same operational problem \
         as one of the ACTIVE INCIDENTS.\n\n",
    );

    prompt.push_str(&format!(
        "NEW TICKET\n  id: {}\n  title: {}\n  description: {}\n\n",
        ticket.id, ticket.title, ticket.description
    ));

    prompt.push_str("ACTIVE INCIDENTS\n");
    for incident in incidents {
        prompt.push_str(&format!(
            "  - id: {} | title: {} | linked tickets: {}\n",
            incident.id, incident.title, incident.linked_count
        ));
    }

    prompt.push_str(
        "\nRespond with ONLY a JSON object, no prose:\n\
         {\"matches\": true|false, \"incident_id\": \"<id or null>\", \
         \"confidence\": 0.0-1.0, \"reasoning\": \"<one sentence>\"}\n",
    );

    prompt
}

/// Parse the model output into a decision. Strict JSON, with code fences
/// stripped since models wrap output in ```json blocks regardless of
/// instructions.
pub fn parse_decision(raw: &str) -> Result<CorrelationDecision> {
    let trimmed = raw.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(cleaned).with_context(|| format!("unparsable decision: {:.200}", raw))
}

/// Scripted correlator for tests.
#[cfg(test)]
pub struct FakeCorrelator {
    decision: Result<CorrelationDecision, String>,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FakeCorrelator {
    pub fn matching(incident_id: &str) -> Self {
        Self {
            decision: Ok(CorrelationDecision {
                matches: true,
                incident_id: Some(incident_id.to_string()),
                confidence: 0.9,
                reasoning: "scripted".to_string(),
            }),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn no_match() -> Self {
        Self {
            decision: Ok(CorrelationDecision {
                matches: false,
                incident_id: None,
                confidence: 0.2,
                reasoning: "scripted".to_string(),
            }),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            decision: Err(message.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Correlator for FakeCorrelator {
    async fn correlate(
        &self,
        _ticket: &TicketSummary,
        _incidents: &[IncidentSummary],
    ) -> Result<CorrelationDecision, CrisisError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.decision {
            Ok(decision) => Ok(decision.clone()),
            Err(message) => Err(CrisisError::Llm(message.clone())),
        }
    }
}
