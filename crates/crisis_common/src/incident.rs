//! Incident ("crisis") types and evaluation outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed token appended to every problem signature.
pub const SIGNATURE_TOKEN: &str = "crisis";

/// Build the coarse problem signature for race protection.
///
/// Intentionally low-cardinality: two tickets for the same team and category
/// arriving inside the race window collapse onto the same key even when they
/// describe different outages. The signature detects "the same kind of
/// incident", not the same real-world event.
pub fn problem_signature(team_id: &str, category: &str) -> String {
    format!(
        "{}:{}:{}",
        team_id.trim().to_lowercase(),
        category.trim().to_lowercase(),
        SIGNATURE_TOKEN
    )
}

/// A detected cluster of related tickets believed to stem from the same
/// underlying operational problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    pub team_id: String,
    /// Keyword terms used by the fast matching pass.
    pub keywords: Vec<String>,
    /// Coarse uniqueness key, see [`problem_signature`].
    pub problem_signature: String,
    pub linked_count: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Why an evaluation ended in `no_action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    ExcludedCategory,
    TeamCooldown,
    BelowThreshold,
}

/// Terminal outcome of one ticket evaluation.
///
/// Every evaluation ends in exactly one of these; downstream notifiers use
/// the tag to decide whether stakeholders hear about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    NoAction { reason: NoActionReason },
    LinkedToExisting { incident_id: String },
    LinkedToRecent { incident_id: String },
    LinkedToSignatureMatch { incident_id: String },
    NewIncidentCreated { incident_id: String },
}

impl EvaluationOutcome {
    /// Incident id involved in the outcome, if any.
    pub fn incident_id(&self) -> Option<&str> {
        match self {
            EvaluationOutcome::NoAction { .. } => None,
            EvaluationOutcome::LinkedToExisting { incident_id }
            | EvaluationOutcome::LinkedToRecent { incident_id }
            | EvaluationOutcome::LinkedToSignatureMatch { incident_id }
            | EvaluationOutcome::NewIncidentCreated { incident_id } => Some(incident_id),
        }
    }
}

/// Outcome plus the similarity context downstream consumers want.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(flatten)]
    pub outcome: EvaluationOutcome,
    /// How many other tickets were judged similar (excludes the new ticket).
    pub similar_count: usize,
}

impl EvaluationResult {
    pub fn no_action(reason: NoActionReason, similar_count: usize) -> Self {
        Self {
            outcome: EvaluationOutcome::NoAction { reason },
            similar_count,
        }
    }
}
