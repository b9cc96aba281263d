//! Active-incident matching: cheap keyword pass first, LLM second.
//!
//! The keyword pass is O(incidents x terms) over the ticket text and exists
//! to keep the model out of the common case. The LLM pass only runs when the
//! fast pass found nothing and at least one active incident exists, and any
//! failure there degrades to "no match" so the deterministic pipeline keeps
//! going.

use crate::correlator::{Correlator, IncidentSummary, TicketSummary};
use crisis_common::{Incident, Ticket};
use tracing::{debug, info, warn};

/// Minimum ticket-word length considered by the reverse containment check;
/// shorter words match almost any term and spray false positives.
const MIN_OVERLAP_WORD_LEN: usize = 4;

/// Case-insensitive keyword overlap between an incident's stored terms and a
/// ticket's title+description, substring match in either direction.
pub fn keyword_overlap(incident: &Incident, ticket: &Ticket) -> bool {
    let haystack = format!("{} {}", ticket.title, ticket.description).to_lowercase();
    let words: Vec<&str> = haystack
        .split_whitespace()
        .filter(|w| w.len() >= MIN_OVERLAP_WORD_LEN)
        .collect();

    incident.keywords.iter().any(|term| {
        let term = term.to_lowercase();
        if term.is_empty() {
            return false;
        }
        haystack.contains(&term) || words.iter().any(|w| term.contains(w))
    })
}

/// Try to match the new ticket against the team's active incidents.
/// Returns the matched incident id, or `None` to continue with clustering.
pub async fn match_active(
    ticket: &Ticket,
    actives: &[Incident],
    correlator: &dyn Correlator,
) -> Option<String> {
    if actives.is_empty() {
        return None;
    }

    // Fast keyword pass
    for incident in actives {
        if keyword_overlap(incident, ticket) {
            debug!(
                "Keyword match: ticket {} -> incident {}",
                ticket.id, incident.id
            );
            return Some(incident.id.clone());
        }
    }

    // LLM correlation pass
    let summary = TicketSummary {
        id: ticket.id.clone(),
        title: ticket.title.clone(),
        description: ticket.description.clone(),
    };
    let incident_summaries: Vec<IncidentSummary> = actives
        .iter()
        .map(|i| IncidentSummary {
            id: i.id.clone(),
            title: i.title.clone(),
            linked_count: i.linked_count,
        })
        .collect();

    match correlator.correlate(&summary, &incident_summaries).await {
        Ok(decision) if decision.matches => {
            // validated by the correlator: matches implies a known id
            let incident_id = decision.incident_id?;
            info!(
                "LLM correlated ticket {} with incident {} (confidence {:.2})",
                ticket.id, incident_id, decision.confidence
            );
            Some(incident_id)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(
                "Correlator failed for ticket {}, continuing without it: {}",
                ticket.id, e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::FakeCorrelator;
    use chrono::Utc;
    use crisis_common::{problem_signature, TicketStatus};

    fn ticket(description: &str) -> Ticket {
        Ticket {
            id: "t-new".to_string(),
            title: String::new(),
            description: description.to_string(),
            category: "auth".to_string(),
            team_id: "support".to_string(),
            status: TicketStatus::Open,
            created_at: Utc::now(),
        }
    }

    fn incident(id: &str, keywords: &[&str]) -> Incident {
        Incident {
            id: id.to_string(),
            title: format!("incident {}", id),
            description: String::new(),
            team_id: "support".to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            problem_signature: problem_signature("support", "auth"),
            linked_count: 1,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_keyword_pass_skips_llm() {
        let correlator = FakeCorrelator::failing("must not be called");
        let actives = vec![incident("c-1", &["login", "timeout"])];
        let matched = match_active(
            &ticket("cannot LOGIN to the portal"),
            &actives,
            &correlator,
        )
        .await;
        assert_eq!(matched.as_deref(), Some("c-1"));
        assert_eq!(correlator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_overlap_is_case_insensitive_and_bidirectional() {
        let t = ticket("The DATABASE keeps timing out");
        assert!(keyword_overlap(&incident("c-1", &["database"]), &t));
        // Ticket word contained in a longer stored term
        assert!(keyword_overlap(&incident("c-2", &["database-cluster"]), &t));
        assert!(!keyword_overlap(&incident("c-3", &["billing"]), &t));
    }

    #[tokio::test]
    async fn test_llm_pass_runs_when_keywords_miss() {
        let correlator = FakeCorrelator::matching("c-1");
        let actives = vec![incident("c-1", &["billing"])];
        let matched = match_active(&ticket("strange checkout behavior"), &actives, &correlator).await;
        assert_eq!(matched.as_deref(), Some("c-1"));
        assert_eq!(correlator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_no_match_falls_through() {
        let correlator = FakeCorrelator::no_match();
        let actives = vec![incident("c-1", &["billing"])];
        let matched = match_active(&ticket("strange checkout behavior"), &actives, &correlator).await;
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_no_match() {
        let correlator = FakeCorrelator::failing("connect timeout");
        let actives = vec![incident("c-1", &["billing"])];
        let matched = match_active(&ticket("strange checkout behavior"), &actives, &correlator).await;
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn test_no_actives_means_no_llm_call() {
        let correlator = FakeCorrelator::matching("c-1");
        let matched = match_active(&ticket("anything"), &[], &correlator).await;
        assert!(matched.is_none());
        assert_eq!(correlator.call_count(), 0);
    }
}
