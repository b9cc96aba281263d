//! The incident promotion gate: one terminal decision per ticket.
//!
//! Each evaluation is stateless — active incidents and recent tickets are
//! re-read from the store every time, because the engine may run behind
//! multiple replicas and concurrently for the same team. The two re-check
//! steps immediately before creation narrow (but do not close) the window in
//! which two simultaneous evaluations could both decide to create.

use crate::correlator::Correlator;
use crate::matcher;
use crate::signals;
use crate::{cluster, store::IncidentStore};
use anyhow::Result;
use chrono::{Duration, Utc};
use crisis_common::{
    problem_signature, EvaluationOutcome, EvaluationResult, Incident, NoActionReason,
    SettingsSource, Ticket,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest incident title derived from a ticket description.
const MAX_DERIVED_TITLE: usize = 80;

/// The correlation engine.
pub struct Engine {
    store: Arc<dyn IncidentStore>,
    correlator: Arc<dyn Correlator>,
    settings: Arc<SettingsSource>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        correlator: Arc<dyn Correlator>,
        settings: Arc<SettingsSource>,
    ) -> Self {
        Self {
            store,
            correlator,
            settings,
        }
    }

    /// Evaluate one newly opened ticket to a terminal outcome.
    ///
    /// Settings are read at the start of each evaluation so operator retunes
    /// apply without a restart. Read failures in the matching and clustering
    /// stages degrade to empty result sets; only write failures at the final
    /// link/create steps surface, and redelivery after those is safe because
    /// linking is idempotent.
    pub async fn evaluate(&self, ticket: &Ticket) -> Result<EvaluationResult> {
        let config = self.settings.current();
        let engine = &config.engine;
        let now = Utc::now();

        // Category filter
        if engine
            .excluded_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&ticket.category))
        {
            info!(
                "Ticket {}: category '{}' excluded, no action",
                ticket.id, ticket.category
            );
            return Ok(EvaluationResult::no_action(
                NoActionReason::ExcludedCategory,
                0,
            ));
        }

        // One read covers both matching and the cooldown check: the team
        // recency window is a superset of the cooldown window.
        let recency_since = now - Duration::seconds(engine.team_recency_window_secs as i64);
        let actives = match self.store.active_incidents(&ticket.team_id, recency_since).await {
            Ok(incidents) => incidents,
            Err(e) => {
                warn!(
                    "Active-incident read failed for team {}, treating as none: {}",
                    ticket.team_id, e
                );
                Vec::new()
            }
        };

        // Active-incident match (keyword pass, then LLM)
        if let Some(incident_id) = matcher::match_active(ticket, &actives, &*self.correlator).await
        {
            self.link(&ticket.id, &incident_id).await?;
            info!("Ticket {} linked to active incident {}", ticket.id, incident_id);
            return Ok(EvaluationResult {
                outcome: EvaluationOutcome::LinkedToExisting { incident_id },
                similar_count: 0,
            });
        }

        // Team cooldown: a fresh incident exists but this ticket did not
        // match it; creating another one now would be incident spam.
        let cooldown_since = now - Duration::seconds(engine.cooldown_window_secs as i64);
        if actives.iter().any(|i| i.created_at >= cooldown_since) {
            info!("Ticket {}: team {} in cooldown, no action", ticket.id, ticket.team_id);
            return Ok(EvaluationResult::no_action(NoActionReason::TeamCooldown, 0));
        }

        // Cluster recent unlinked tickets
        let cluster_since = now - Duration::seconds(engine.cluster_window_secs as i64);
        let candidates = match self
            .store
            .unlinked_recent_tickets(&ticket.team_id, cluster_since)
            .await
        {
            Ok(tickets) => tickets,
            Err(e) => {
                warn!(
                    "Unlinked-ticket read failed for team {}, treating as none: {}",
                    ticket.team_id, e
                );
                Vec::new()
            }
        };

        let ticket_signals =
            signals::extract(&ticket.title, &ticket.description, &engine.system_keywords);
        let similar = cluster::find_similar(
            &ticket.id,
            &ticket_signals,
            &candidates,
            &engine.system_keywords,
            engine.similarity_threshold,
        );

        if similar.len() < engine.threshold {
            info!(
                "Ticket {}: {} similar tickets, below threshold {}",
                ticket.id,
                similar.len(),
                engine.threshold
            );
            return Ok(EvaluationResult::no_action(
                NoActionReason::BelowThreshold,
                similar.len(),
            ));
        }

        // The pipeline above has latency (an LLM call, several reads); a
        // concurrent evaluation may have created an incident meanwhile.
        // Re-check right before the write.
        let recent_since = now - Duration::seconds(engine.recent_window_secs as i64);
        let recent = match self.store.active_incidents(&ticket.team_id, recent_since).await {
            Ok(incidents) => incidents,
            Err(e) => {
                warn!("Recent-incident re-check read failed, continuing: {}", e);
                Vec::new()
            }
        };
        if let Some(incident) = recent.iter().find(|i| matcher::keyword_overlap(i, ticket)) {
            self.link(&ticket.id, &incident.id).await?;
            info!(
                "Ticket {} linked to just-created incident {} (race re-check)",
                ticket.id, incident.id
            );
            return Ok(EvaluationResult {
                outcome: EvaluationOutcome::LinkedToRecent {
                    incident_id: incident.id.clone(),
                },
                similar_count: similar.len(),
            });
        }

        let signature = problem_signature(&ticket.team_id, &ticket.category);
        let signature_hit = self
            .store
            .find_by_signature(&ticket.team_id, &signature, cooldown_since)
            .await
            .unwrap_or_else(|e| {
                warn!("Signature re-check read failed, continuing: {}", e);
                None
            });
        if let Some(incident) = signature_hit {
            self.link(&ticket.id, &incident.id).await?;
            info!(
                "Ticket {} linked to incident {} by problem signature",
                ticket.id, incident.id
            );
            return Ok(EvaluationResult {
                outcome: EvaluationOutcome::LinkedToSignatureMatch {
                    incident_id: incident.id,
                },
                similar_count: similar.len(),
            });
        }

        // Create the incident and link the originating + clustered tickets.
        let incident = build_incident(ticket, &ticket_signals, &signature, similar.len());
        self.store.create_incident(&incident).await?;
        self.link(&ticket.id, &incident.id).await?;
        for similar_ticket in &similar {
            self.link(&similar_ticket.id, &incident.id).await?;
        }

        info!(
            "Ticket {}: created incident {} for team {} ({} similar tickets)",
            ticket.id,
            incident.id,
            ticket.team_id,
            similar.len()
        );
        Ok(EvaluationResult {
            outcome: EvaluationOutcome::NewIncidentCreated {
                incident_id: incident.id,
            },
            similar_count: similar.len(),
        })
    }

    /// Link a ticket and bump the incident count, only when the link is new.
    async fn link(&self, ticket_id: &str, incident_id: &str) -> Result<()> {
        if self.store.link_ticket(ticket_id, incident_id).await? {
            self.store.increment_linked_count(incident_id).await?;
        }
        Ok(())
    }
}

/// Derive the stored incident from the originating ticket.
fn build_incident(
    ticket: &Ticket,
    ticket_signals: &signals::TicketSignals,
    signature: &str,
    similar_count: usize,
) -> Incident {
    let title = if ticket.title.trim().is_empty() {
        let mut derived = ticket.description.chars().take(MAX_DERIVED_TITLE).collect::<String>();
        if ticket.description.chars().count() > MAX_DERIVED_TITLE {
            derived.push_str("...");
        }
        derived
    } else {
        ticket.title.clone()
    };

    // System keywords plus specific terms, so the fast pass catches
    // follow-up tickets without an LLM call.
    let mut keywords: Vec<String> = ticket_signals.system_keywords.iter().cloned().collect();
    keywords.extend(ticket_signals.specific_terms.iter().cloned());

    Incident {
        id: Uuid::new_v4().to_string(),
        title: format!("Crisis: {}", title),
        description: format!(
            "Auto-detected from {} similar tickets. Originating report: {}",
            similar_count + 1,
            ticket.description
        ),
        team_id: ticket.team_id.clone(),
        keywords,
        problem_signature: signature.to_string(),
        linked_count: 0,
        active: true,
        created_at: Utc::now(),
    }
}
