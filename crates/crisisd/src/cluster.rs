//! Candidate clustering: how many recent unlinked tickets look like this one.

use crate::signals::{self, TicketSignals};
use crate::similarity;
use crisis_common::Ticket;
use tracing::debug;

/// Find candidates similar to the new ticket.
///
/// The new ticket itself is excluded: a returned length of `n` means `n`
/// *other* tickets, which is what the promotion threshold counts against.
pub fn find_similar(
    new_ticket_id: &str,
    new_signals: &TicketSignals,
    candidates: &[Ticket],
    vocabulary: &[String],
    similarity_threshold: f64,
) -> Vec<Ticket> {
    let mut similar = Vec::new();

    for candidate in candidates {
        if candidate.id == new_ticket_id {
            continue;
        }
        let candidate_signals =
            signals::extract(&candidate.title, &candidate.description, vocabulary);
        let verdict = similarity::score(new_signals, &candidate_signals, similarity_threshold);
        if verdict.is_similar {
            debug!(
                "Ticket {} similar (system={}, specific={}, jaccard={:.2})",
                candidate.id, verdict.system_matches, verdict.specific_matches, verdict.jaccard
            );
            similar.push(candidate.clone());
        }
    }

    similar
}
