//! Similarity scoring between two tickets' extracted signals.
//!
//! No single signal is reliable alone on short free-text descriptions, so a
//! ticket can be judged similar through shared operational vocabulary,
//! shared specific nouns, or raw textual overlap.

use crate::signals::TicketSignals;

/// System-keyword matches needed to be similar on vocabulary alone.
pub const SYSTEM_MATCH_MIN: usize = 2;

/// Specific-term matches needed when combined with textual overlap.
pub const SPECIFIC_MATCH_MIN: usize = 3;

/// Extra Jaccard margin at which textual overlap alone is enough.
pub const JACCARD_ALONE_MARGIN: f64 = 0.1;

/// Transient similarity verdict; lives for one evaluation only.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityVerdict {
    pub system_matches: usize,
    pub specific_matches: usize,
    pub jaccard: f64,
    pub is_similar: bool,
}

/// Score two tickets' signals against a configured Jaccard threshold.
///
/// Symmetric: `score(a, b, t)` and `score(b, a, t)` agree on every field.
pub fn score(a: &TicketSignals, b: &TicketSignals, similarity_threshold: f64) -> SimilarityVerdict {
    let system_matches = a.system_keywords.intersection(&b.system_keywords).count();

    // Counted as matching pairs with substring containment either way, to
    // tolerate inflection ("database" vs "databases").
    let specific_matches = a
        .specific_terms
        .iter()
        .flat_map(|ta| b.specific_terms.iter().map(move |tb| (ta, tb)))
        .filter(|(ta, tb)| ta == tb || ta.contains(tb.as_str()) || tb.contains(ta.as_str()))
        .count();

    let jaccard = jaccard(a, b);

    let is_similar = system_matches >= SYSTEM_MATCH_MIN
        || (specific_matches >= SPECIFIC_MATCH_MIN && jaccard > similarity_threshold)
        || jaccard > similarity_threshold + JACCARD_ALONE_MARGIN;

    SimilarityVerdict {
        system_matches,
        specific_matches,
        jaccard,
        is_similar,
    }
}

/// Jaccard similarity of the normalized token sets. Defined as 0 when both
/// sets are empty, never a division by zero.
fn jaccard(a: &TicketSignals, b: &TicketSignals) -> f64 {
    let union = a.tokens.union(&b.tokens).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.tokens.intersection(&b.tokens).count();
    intersection as f64 / union as f64
}
