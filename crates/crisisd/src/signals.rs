//! Signal extraction: comparable features from a ticket's free text.
//!
//! Pure and deterministic — the same input always yields the same sets.
//! Race-safe comparisons elsewhere in the pipeline depend on that.

use std::collections::BTreeSet;

/// How many specific content words are kept per ticket.
pub const MAX_SPECIFIC_TERMS: usize = 5;

/// Minimum length for a word to count as a specific term.
pub const MIN_SPECIFIC_TERM_LEN: usize = 4;

/// Words too generic to identify a problem.
const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "cannot", "could", "does",
    "doing", "every", "from", "getting", "have", "having", "into", "issue", "just", "like",
    "more", "most", "other", "our", "please", "problem", "same", "should", "since", "some",
    "than", "that", "their", "them", "then", "there", "these", "they", "this", "ticket",
    "trying", "very", "want", "what", "when", "where", "which", "while", "will", "with",
    "would", "your",
];

/// Derived features for one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketSignals {
    /// Operational-failure vocabulary terms found in title+description.
    pub system_keywords: BTreeSet<String>,
    /// Up to [`MAX_SPECIFIC_TERMS`] content words from the description,
    /// in order of first appearance.
    pub specific_terms: Vec<String>,
    /// Lower-cased whitespace tokens of the description, for Jaccard.
    pub tokens: BTreeSet<String>,
}

/// Extract signals from a ticket's title and description.
///
/// `vocabulary` is the configured list of system keywords; it is matched by
/// substring against the lower-cased title+description.
pub fn extract(title: &str, description: &str, vocabulary: &[String]) -> TicketSignals {
    let combined = format!("{} {}", title, description).to_lowercase();

    let system_keywords: BTreeSet<String> = vocabulary
        .iter()
        .map(|v| v.to_lowercase())
        .filter(|v| !v.is_empty() && combined.contains(v.as_str()))
        .collect();

    let description_lower = description.to_lowercase();
    let mut specific_terms: Vec<String> = Vec::new();
    for raw in description_lower.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if word.len() < MIN_SPECIFIC_TERM_LEN {
            continue;
        }
        if STOP_WORDS.contains(&word) {
            continue;
        }
        if system_keywords.contains(word) {
            continue;
        }
        if specific_terms.iter().any(|t| t.as_str() == word) {
            continue;
        }
        specific_terms.push(word.to_string());
        if specific_terms.len() == MAX_SPECIFIC_TERMS {
            break;
        }
    }

    let tokens: BTreeSet<String> = description_lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect();

    TicketSignals {
        system_keywords,
        specific_terms,
        tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vec<String> {
        ["down", "login", "timeout", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_system_keywords_from_title_and_description() {
        let signals = extract("Site is DOWN", "users see a timeout on checkout", &vocab());
        assert!(signals.system_keywords.contains("down"));
        assert!(signals.system_keywords.contains("timeout"));
        assert!(!signals.system_keywords.contains("login"));
    }

    #[test]
    fn test_specific_terms_skip_stopwords_and_keywords() {
        let signals = extract(
            "",
            "checkout timeout error with payment gateway since deploy",
            &vocab(),
        );
        // "timeout"/"error" are system keywords, "with"/"since" are stop words
        assert_eq!(
            signals.specific_terms,
            vec!["checkout", "payment", "gateway", "deploy"]
        );
    }

    #[test]
    fn test_specific_terms_capped_and_deduplicated() {
        let signals = extract(
            "",
            "alpha bravo alpha charlie delta echo foxtrot golf",
            &vocab(),
        );
        assert_eq!(signals.specific_terms.len(), MAX_SPECIFIC_TERMS);
        assert_eq!(
            signals.specific_terms,
            vec!["alpha", "bravo", "charlie", "delta", "echo"]
        );
    }

    #[test]
    fn test_tokens_are_normalized() {
        let signals = extract("", "Login FAILED, login failed!", &vocab());
        assert!(signals.tokens.contains("login"));
        assert!(signals.tokens.contains("failed"));
        assert_eq!(signals.tokens.len(), 2);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let a = extract("API down", "requests time out after deploy", &vocab());
        let b = extract("API down", "requests time out after deploy", &vocab());
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_title_is_fine() {
        let signals = extract("", "database is down", &vocab());
        assert!(signals.system_keywords.contains("down"));
        assert_eq!(signals.specific_terms, vec!["database"]);
    }
}
