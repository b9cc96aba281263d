//! Error types for the correlation engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrisisError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("LLM correlator error: {0}")]
    Llm(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrisisError {
    /// Whether retrying the same call may succeed.
    ///
    /// LLM and store errors cover timeouts and connectivity blips; config
    /// and data errors are deterministic and retrying cannot help.
    pub fn is_transient(&self) -> bool {
        matches!(self, CrisisError::Llm(_) | CrisisError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CrisisError::Llm("timeout".into()).is_transient());
        assert!(CrisisError::Store("locked".into()).is_transient());
        assert!(!CrisisError::Config("missing threshold".into()).is_transient());
        assert!(!CrisisError::Data("empty description".into()).is_transient());
    }
}
