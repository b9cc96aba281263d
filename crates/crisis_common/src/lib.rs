//! Shared types for the crisisd incident correlation engine.
//!
//! Everything here is decision-logic data: tickets as the engine sees them,
//! incidents ("crises") and their links, evaluation outcomes, configuration
//! and error types. No I/O lives in this crate.

pub mod config;
pub mod error;
pub mod incident;
pub mod ticket;

pub use config::{Config, EngineSettings, LlmSettings, SettingsSource};
pub use error::CrisisError;
pub use incident::{
    problem_signature, EvaluationOutcome, EvaluationResult, Incident, NoActionReason,
};
pub use ticket::{Ticket, TicketEvent, TicketStatus};

/// Engine version, reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
