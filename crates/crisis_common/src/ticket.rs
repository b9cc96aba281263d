//! Ticket types as the engine sees them.
//!
//! Tickets are owned by the ticketing subsystem; the engine reads them and
//! records incident links, nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ticket lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Escalated,
    Closed,
}

impl TicketStatus {
    /// Stable string form used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Escalated => "escalated",
            TicketStatus::Closed => "closed",
        }
    }

    /// Parse the store's string form. Unknown values map to Open so a
    /// schema-drifted row never aborts an evaluation.
    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => TicketStatus::InProgress,
            "escalated" => TicketStatus::Escalated,
            "closed" => TicketStatus::Closed,
            _ => TicketStatus::Open,
        }
    }
}

/// A support ticket. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub team_id: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

/// Inbound ticket-creation event, delivered once per newly opened ticket.
///
/// The caller does not guarantee exactly-once delivery; the engine's
/// idempotent linking makes at-least-once safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketEvent {
    pub ticket_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub team_id: String,
}

impl TicketEvent {
    /// Materialize the event as an open ticket stamped at `now`.
    pub fn into_ticket(self, now: DateTime<Utc>) -> Ticket {
        Ticket {
            id: self.ticket_id,
            title: self.title,
            description: self.description,
            category: self.category,
            team_id: self.team_id,
            status: TicketStatus::Open,
            created_at: now,
        }
    }
}
