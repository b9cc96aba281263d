//! Incident store adapter.
//!
//! The only component touching persistent state. Everything above it is
//! decision logic operating on data handed to it; the adapter owns how the
//! write lands (insert vs. update vs. idempotent skip).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use crisis_common::{CrisisError, Incident, Ticket, TicketStatus};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Narrow persistence contract the engine evaluates against.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Record a ticket (upsert; redelivered events are safe).
    async fn record_ticket(&self, ticket: &Ticket) -> Result<(), CrisisError>;

    /// Active incidents for a team created at or after `since`.
    async fn active_incidents(
        &self,
        team_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Incident>, CrisisError>;

    /// Tickets for a team created at or after `since` that are not linked
    /// to any active incident.
    async fn unlinked_recent_tickets(
        &self,
        team_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, CrisisError>;

    /// Insert a new incident.
    async fn create_incident(&self, incident: &Incident) -> Result<(), CrisisError>;

    /// Link a ticket to an incident. Idempotent: returns `true` only when
    /// the link is new, `false` when the pair was already linked.
    async fn link_ticket(&self, ticket_id: &str, incident_id: &str) -> Result<bool, CrisisError>;

    /// Bump an incident's linked-ticket count.
    async fn increment_linked_count(&self, incident_id: &str) -> Result<(), CrisisError>;

    /// Most recent active incident for a team with this exact problem
    /// signature, created at or after `since`.
    async fn find_by_signature(
        &self,
        team_id: &str,
        signature: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>, CrisisError>;
}

fn store_err(e: impl std::fmt::Display) -> CrisisError {
    CrisisError::Store(e.to_string())
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// In-memory store for tests and local runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                team_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_team_time ON tickets(team_id, created_at);

            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                team_id TEXT NOT NULL,
                keywords TEXT NOT NULL,
                problem_signature TEXT NOT NULL,
                linked_count INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_incidents_team_time ON incidents(team_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_incidents_signature ON incidents(problem_signature);

            CREATE TABLE IF NOT EXISTS incident_tickets (
                incident_id TEXT NOT NULL,
                ticket_id TEXT NOT NULL,
                PRIMARY KEY (incident_id, ticket_id)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store lock poisoned"))
    }
}

fn row_to_ticket(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        team_id: row.get(4)?,
        status: TicketStatus::parse(&row.get::<_, String>(5)?),
        created_at: ts_to_datetime(row.get::<_, i64>(6)?),
    })
}

fn row_to_incident(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    let keywords_json: String = row.get(4)?;
    Ok(Incident {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        team_id: row.get(3)?,
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        problem_signature: row.get(5)?,
        linked_count: row.get::<_, i64>(6)? as u32,
        active: row.get::<_, i64>(7)? != 0,
        created_at: ts_to_datetime(row.get::<_, i64>(8)?),
    })
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

// Inherent sync implementations; the trait wraps them and classifies
// failures as store errors. rusqlite calls never block long enough here to
// warrant a blocking-pool round trip.
impl SqliteStore {
    fn record_ticket_sync(&self, ticket: &Ticket) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tickets (id, title, description, category, team_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status",
            params![
                ticket.id,
                ticket.title,
                ticket.description,
                ticket.category,
                ticket.team_id,
                ticket.status.as_str(),
                ticket.created_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn active_incidents_sync(&self, team_id: &str, since: DateTime<Utc>) -> Result<Vec<Incident>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, team_id, keywords, problem_signature,
                    linked_count, active, created_at
             FROM incidents
             WHERE team_id = ?1 AND active = 1 AND created_at >= ?2
             ORDER BY created_at DESC",
        )?;
        let incidents = stmt
            .query_map(params![team_id, since.timestamp()], row_to_incident)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(incidents)
    }

    fn unlinked_recent_tickets_sync(
        &self,
        team_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.title, t.description, t.category, t.team_id, t.status, t.created_at
             FROM tickets t
             WHERE t.team_id = ?1
               AND t.created_at >= ?2
               AND t.status != 'closed'
               AND NOT EXISTS (
                   SELECT 1 FROM incident_tickets l
                   JOIN incidents i ON i.id = l.incident_id
                   WHERE l.ticket_id = t.id AND i.active = 1
               )
             ORDER BY t.created_at DESC",
        )?;
        let tickets = stmt
            .query_map(params![team_id, since.timestamp()], row_to_ticket)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tickets)
    }

    fn create_incident_sync(&self, incident: &Incident) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO incidents (id, title, description, team_id, keywords,
                                    problem_signature, linked_count, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                incident.id,
                incident.title,
                incident.description,
                incident.team_id,
                serde_json::to_string(&incident.keywords)?,
                incident.problem_signature,
                incident.linked_count as i64,
                incident.active as i64,
                incident.created_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn link_ticket_sync(&self, ticket_id: &str, incident_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO incident_tickets (incident_id, ticket_id) VALUES (?1, ?2)",
            params![incident_id, ticket_id],
        )?;
        Ok(changed > 0)
    }

    fn increment_linked_count_sync(&self, incident_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE incidents SET linked_count = linked_count + 1 WHERE id = ?1",
            params![incident_id],
        )?;
        Ok(())
    }

    fn find_by_signature_sync(
        &self,
        team_id: &str,
        signature: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, team_id, keywords, problem_signature,
                    linked_count, active, created_at
             FROM incidents
             WHERE team_id = ?1 AND problem_signature = ?2 AND active = 1 AND created_at >= ?3
             ORDER BY created_at DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(
            params![team_id, signature, since.timestamp()],
            row_to_incident,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl IncidentStore for SqliteStore {
    async fn record_ticket(&self, ticket: &Ticket) -> Result<(), CrisisError> {
        self.record_ticket_sync(ticket).map_err(store_err)
    }

    async fn active_incidents(
        &self,
        team_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Incident>, CrisisError> {
        self.active_incidents_sync(team_id, since).map_err(store_err)
    }

    async fn unlinked_recent_tickets(
        &self,
        team_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, CrisisError> {
        self.unlinked_recent_tickets_sync(team_id, since)
            .map_err(store_err)
    }

    async fn create_incident(&self, incident: &Incident) -> Result<(), CrisisError> {
        self.create_incident_sync(incident).map_err(store_err)
    }

    async fn link_ticket(&self, ticket_id: &str, incident_id: &str) -> Result<bool, CrisisError> {
        self.link_ticket_sync(ticket_id, incident_id).map_err(store_err)
    }

    async fn increment_linked_count(&self, incident_id: &str) -> Result<(), CrisisError> {
        self.increment_linked_count_sync(incident_id)
            .map_err(store_err)
    }

    async fn find_by_signature(
        &self,
        team_id: &str,
        signature: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>, CrisisError> {
        self.find_by_signature_sync(team_id, signature, since)
            .map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crisis_common::problem_signature;

    fn ticket(id: &str, team: &str, minutes_ago: i64) -> Ticket {
        Ticket {
            id: id.to_string(),
            title: format!("ticket {}", id),
            description: "login timeout error".to_string(),
            category: "auth".to_string(),
            team_id: team.to_string(),
            status: TicketStatus::Open,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn incident(id: &str, team: &str, minutes_ago: i64, active: bool) -> Incident {
        Incident {
            id: id.to_string(),
            title: format!("incident {}", id),
            description: "clustered outage".to_string(),
            team_id: team.to_string(),
            keywords: vec!["login".to_string(), "timeout".to_string()],
            problem_signature: problem_signature(team, "auth"),
            linked_count: 0,
            active,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_link_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_ticket(&ticket("t-1", "support", 0)).await.unwrap();
        store
            .create_incident(&incident("c-1", "support", 0, true))
            .await
            .unwrap();

        assert!(store.link_ticket("t-1", "c-1").await.unwrap());
        assert!(!store.link_ticket("t-1", "c-1").await.unwrap());
        assert!(!store.link_ticket("t-1", "c-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_ticket_tolerates_redelivery() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = ticket("t-1", "support", 0);
        store.record_ticket(&t).await.unwrap();
        store.record_ticket(&t).await.unwrap();

        let found = store
            .unlinked_recent_tickets("support", Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_unlinked_excludes_tickets_on_active_incidents_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_ticket(&ticket("t-1", "support", 5)).await.unwrap();
        store.record_ticket(&ticket("t-2", "support", 5)).await.unwrap();
        store.record_ticket(&ticket("t-3", "support", 5)).await.unwrap();

        store
            .create_incident(&incident("c-active", "support", 10, true))
            .await
            .unwrap();
        store
            .create_incident(&incident("c-resolved", "support", 10, false))
            .await
            .unwrap();
        store.link_ticket("t-1", "c-active").await.unwrap();
        store.link_ticket("t-2", "c-resolved").await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        let found = store.unlinked_recent_tickets("support", since).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|t| t.id.as_str()).collect();
        assert!(!ids.contains(&"t-1"), "linked to active incident");
        assert!(ids.contains(&"t-2"), "link to resolved incident is fine");
        assert!(ids.contains(&"t-3"));
    }

    #[tokio::test]
    async fn test_window_filters_apply() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_ticket(&ticket("t-old", "support", 300)).await.unwrap();
        store.record_ticket(&ticket("t-new", "support", 5)).await.unwrap();
        store.record_ticket(&ticket("t-other", "billing", 5)).await.unwrap();

        let since = Utc::now() - Duration::hours(2);
        let found = store.unlinked_recent_tickets("support", since).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "t-new");
    }

    #[tokio::test]
    async fn test_find_by_signature_respects_window_and_activity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let sig = problem_signature("support", "auth");

        store
            .create_incident(&incident("c-old", "support", 120, true))
            .await
            .unwrap();
        let since = Utc::now() - Duration::minutes(30);
        assert!(store
            .find_by_signature("support", &sig, since)
            .await
            .unwrap()
            .is_none());

        store
            .create_incident(&incident("c-new", "support", 5, true))
            .await
            .unwrap();
        let found = store
            .find_by_signature("support", &sig, since)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "c-new");
    }

    #[tokio::test]
    async fn test_increment_linked_count() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_incident(&incident("c-1", "support", 0, true))
            .await
            .unwrap();
        store.increment_linked_count("c-1").await.unwrap();
        store.increment_linked_count("c-1").await.unwrap();

        let incidents = store
            .active_incidents("support", Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(incidents[0].linked_count, 2);
    }

    #[tokio::test]
    async fn test_keywords_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_incident(&incident("c-1", "support", 0, true))
            .await
            .unwrap();
        let incidents = store
            .active_incidents("support", Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(incidents[0].keywords, vec!["login", "timeout"]);
    }
}
