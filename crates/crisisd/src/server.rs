//! HTTP surface for crisisd.
//!
//! One route receives ticket-created events from the ticketing subsystem;
//! each request is an independent unit of work. The response carries the
//! terminal outcome for downstream notifiers.

use crate::engine::Engine;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use crisis_common::{EvaluationResult, TicketEvent, VERSION};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers
pub struct AppState {
    pub engine: Engine,
    pub store: Arc<dyn crate::store::IncidentStore>,
}

/// Health endpoint payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/events/ticket-created", post(ticket_created))
        .route("/v1/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until shutdown.
pub async fn run(state: AppState, bind_addr: &str) -> Result<()> {
    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("crisisd listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ticket_created(
    State(state): State<Arc<AppState>>,
    Json(event): Json<TicketEvent>,
) -> Result<Json<EvaluationResult>, (StatusCode, String)> {
    if event.description.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "ticket description must not be empty".to_string(),
        ));
    }

    let ticket = event.into_ticket(Utc::now());
    info!("Evaluating ticket {} for team {}", ticket.id, ticket.team_id);

    // Record first so later arrivals can cluster against this ticket.
    // Upsert makes redelivered events safe.
    if let Err(e) = state.store.record_ticket(&ticket).await {
        error!("Failed to record ticket {}: {}", ticket.id, e);
        return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    match state.engine.evaluate(&ticket).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            // Only link/create store failures reach here; the caller may
            // redeliver the event, linking is idempotent.
            error!("Evaluation failed for ticket {}: {}", ticket.id, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn health(State(_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: VERSION,
    })
}
