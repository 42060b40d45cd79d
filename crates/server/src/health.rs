use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use jokebot_core::MembershipTracker;
use jokebot_slack::socket::ConnectionState;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    membership: Arc<MembershipTracker>,
    connection: watch::Receiver<ConnectionState>,
}

impl HealthState {
    pub fn new(
        membership: Arc<MembershipTracker>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { membership, connection }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connection: &'static str,
    pub seeded: bool,
    pub channels: usize,
    pub groups: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let connection = *state.connection.borrow();
    let membership = state.membership.snapshot();
    let ready = connection.is_seeded();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        connection: connection.as_str(),
        seeded: membership.is_some(),
        channels: membership.as_ref().map_or(0, |snapshot| snapshot.channel_count()),
        groups: membership.as_ref().map_or(0, |snapshot| snapshot.group_count()),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
