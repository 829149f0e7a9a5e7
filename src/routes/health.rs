use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::db::queries;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when healthy, "degraded" when DB is unreachable)
    pub status: String,
    /// API version
    pub version: String,
    /// Whether the database is reachable
    pub database: bool,
    /// When the most recent forecast run was written
    pub last_forecast_at: Option<DateTime<Utc>>,
}

/// Health check endpoint.
///
/// Verifies database connectivity by reading the time of the latest forecast
/// run. Returns status "degraded" (still 200) if the DB is unreachable, so
/// load balancers can distinguish partial failures.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(pool): State<PgPool>) -> Json<HealthResponse> {
    let last_forecast = queries::get_last_generated_at(&pool).await;
    if let Err(e) = &last_forecast {
        tracing::warn!("Health check: database unreachable: {}", e);
    }
    let db_ok = last_forecast.is_ok();

    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_ok,
        last_forecast_at: last_forecast.ok().flatten(),
    })
}
