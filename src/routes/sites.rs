//! Site registry HTTP endpoints.
//!
//! - GET  /api/v1/sites
//! - GET  /api/v1/sites/:id
//! - GET  /api/v1/sites/:id/thresholds?limit=N
//! - POST /api/v1/sites/:id/forecast

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::{models, queries};
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{opt_dec_to_f64, round_1dp};
use crate::services::forecast::{spawn_forecast_for_site, ForecastEngine};
use crate::services::risk::{Exposure, Thresholds};

/// Default and maximum number of change log entries returned.
const DEFAULT_CHANGE_LOG_LIMIT: i64 = 50;
const MAX_CHANGE_LOG_LIMIT: i64 = 500;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A registry site.
#[derive(Debug, Serialize, ToSchema)]
pub struct SiteResponse {
    pub id: Uuid,
    pub client: String,
    pub name: String,
    pub postcode: String,
    /// Latitude (WGS84); null until geocoded
    pub latitude: Option<f64>,
    /// Longitude (WGS84); null until geocoded
    pub longitude: Option<f64>,
    /// Elevation in metres above sea level
    pub elevation_m: i32,
    /// "urban", "rural", "coastal" or "highland"
    pub exposure: String,
    /// Human-readable exposure (e.g. "Coastal / exposed")
    pub exposure_display: String,
    pub is_active: bool,
    pub job_complete: bool,
}

impl From<&models::Site> for SiteResponse {
    fn from(s: &models::Site) -> Self {
        Self {
            id: s.id,
            client: s.client_name.clone(),
            name: s.name.clone(),
            postcode: s.postcode.clone(),
            latitude: opt_dec_to_f64(s.latitude),
            longitude: opt_dec_to_f64(s.longitude),
            elevation_m: s.elevation_m,
            exposure: s.exposure.clone(),
            exposure_display: exposure_display(&s.exposure),
            is_active: s.is_active,
            job_complete: s.job_complete,
        }
    }
}

pub(crate) fn exposure_display(raw: &str) -> String {
    raw.parse::<Exposure>()
        .map(|e| e.display_name().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Headline numbers of a forecast run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunSummaryResponse {
    pub run_id: Uuid,
    pub forecast_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    /// "success" or "failed"
    pub status: String,
    pub peak_risk: Option<f64>,
    /// "GO", "CAUTION" or "CANCEL"
    pub recommendation: Option<String>,
}

impl From<&models::ForecastRun> for RunSummaryResponse {
    fn from(r: &models::ForecastRun) -> Self {
        Self {
            run_id: r.id,
            forecast_date: r.forecast_date,
            generated_at: r.generated_at,
            status: r.status.clone(),
            peak_risk: opt_dec_to_f64(r.peak_risk).map(round_1dp),
            recommendation: r.recommendation.clone(),
        }
    }
}

/// A site with its latest successful forecast.
#[derive(Debug, Serialize, ToSchema)]
pub struct SiteListItem {
    #[serde(flatten)]
    pub site: SiteResponse,
    pub latest_run: Option<RunSummaryResponse>,
}

/// Response for GET /api/v1/sites.
#[derive(Debug, Serialize, ToSchema)]
pub struct SiteListResponse {
    pub sites: Vec<SiteListItem>,
    pub site_count: usize,
    /// Sites with at least one successful forecast
    pub forecast_count: usize,
    /// Sites whose latest recommendation is CAUTION or CANCEL
    pub alert_count: usize,
    pub latest_forecast_time: Option<DateTime<Utc>>,
}

impl SiteListResponse {
    fn from_items(sites: Vec<SiteListItem>) -> Self {
        let runs: Vec<&RunSummaryResponse> =
            sites.iter().filter_map(|s| s.latest_run.as_ref()).collect();
        let alert_count = runs
            .iter()
            .filter(|r| matches!(r.recommendation.as_deref(), Some("CAUTION" | "CANCEL")))
            .count();
        Self {
            site_count: sites.len(),
            forecast_count: runs.len(),
            alert_count,
            latest_forecast_time: runs.iter().map(|r| r.generated_at).max(),
            sites,
        }
    }
}

/// Response for GET /api/v1/sites/:id.
#[derive(Debug, Serialize, ToSchema)]
pub struct SiteDetailResponse {
    #[serde(flatten)]
    pub site: SiteResponse,
    /// Active thresholds (defaults when the site has no profile)
    pub thresholds: Thresholds,
    pub threshold_profile_id: Option<Uuid>,
    pub threshold_version: Option<i32>,
    /// Latest successful run per forecast date, from today
    pub forecast_days: Vec<RunSummaryResponse>,
}

/// One version of a threshold profile.
#[derive(Debug, Serialize, ToSchema)]
pub struct ThresholdVersionResponse {
    pub id: Uuid,
    pub version: i32,
    pub is_active: bool,
    pub thresholds: Thresholds,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&models::ThresholdProfileRow> for ThresholdVersionResponse {
    fn from(row: &models::ThresholdProfileRow) -> Self {
        Self {
            id: row.id,
            version: row.version,
            is_active: row.is_active,
            thresholds: Thresholds::from(row),
            created_by: row.created_by.clone(),
            created_at: row.created_at,
        }
    }
}

/// One audit entry.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChangeLogResponse {
    /// site_created, site_updated, site_deactivated, threshold_created or threshold_updated
    pub action: String,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Response for GET /api/v1/sites/:id/thresholds.
#[derive(Debug, Serialize, ToSchema)]
pub struct ThresholdHistoryResponse {
    pub site_id: Uuid,
    /// Profile versions, newest first
    pub versions: Vec<ThresholdVersionResponse>,
    /// Change log, newest first
    pub change_log: Vec<ChangeLogResponse>,
}

/// Response for POST /api/v1/sites/:id/forecast.
#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerResponse {
    pub site_id: Uuid,
    /// Always "queued"
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ChangeLogQuery {
    /// Maximum change log entries to return (default 50, max 500)
    pub limit: Option<i64>,
}

pub(crate) async fn load_site(pool: &PgPool, site_id: Uuid) -> Result<models::Site, AppError> {
    queries::get_site(pool, site_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Site {} not found", site_id)))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// List active sites with their latest successful forecast.
///
/// Today's run is preferred; otherwise the run with the latest forecast date
/// is shown.
#[utoipa::path(
    get,
    path = "/api/v1/sites",
    tag = "Sites",
    responses(
        (status = 200, description = "Active sites with latest forecast", body = SiteListResponse),
    )
)]
pub async fn list_sites(State(pool): State<PgPool>) -> Result<Json<SiteListResponse>, AppError> {
    let today = Utc::now().date_naive();
    let sites = queries::list_sites(&pool).await?;
    let mut runs: HashMap<Uuid, models::ForecastRun> =
        queries::get_latest_successful_run_per_site(&pool, today)
            .await?
            .into_iter()
            .map(|r| (r.site_id, r))
            .collect();

    let items: Vec<SiteListItem> = sites
        .iter()
        .filter(|s| s.is_active)
        .map(|s| SiteListItem {
            site: SiteResponse::from(s),
            latest_run: runs.remove(&s.id).as_ref().map(RunSummaryResponse::from),
        })
        .collect();

    Ok(Json(SiteListResponse::from_items(items)))
}

/// Get a site with its active thresholds and upcoming forecast days.
#[utoipa::path(
    get,
    path = "/api/v1/sites/{id}",
    tag = "Sites",
    params(
        ("id" = Uuid, Path, description = "Site UUID"),
    ),
    responses(
        (status = 200, description = "Site detail", body = SiteDetailResponse),
        (status = 404, description = "Site not found", body = ErrorResponse),
    )
)]
pub async fn get_site(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<SiteDetailResponse>, AppError> {
    let site = load_site(&pool, id).await?;
    let profile = queries::get_active_threshold_profile(&pool, id).await?;
    let today = Utc::now().date_naive();
    let runs = queries::get_latest_runs_for_site(&pool, id, today).await?;

    Ok(Json(SiteDetailResponse {
        site: SiteResponse::from(&site),
        thresholds: profile.as_ref().map(Thresholds::from).unwrap_or_default(),
        threshold_profile_id: profile.as_ref().map(|p| p.id),
        threshold_version: profile.as_ref().map(|p| p.version),
        forecast_days: runs.iter().map(RunSummaryResponse::from).collect(),
    }))
}

/// Threshold profile versions and change log of a site.
#[utoipa::path(
    get,
    path = "/api/v1/sites/{id}/thresholds",
    tag = "Sites",
    params(
        ("id" = Uuid, Path, description = "Site UUID"),
        ChangeLogQuery,
    ),
    responses(
        (status = 200, description = "Threshold history", body = ThresholdHistoryResponse),
        (status = 400, description = "Invalid limit", body = ErrorResponse),
        (status = 404, description = "Site not found", body = ErrorResponse),
    )
)]
pub async fn get_threshold_history(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Query(params): Query<ChangeLogQuery>,
) -> Result<Json<ThresholdHistoryResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_CHANGE_LOG_LIMIT);
    if !(1..=MAX_CHANGE_LOG_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_CHANGE_LOG_LIMIT
        )));
    }

    let site = load_site(&pool, id).await?;
    let versions = queries::list_threshold_profiles(&pool, site.id).await?;
    let change_log = queries::list_change_log(&pool, site.id, limit).await?;

    Ok(Json(ThresholdHistoryResponse {
        site_id: site.id,
        versions: versions.iter().map(ThresholdVersionResponse::from).collect(),
        change_log: change_log
            .into_iter()
            .map(|e| ChangeLogResponse {
                action: e.action,
                details: e.details,
                actor: e.actor,
                timestamp: e.timestamp,
            })
            .collect(),
    }))
}

/// Queue a forecast run for one site.
///
/// The run happens in the background; results appear in the forecast
/// endpoints once it completes.
#[utoipa::path(
    post,
    path = "/api/v1/sites/{id}/forecast",
    tag = "Sites",
    params(
        ("id" = Uuid, Path, description = "Site UUID"),
    ),
    responses(
        (status = 202, description = "Forecast queued", body = TriggerResponse),
        (status = 400, description = "Site is inactive, complete or has no coordinates", body = ErrorResponse),
        (status = 404, description = "Site not found", body = ErrorResponse),
    )
)]
pub async fn trigger_forecast(
    State(engine): State<ForecastEngine>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let site = load_site(&engine.pool, id).await?;
    if !site.is_forecastable() {
        return Err(AppError::BadRequest(format!(
            "Site '{}' is inactive, complete or has no coordinates",
            site.name
        )));
    }

    tracing::info!("Manual forecast requested for site {} ({})", site.name, site.id);
    spawn_forecast_for_site(engine.clone(), site.id);

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            site_id: site.id,
            status: "queued".to_string(),
            message: format!("Forecast generation started for {}", site.name),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(rec: Option<&str>, generated_at: &str) -> SiteListItem {
        SiteListItem {
            site: SiteResponse {
                id: Uuid::new_v4(),
                client: "Acme".to_string(),
                name: "Site".to_string(),
                postcode: "SW1A 1AA".to_string(),
                latitude: Some(51.5),
                longitude: Some(-0.14),
                elevation_m: 10,
                exposure: "urban".to_string(),
                exposure_display: exposure_display("urban"),
                is_active: true,
                job_complete: false,
            },
            latest_run: rec.map(|r| RunSummaryResponse {
                run_id: Uuid::new_v4(),
                forecast_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                generated_at: generated_at.parse().unwrap(),
                status: "success".to_string(),
                peak_risk: Some(42.0),
                recommendation: Some(r.to_string()),
            }),
        }
    }

    #[test]
    fn test_dashboard_counts() {
        let response = SiteListResponse::from_items(vec![
            item(Some("GO"), "2026-03-01T05:10:00Z"),
            item(Some("CAUTION"), "2026-03-01T05:12:00Z"),
            item(Some("CANCEL"), "2026-02-28T17:05:00Z"),
            item(None, "2026-03-01T05:00:00Z"),
        ]);
        assert_eq!(response.site_count, 4);
        assert_eq!(response.forecast_count, 3);
        assert_eq!(response.alert_count, 2);
        assert_eq!(
            response.latest_forecast_time,
            Some("2026-03-01T05:12:00Z".parse().unwrap())
        );
    }

    #[test]
    fn test_exposure_display() {
        assert_eq!(exposure_display("coastal"), Exposure::Coastal.display_name());
        assert_eq!(exposure_display("martian"), "martian");
    }

    #[test]
    fn test_site_list_item_flattens_site() {
        let json = serde_json::to_value(item(Some("GO"), "2026-03-01T05:10:00Z")).unwrap();
        assert_eq!(json["name"], "Site");
        assert_eq!(json["exposure"], "urban");
        assert_eq!(json["latest_run"]["recommendation"], "GO");
    }
}
