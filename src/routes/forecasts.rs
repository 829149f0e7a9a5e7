//! Forecast HTTP endpoints.
//!
//! - GET /api/v1/sites/:id/forecast
//! - GET /api/v1/forecasts/runs/:run_id

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::{models, queries};
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{dec_to_f64, opt_dec_to_f64, round_1dp};
use crate::routes::sites::{exposure_display, load_site, RunSummaryResponse};
use crate::services::risk::Thresholds;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Site header of the chart feed.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChartSite {
    pub name: String,
    pub postcode: String,
    /// Human-readable exposure
    pub exposure: String,
}

/// One hour on the forecast chart. Values rounded to 1 dp; missing means
/// no ensemble member had the variable.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChartHour {
    pub time: DateTime<Utc>,
    /// Mean wind speed (m/s)
    pub wind_speed: Option<f64>,
    /// Gust speed (m/s)
    pub wind_gusts: Option<f64>,
    /// Precipitation (mm/h)
    pub precipitation: Option<f64>,
    /// Temperature (°C)
    pub temperature: Option<f64>,
    /// Visibility (m)
    pub visibility: Option<f64>,
    pub wind_spread: Option<f64>,
    pub gust_spread: Option<f64>,
    pub precip_spread: Option<f64>,
    pub temp_spread: Option<f64>,
    /// Hourly risk 0–100
    pub risk: f64,
    /// GO, CAUTION or CANCEL
    pub risk_level: String,
    pub low_confidence: bool,
    pub escalated: bool,
}

impl From<&models::HourlyForecast> for ChartHour {
    fn from(h: &models::HourlyForecast) -> Self {
        let r1 = |v| opt_dec_to_f64(v).map(round_1dp);
        Self {
            time: h.valid_time,
            wind_speed: r1(h.wind_speed),
            wind_gusts: r1(h.wind_gusts),
            precipitation: r1(h.precipitation),
            temperature: r1(h.temperature),
            visibility: opt_dec_to_f64(h.visibility).map(f64::round),
            wind_spread: r1(h.wind_spread),
            gust_spread: r1(h.gust_spread),
            precip_spread: r1(h.precip_spread),
            temp_spread: r1(h.temp_spread),
            risk: round_1dp(dec_to_f64(h.hourly_risk)),
            risk_level: h.risk_level.clone(),
            low_confidence: h.low_confidence,
            escalated: h.escalated,
        }
    }
}

/// Run ids behind the chart, for inspection.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChartDebug {
    pub run_ids: Vec<Uuid>,
    pub hourly_count: usize,
}

/// Response for GET /api/v1/sites/:id/forecast.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChartDataResponse {
    pub site: ChartSite,
    pub thresholds: Thresholds,
    pub hourly: Vec<ChartHour>,
    pub debug: ChartDebug,
}

/// One hour of a stored run with full ensemble detail.
#[derive(Debug, Serialize, ToSchema)]
pub struct HourlyResponse {
    pub valid_time: DateTime<Utc>,
    pub lead_hours: i32,
    pub wind_speed: Option<f64>,
    pub wind_gusts: Option<f64>,
    pub precipitation: Option<f64>,
    pub temperature: Option<f64>,
    pub visibility: Option<f64>,
    pub wind_spread: Option<f64>,
    pub gust_spread: Option<f64>,
    pub precip_spread: Option<f64>,
    pub temp_spread: Option<f64>,
    pub visibility_spread: Option<f64>,
    /// Models contributing wind speed
    pub members: i32,
    pub hourly_risk: f64,
    pub risk_level: String,
    /// Variable that set the hourly risk
    pub limiting_variable: Option<String>,
    /// Variables whose ensemble spread exceeded tolerance
    pub disagreement: Vec<String>,
    pub low_confidence: bool,
    pub escalated: bool,
}

impl From<models::HourlyForecast> for HourlyResponse {
    fn from(h: models::HourlyForecast) -> Self {
        Self {
            valid_time: h.valid_time,
            lead_hours: h.lead_hours,
            wind_speed: opt_dec_to_f64(h.wind_speed),
            wind_gusts: opt_dec_to_f64(h.wind_gusts),
            precipitation: opt_dec_to_f64(h.precipitation),
            temperature: opt_dec_to_f64(h.temperature),
            visibility: opt_dec_to_f64(h.visibility),
            wind_spread: opt_dec_to_f64(h.wind_spread),
            gust_spread: opt_dec_to_f64(h.gust_spread),
            precip_spread: opt_dec_to_f64(h.precip_spread),
            temp_spread: opt_dec_to_f64(h.temp_spread),
            visibility_spread: opt_dec_to_f64(h.visibility_spread),
            members: h.members,
            hourly_risk: dec_to_f64(h.hourly_risk),
            risk_level: h.risk_level,
            limiting_variable: h.limiting_variable,
            disagreement: h.disagreement,
            low_confidence: h.low_confidence,
            escalated: h.escalated,
        }
    }
}

/// Response for GET /api/v1/forecasts/runs/:run_id.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunDetailResponse {
    pub site_id: Uuid,
    #[serde(flatten)]
    pub summary: RunSummaryResponse,
    pub issued_at: DateTime<Utc>,
    pub models_used: Vec<String>,
    /// Model key → fetch error for members that failed
    #[schema(value_type = Object)]
    pub model_errors: serde_json::Value,
    pub hours_count: i32,
    pub low_confidence_hours: i32,
    pub disagreement_hours: i32,
    pub threshold_profile_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub hourly: Vec<HourlyResponse>,
}

/// First forecast date shown on the chart: yesterday, so the early hours of
/// today stay visible when today's run came from yesterday's cycle.
fn chart_from_date(today: NaiveDate) -> NaiveDate {
    today - Duration::days(1)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Hourly chart data for a site.
///
/// Uses the latest successful run for each forecast date from yesterday
/// onwards, merged into one hourly series, plus the active thresholds.
#[utoipa::path(
    get,
    path = "/api/v1/sites/{id}/forecast",
    tag = "Forecasts",
    params(
        ("id" = Uuid, Path, description = "Site UUID"),
    ),
    responses(
        (status = 200, description = "Chart data for the site", body = ChartDataResponse),
        (status = 404, description = "Site not found", body = ErrorResponse),
    )
)]
pub async fn get_site_forecast(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChartDataResponse>, AppError> {
    let site = load_site(&pool, id).await?;
    let today = Utc::now().date_naive();

    let runs = queries::get_latest_runs_for_site(&pool, site.id, chart_from_date(today)).await?;
    let run_ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();

    let mut hours = queries::get_hourly_for_runs(&pool, &run_ids).await?;
    hours.sort_by_key(|h| h.valid_time);
    let hourly: Vec<ChartHour> = hours.iter().map(ChartHour::from).collect();

    let thresholds = queries::get_active_threshold_profile(&pool, site.id)
        .await?
        .as_ref()
        .map(Thresholds::from)
        .unwrap_or_default();

    Ok(Json(ChartDataResponse {
        site: ChartSite {
            name: site.name.clone(),
            postcode: site.postcode.clone(),
            exposure: exposure_display(&site.exposure),
        },
        thresholds,
        debug: ChartDebug {
            run_ids,
            hourly_count: hourly.len(),
        },
        hourly,
    }))
}

/// A stored forecast run with all of its hours.
#[utoipa::path(
    get,
    path = "/api/v1/forecasts/runs/{run_id}",
    tag = "Forecasts",
    params(
        ("run_id" = Uuid, Path, description = "Forecast run UUID"),
    ),
    responses(
        (status = 200, description = "Forecast run detail", body = RunDetailResponse),
        (status = 404, description = "Run not found", body = ErrorResponse),
    )
)]
pub async fn get_forecast_run(
    State(pool): State<PgPool>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunDetailResponse>, AppError> {
    let run = queries::get_forecast_run(&pool, run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Forecast run {} not found", run_id)))?;

    let hours = queries::get_hourly_for_runs(&pool, &[run.id]).await?;

    Ok(Json(RunDetailResponse {
        site_id: run.site_id,
        summary: RunSummaryResponse::from(&run),
        issued_at: run.issued_at,
        models_used: run.models_used,
        model_errors: run.model_errors,
        hours_count: run.hours_count,
        low_confidence_hours: run.low_confidence_hours,
        disagreement_hours: run.disagreement_hours,
        threshold_profile_id: run.threshold_profile_id,
        error_message: run.error_message,
        hourly: hours.into_iter().map(HourlyResponse::from).collect(),
    }))
}
