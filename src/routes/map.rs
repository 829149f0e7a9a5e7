//! Map feed HTTP endpoints.
//!
//! - GET /api/v1/map/sites?date=YYYY-MM-DD
//! - GET /api/v1/map/sites-hourly?date=YYYY-MM-DD
//! - GET /api/v1/map/risk-grid?date=YYYY-MM-DD&time=ISO8601
//! - GET /api/v1/map/uk-risk?date=YYYY-MM-DD

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::{models, queries};
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{dec_to_f64, floor_to_hour, opt_dec_to_f64, round_1dp};
use crate::services::risk_map::RiskMapPoint;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct DateQuery {
    /// Forecast date (defaults to today, UTC)
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GridQuery {
    /// Forecast date of the grid run (defaults to the latest run)
    pub date: Option<NaiveDate>,
    /// Valid time to return (ISO 8601); defaults to the current hour
    pub time: Option<String>,
}

fn date_or_today(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| Utc::now().date_naive())
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A site marker with its latest run for the date.
#[derive(Debug, Serialize, ToSchema)]
pub struct MapSite {
    pub site_id: Uuid,
    pub client: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub exposure: String,
    /// "success", "failed" or null when no run exists
    pub run_status: Option<String>,
    pub peak_risk: Option<f64>,
    pub recommendation: Option<String>,
}

/// Hourly risk at a site marker.
#[derive(Debug, Serialize, ToSchema)]
pub struct MapHour {
    pub time: DateTime<Utc>,
    pub risk: f64,
    pub risk_level: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MapSiteHourly {
    pub site_id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub hours: Vec<MapHour>,
}

/// Metadata of a risk grid run.
#[derive(Debug, Serialize, ToSchema)]
pub struct GridRunInfo {
    pub run_id: Uuid,
    pub forecast_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub resolution: f64,
    pub model: String,
    pub grid_points: i32,
    pub failed_points: i32,
    pub num_hours: i32,
    /// [lat_min, lon_min, lat_max, lon_max]
    pub bounds: [f64; 4],
}

impl From<&models::RiskGridRun> for GridRunInfo {
    fn from(r: &models::RiskGridRun) -> Self {
        Self {
            run_id: r.id,
            forecast_date: r.forecast_date,
            generated_at: r.generated_at,
            resolution: r.resolution,
            model: r.model.clone(),
            grid_points: r.grid_points,
            failed_points: r.failed_points,
            num_hours: r.num_hours,
            bounds: [r.lat_min, r.lon_min, r.lat_max, r.lon_max],
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GridPointResponse {
    pub lat: f64,
    pub lon: f64,
    pub wind_speed: f32,
    pub wind_gusts: f32,
    pub precipitation: f32,
    pub temperature: f32,
    pub risk: f32,
}

/// Response for GET /api/v1/map/risk-grid.
#[derive(Debug, Serialize, ToSchema)]
pub struct RiskGridResponse {
    /// Null when no successful grid run exists
    pub run: Option<GridRunInfo>,
    /// All valid times available in the run
    pub times: Vec<DateTime<Utc>>,
    pub valid_time: Option<DateTime<Utc>>,
    pub points: Vec<GridPointResponse>,
}

/// Response for GET /api/v1/map/uk-risk.
#[derive(Debug, Serialize, ToSchema)]
pub struct UkRiskMapResponse {
    pub id: Uuid,
    pub forecast_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub peak_risk: Option<f64>,
    pub site_count: i32,
    pub points: Vec<RiskMapPoint>,
}

/// Pick the grid time to show: the requested one if present, else the first
/// time at or after `now` (floored to the hour), else the last available.
fn select_grid_time(
    times: &[DateTime<Utc>],
    requested: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if let Some(t) = requested {
        let t = floor_to_hour(t);
        return times.contains(&t).then_some(t);
    }
    let current = floor_to_hour(now);
    times
        .iter()
        .copied()
        .find(|t| *t >= current)
        .or_else(|| times.last().copied())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Active site markers with their latest run for a date.
#[utoipa::path(
    get,
    path = "/api/v1/map/sites",
    tag = "Map",
    params(DateQuery),
    responses(
        (status = 200, description = "Site markers", body = Vec<MapSite>),
    )
)]
pub async fn map_sites(
    State(pool): State<PgPool>,
    Query(params): Query<DateQuery>,
) -> Result<Json<Vec<MapSite>>, AppError> {
    let date = date_or_today(params.date);
    let sites = queries::list_sites(&pool).await?;
    let mut runs: HashMap<Uuid, models::ForecastRun> = queries::get_latest_runs_for_date(&pool, date)
        .await?
        .into_iter()
        .map(|r| (r.site_id, r))
        .collect();

    let markers = sites
        .into_iter()
        .filter(|s| s.is_active)
        .filter_map(|s| {
            let latitude = dec_to_f64(s.latitude?);
            let longitude = dec_to_f64(s.longitude?);
            let run = runs.remove(&s.id);
            Some(MapSite {
                site_id: s.id,
                client: s.client_name,
                name: s.name,
                latitude,
                longitude,
                exposure: s.exposure,
                run_status: run.as_ref().map(|r| r.status.clone()),
                peak_risk: run
                    .as_ref()
                    .and_then(|r| opt_dec_to_f64(r.peak_risk))
                    .map(round_1dp),
                recommendation: run.and_then(|r| r.recommendation),
            })
        })
        .collect();

    Ok(Json(markers))
}

/// Hourly risk per site for a date, for the map time slider.
#[utoipa::path(
    get,
    path = "/api/v1/map/sites-hourly",
    tag = "Map",
    params(DateQuery),
    responses(
        (status = 200, description = "Hourly risk per site", body = Vec<MapSiteHourly>),
    )
)]
pub async fn map_sites_hourly(
    State(pool): State<PgPool>,
    Query(params): Query<DateQuery>,
) -> Result<Json<Vec<MapSiteHourly>>, AppError> {
    let date = date_or_today(params.date);
    let runs = queries::get_latest_successful_runs_for_date(&pool, date).await?;
    let run_ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
    let sites: HashMap<Uuid, models::Site> = queries::list_sites(&pool)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut by_run: HashMap<Uuid, Vec<MapHour>> = HashMap::new();
    for h in queries::get_hourly_for_runs(&pool, &run_ids).await? {
        by_run.entry(h.run_id).or_default().push(MapHour {
            time: h.valid_time,
            risk: round_1dp(dec_to_f64(h.hourly_risk)),
            risk_level: h.risk_level,
        });
    }

    let mut result: Vec<MapSiteHourly> = runs
        .iter()
        .filter_map(|run| {
            let site = sites.get(&run.site_id)?;
            Some(MapSiteHourly {
                site_id: site.id,
                name: site.name.clone(),
                latitude: dec_to_f64(site.latitude?),
                longitude: dec_to_f64(site.longitude?),
                hours: by_run.remove(&run.id).unwrap_or_default(),
            })
        })
        .collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(result))
}

/// UK risk grid heatmap at one valid time.
#[utoipa::path(
    get,
    path = "/api/v1/map/risk-grid",
    tag = "Map",
    params(GridQuery),
    responses(
        (status = 200, description = "Grid points at the selected time", body = RiskGridResponse),
        (status = 400, description = "Invalid time", body = ErrorResponse),
    )
)]
pub async fn map_risk_grid(
    State(pool): State<PgPool>,
    Query(params): Query<GridQuery>,
) -> Result<Json<RiskGridResponse>, AppError> {
    let requested = params
        .time
        .as_deref()
        .map(|t| {
            t.parse::<DateTime<Utc>>()
                .map_err(|e| AppError::BadRequest(format!("Invalid time: {}", e)))
        })
        .transpose()?;

    let Some(run) = queries::get_latest_risk_grid_run(&pool, params.date).await? else {
        return Ok(Json(RiskGridResponse {
            run: None,
            times: Vec::new(),
            valid_time: None,
            points: Vec::new(),
        }));
    };

    let times = queries::get_risk_grid_times(&pool, run.id).await?;
    let valid_time = select_grid_time(&times, requested, Utc::now());

    let points = match valid_time {
        Some(t) => queries::get_risk_grid_points(&pool, run.id, t)
            .await?
            .into_iter()
            .map(|p| GridPointResponse {
                lat: p.latitude,
                lon: p.longitude,
                wind_speed: p.wind_speed,
                wind_gusts: p.wind_gusts,
                precipitation: p.precipitation,
                temperature: p.temperature,
                risk: p.risk,
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(Json(RiskGridResponse {
        run: Some(GridRunInfo::from(&run)),
        times,
        valid_time,
        points,
    }))
}

/// Latest UK risk map snapshot for a date.
#[utoipa::path(
    get,
    path = "/api/v1/map/uk-risk",
    tag = "Map",
    params(DateQuery),
    responses(
        (status = 200, description = "UK risk map", body = UkRiskMapResponse),
        (status = 404, description = "No risk map for the date", body = ErrorResponse),
    )
)]
pub async fn map_uk_risk(
    State(pool): State<PgPool>,
    Query(params): Query<DateQuery>,
) -> Result<Json<UkRiskMapResponse>, AppError> {
    let date = date_or_today(params.date);
    let map = queries::get_latest_uk_risk_map(&pool, date)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No UK risk map for {}", date)))?;

    let points: Vec<RiskMapPoint> = serde_json::from_value(map.points)
        .map_err(|e| AppError::InternalError(format!("Corrupt risk map points: {}", e)))?;

    Ok(Json(UkRiskMapResponse {
        id: map.id,
        forecast_date: map.forecast_date,
        generated_at: map.generated_at,
        peak_risk: opt_dec_to_f64(map.peak_risk),
        site_count: map.site_count,
        points,
    }))
}
