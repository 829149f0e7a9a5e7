//! UK-wide gridded risk for the map heatmap.
//!
//! Fetches a single model at every point of a regular lat/lon grid over the
//! UK, scores each hour against the default threshold profile (no site
//! exposure) and stores the result as one grid run. A new successful run
//! replaces older successful runs for the same forecast date.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::RiskGridPoint;
use crate::db::queries::{self, NewRiskGridRun};
use crate::errors::AppError;
use crate::services::forecast::{forecast_dates, grid_for_dates};
use crate::services::normalize::{normalize, NormalizedForecast, Variable};
use crate::services::open_meteo::{ForecastRequest, OpenMeteoClient, WeatherModel};
use crate::services::risk::{calculate_hourly_risk, Thresholds};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Mainland GB plus Northern Ireland.
pub const UK_BOUNDS: BoundingBox = BoundingBox {
    lat_min: 49.9,
    lat_max: 58.7,
    lon_min: -7.6,
    lon_max: 1.8,
};

/// Grid spacing in degrees (~55 km).
pub const DEFAULT_RESOLUTION: f64 = 0.5;

pub const DEFAULT_DAYS: u32 = 3;

/// A single model keeps the number of API calls manageable.
pub const DEFAULT_MODEL: WeatherModel = WeatherModel::Ecmwf;

/// Pause between grid point requests (milliseconds).
const POINT_DELAY_MS: u64 = 100;

/// Log progress every N points.
const PROGRESS_EVERY: usize = 10;

/// Substitutes for missing values: calm, dry and mild.
const FALLBACK_WIND: f64 = 0.0;
const FALLBACK_PRECIP: f64 = 0.0;
const FALLBACK_TEMPERATURE: f64 = 10.0;

/// Finest resolution accepted, to keep the point count bounded.
const MIN_RESOLUTION: f64 = 0.05;

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Axis values `min, min + step, ...` up to the first value at or beyond `max`.
///
/// The last value may overshoot `max` by less than one step so the edge of
/// the box is always covered.
fn axis_values(min: f64, max: f64, step: f64) -> Vec<f64> {
    let count = (((max + step) - min) / step - 1e-9).ceil().max(1.0) as usize;
    (0..count)
        .map(|i| ((min + i as f64 * step) * 10_000.0).round() / 10_000.0)
        .collect()
}

/// Enumerate `(latitude, longitude)` grid points, latitude-major.
pub fn build_grid_points(bounds: &BoundingBox, resolution: f64) -> Result<Vec<(f64, f64)>, AppError> {
    if !resolution.is_finite() || resolution < MIN_RESOLUTION {
        return Err(AppError::BadRequest(format!(
            "Grid resolution must be at least {}°, got {}",
            MIN_RESOLUTION, resolution
        )));
    }
    if bounds.lat_min > bounds.lat_max || bounds.lon_min > bounds.lon_max {
        return Err(AppError::BadRequest(format!(
            "Invalid bounding box {:?}",
            bounds
        )));
    }

    let lats = axis_values(bounds.lat_min, bounds.lat_max, resolution);
    let lons = axis_values(bounds.lon_min, bounds.lon_max, resolution);

    Ok(lats
        .iter()
        .flat_map(|&lat| lons.iter().map(move |&lon| (lat, lon)))
        .collect())
}

fn round_2dp(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Score every hour of one grid point's forecast.
///
/// Hours where the model has no value for any variable are skipped; otherwise
/// missing values fall back to calm, dry, mild conditions.
fn point_records(
    latitude: f64,
    longitude: f64,
    forecast: &NormalizedForecast,
    thresholds: &Thresholds,
) -> Vec<RiskGridPoint> {
    forecast
        .times
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            Variable::ALL
                .iter()
                .any(|&var| forecast.value(var, *idx).is_some())
        })
        .map(|(idx, &valid_time)| {
            let wind = forecast.value(Variable::WindSpeed, idx).unwrap_or(FALLBACK_WIND);
            let gust = forecast.value(Variable::WindGust, idx).unwrap_or(FALLBACK_WIND);
            let precip = forecast
                .value(Variable::Precipitation, idx)
                .unwrap_or(FALLBACK_PRECIP);
            let temp = forecast
                .value(Variable::Temperature, idx)
                .unwrap_or(FALLBACK_TEMPERATURE);
            let risk = calculate_hourly_risk(wind, gust, precip, temp, thresholds);

            RiskGridPoint {
                latitude,
                longitude,
                valid_time,
                wind_speed: round_2dp(wind) as f32,
                wind_gusts: round_2dp(gust) as f32,
                precipitation: round_2dp(precip) as f32,
                temperature: round_2dp(temp) as f32,
                risk: round_2dp(risk) as f32,
            }
        })
        .collect()
}

/// Records per successful point. Zero successful points counts as one.
fn hours_per_point(records: usize, total_points: usize, failed_points: usize) -> i32 {
    let ok_points = total_points.saturating_sub(failed_points).max(1);
    (records / ok_points) as i32
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct GridOptions {
    pub resolution: f64,
    pub days: u32,
    pub model: WeatherModel,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            days: DEFAULT_DAYS,
            model: DEFAULT_MODEL,
        }
    }
}

/// Outcome of a grid generation run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GridSummary {
    pub run_id: Uuid,
    /// "success" or "failed"
    pub status: String,
    pub grid_points: usize,
    pub failed_points: usize,
    pub records: usize,
    pub num_hours: i32,
    /// Older successful runs for the same date that were removed.
    pub replaced_runs: u64,
}

/// Generate and store a UK risk grid for today and the following days.
pub async fn generate_risk_grid(
    pool: &PgPool,
    client: &OpenMeteoClient,
    options: GridOptions,
) -> Result<GridSummary, AppError> {
    if !(1..=16).contains(&options.days) {
        return Err(AppError::BadRequest(format!(
            "Grid days must be between 1 and 16, got {}",
            options.days
        )));
    }

    let points = build_grid_points(&UK_BOUNDS, options.resolution)?;
    let total_points = points.len();
    let today = Utc::now().date_naive();
    let dates = forecast_dates(today, options.days);
    let hour_grid = grid_for_dates(&dates);
    let end_date = dates.last().copied().unwrap_or(today);
    let thresholds = Thresholds::default();

    tracing::info!(
        "Generating UK risk grid: {} points at {}° resolution, model {}, {} to {}",
        total_points,
        options.resolution,
        options.model.display_name(),
        today,
        end_date
    );

    let run_id = queries::insert_risk_grid_run(
        pool,
        &NewRiskGridRun {
            forecast_date: today,
            lat_min: UK_BOUNDS.lat_min,
            lat_max: UK_BOUNDS.lat_max,
            lon_min: UK_BOUNDS.lon_min,
            lon_max: UK_BOUNDS.lon_max,
            resolution: options.resolution,
            grid_points: total_points as i32,
            model: options.model.key().to_string(),
        },
    )
    .await?;

    let started = std::time::Instant::now();
    let mut records: Vec<RiskGridPoint> = Vec::new();
    let mut failed_points = 0usize;

    for (idx, &(lat, lon)) in points.iter().enumerate() {
        if idx == 0 || (idx + 1) % PROGRESS_EVERY == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 { (idx + 1) as f64 / elapsed } else { 0.0 };
            tracing::info!(
                "  [{}/{}] ({:.2}°N, {:.2}°E) {:.1} pts/s",
                idx + 1,
                total_points,
                lat,
                lon,
                rate
            );
        }

        let request = ForecastRequest {
            latitude: lat,
            longitude: lon,
            elevation_m: None,
            start_date: today,
            end_date,
        };

        match client.fetch_model(options.model, &request).await {
            Ok(raw) => {
                let forecast = normalize(&raw, &hour_grid);
                records.extend(point_records(lat, lon, &forecast, &thresholds));
            }
            Err(e) => {
                tracing::warn!("Grid point ({:.2}, {:.2}) failed: {}", lat, lon, e);
                failed_points += 1;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(POINT_DELAY_MS)).await;
    }

    if records.is_empty() {
        let message = "No data fetched: all grid points failed";
        queries::fail_risk_grid_run(pool, run_id, failed_points as i32, message).await?;
        tracing::error!("Risk grid run {} failed: {}", run_id, message);
        return Ok(GridSummary {
            run_id,
            status: "failed".to_string(),
            grid_points: total_points,
            failed_points,
            records: 0,
            num_hours: 0,
            replaced_runs: 0,
        });
    }

    tracing::info!("Storing {} grid point records", records.len());
    if let Err(e) = queries::insert_risk_grid_points(pool, run_id, &records).await {
        tracing::error!("Risk grid storage failed: {}", e);
        queries::fail_risk_grid_run(pool, run_id, failed_points as i32, &e.to_string()).await?;
        return Err(AppError::DatabaseError(e));
    }

    let num_hours = hours_per_point(records.len(), total_points, failed_points);
    let replaced_runs =
        queries::complete_risk_grid_run(pool, run_id, failed_points as i32, num_hours).await?;

    tracing::info!(
        "Risk grid complete: {} records ({} points, {} failed) in {:.0}s",
        records.len(),
        total_points - failed_points,
        failed_points,
        started.elapsed().as_secs_f64()
    );

    Ok(GridSummary {
        run_id,
        status: "success".to_string(),
        grid_points: total_points,
        failed_points,
        records: records.len(),
        num_hours,
        replaced_runs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    #[test]
    fn test_uk_grid_point_count() {
        // 49.9..=58.9 is 19 latitudes, -7.6..=1.9 is 20 longitudes
        let points = build_grid_points(&UK_BOUNDS, 0.5).unwrap();
        assert_eq!(points.len(), 19 * 20);
        assert_eq!(points[0], (49.9, -7.6));
        assert_eq!(points[1], (49.9, -7.1));
        assert_eq!(points[20], (50.4, -7.6));
        assert_eq!(*points.last().unwrap(), (58.9, 1.9));
    }

    #[test]
    fn test_grid_covers_bounds() {
        let points = build_grid_points(&UK_BOUNDS, 0.25).unwrap();
        let max_lat = points.iter().map(|p| p.0).fold(f64::MIN, f64::max);
        let max_lon = points.iter().map(|p| p.1).fold(f64::MIN, f64::max);
        assert!(max_lat >= UK_BOUNDS.lat_max);
        assert!(max_lon >= UK_BOUNDS.lon_max);
        assert!(max_lat < UK_BOUNDS.lat_max + 0.25);
    }

    #[test]
    fn test_exact_multiple_is_inclusive() {
        let bounds = BoundingBox {
            lat_min: 50.0,
            lat_max: 51.0,
            lon_min: 0.0,
            lon_max: 0.0,
        };
        let points = build_grid_points(&bounds, 0.5).unwrap();
        // 50.0, 50.5, 51.0 (and numpy-style overshoot is not triggered)
        assert_eq!(points, vec![(50.0, 0.0), (50.5, 0.0), (51.0, 0.0)]);
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        assert!(build_grid_points(&UK_BOUNDS, 0.0).is_err());
        assert!(build_grid_points(&UK_BOUNDS, -0.5).is_err());
        assert!(build_grid_points(&UK_BOUNDS, f64::NAN).is_err());
    }

    #[test]
    fn test_point_records_apply_fallbacks() {
        let t0 = "2026-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let times = vec![t0, t0 + Duration::hours(1), t0 + Duration::hours(2)];
        let forecast = NormalizedForecast::from_columns(
            WeatherModel::Ecmwf,
            times,
            &[
                (Variable::WindSpeed, vec![Some(12.0), None, None]),
                (Variable::Temperature, vec![None, Some(-5.0), None]),
            ],
        );

        let records = point_records(52.0, -1.0, &forecast, &Thresholds::default());
        // Third hour has no data at all and is skipped
        assert_eq!(records.len(), 2);

        // Wind 12 m/s is halfway between caution (10) and cancel (14)
        assert_eq!(records[0].wind_speed, 12.0);
        assert_eq!(records[0].temperature, 10.0);
        assert_eq!(records[0].risk, 75.0);

        // Missing wind falls back to calm; -5 °C is beyond the cancel limit
        assert_eq!(records[1].wind_speed, 0.0);
        assert_eq!(records[1].risk, 100.0);
    }

    #[test]
    fn test_hours_per_point() {
        assert_eq!(hours_per_point(72 * 10, 10, 0), 72);
        assert_eq!(hours_per_point(72 * 8, 10, 2), 72);
        assert_eq!(hours_per_point(0, 10, 10), 0);
    }
}
