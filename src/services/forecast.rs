//! Site forecast pipeline.
//!
//! Fetch → Normalize → Combine → Evaluate → Persist, once per site and issue
//! time. One immutable `forecast_runs` row (plus its hourly rows) is written
//! per forecast date. Model failures degrade the ensemble; only a site where
//! every model fails gets `failed` runs.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::models::Site;
use crate::db::queries::{self, InsertForecastRunParams, InsertHourlyParams};
use crate::errors::AppError;
use crate::helpers::{
    dec_to_f64, f64_to_decimal_1dp, hourly_grid, opt_f64_to_decimal_1dp, round_1dp,
};
use crate::services::ensemble::{combine, CombinedHour, EnsembleConfig};
use crate::services::normalize::{normalize, NormalizedForecast, Variable};
use crate::services::open_meteo::{ForecastRequest, OpenMeteoClient, WeatherModel};
use crate::services::risk::{
    evaluate_hour, summarize_day, DaySummary, Exposure, HourlyRisk, RiskLevel, Thresholds,
};

/// Pipeline settings derived from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub forecast_days: u32,
    pub work_start_hour: u32,
    pub work_end_hour: u32,
    pub concurrency: usize,
    pub ensemble: EnsembleConfig,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            forecast_days: config.forecast_days,
            work_start_hour: config.work_start_hour,
            work_end_hour: config.work_end_hour,
            concurrency: config.forecast_concurrency,
            ensemble: EnsembleConfig::default(),
        }
    }
}

/// Everything a forecast run needs. Cheap to clone into background tasks.
#[derive(Clone)]
pub struct ForecastEngine {
    pub pool: PgPool,
    pub client: OpenMeteoClient,
    pub settings: EngineSettings,
}

/// Result of one persisted run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub site_id: Uuid,
    pub forecast_date: NaiveDate,
    /// "success" or "failed"
    pub status: String,
    pub peak_risk: Option<f64>,
    pub recommendation: Option<RiskLevel>,
}

/// Totals of a batch run across sites.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BatchSummary {
    pub sites: usize,
    pub sites_failed: usize,
    pub runs_success: usize,
    pub runs_failed: usize,
}

/// Evaluated ensemble hours for one forecast date.
#[derive(Debug, Clone)]
pub struct DayForecast {
    pub forecast_date: NaiveDate,
    pub hours: Vec<(CombinedHour, HourlyRisk)>,
    pub summary: Option<DaySummary>,
}

impl DayForecast {
    pub fn low_confidence_hours(&self) -> usize {
        self.hours.iter().filter(|(h, _)| h.low_confidence).count()
    }

    pub fn disagreement_hours(&self) -> usize {
        self.hours
            .iter()
            .filter(|(h, _)| !h.disagreement.is_empty())
            .count()
    }
}

/// Forecast dates starting today: `[today, today + days)`.
pub fn forecast_dates(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64)
        .map(|offset| today + Duration::days(offset))
        .collect()
}

/// Hourly grid covering every hour of the given dates.
pub(crate) fn grid_for_dates(dates: &[NaiveDate]) -> Vec<DateTime<Utc>> {
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return Vec::new();
    };
    let start = first.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    let end = (*last + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc());
    match (start, end) {
        (Some(start), Some(end)) => hourly_grid(start, end),
        _ => Vec::new(),
    }
}

/// Combine, evaluate and group normalized members by forecast date.
pub fn build_day_forecasts(
    members: &[NormalizedForecast],
    issued_at: DateTime<Utc>,
    dates: &[NaiveDate],
    thresholds: &Thresholds,
    exposure: Exposure,
    settings: &EngineSettings,
) -> Vec<DayForecast> {
    let combined = combine(members, issued_at, &settings.ensemble);

    dates
        .iter()
        .map(|&date| {
            let hours: Vec<(CombinedHour, HourlyRisk)> = combined
                .iter()
                .filter(|h| h.valid_time.date_naive() == date)
                .map(|h| (h.clone(), evaluate_hour(h, thresholds, exposure)))
                .collect();

            let timed: Vec<(DateTime<Utc>, HourlyRisk)> = hours
                .iter()
                .map(|(h, r)| (h.valid_time, r.clone()))
                .collect();
            let summary = summarize_day(&timed, settings.work_start_hour, settings.work_end_hour);

            DayForecast {
                forecast_date: date,
                hours,
                summary,
            }
        })
        .collect()
}

fn hourly_params(hour: &CombinedHour, risk: &HourlyRisk) -> InsertHourlyParams {
    let mean = |v: Variable| opt_f64_to_decimal_1dp(hour.mean(v));
    let spread = |v: Variable| opt_f64_to_decimal_1dp(hour.stats(v).map(|s| s.spread));

    InsertHourlyParams {
        valid_time: hour.valid_time,
        lead_hours: hour.lead_hours as i32,
        wind_speed: mean(Variable::WindSpeed),
        wind_gusts: mean(Variable::WindGust),
        precipitation: mean(Variable::Precipitation),
        temperature: mean(Variable::Temperature),
        visibility: mean(Variable::Visibility),
        wind_spread: spread(Variable::WindSpeed),
        gust_spread: spread(Variable::WindGust),
        precip_spread: spread(Variable::Precipitation),
        temp_spread: spread(Variable::Temperature),
        visibility_spread: spread(Variable::Visibility),
        members: hour.members as i32,
        hourly_risk: f64_to_decimal_1dp(risk.risk),
        risk_level: risk.level.as_str().to_string(),
        limiting_variable: risk.limiting.map(|v| v.key().to_string()),
        disagreement: hour.disagreement.iter().map(|v| v.key().to_string()).collect(),
        low_confidence: hour.low_confidence,
        escalated: risk.escalated,
    }
}

fn model_errors_json(errors: &[(WeatherModel, String)]) -> Value {
    let map: Map<String, Value> = errors
        .iter()
        .map(|(model, err)| (model.key().to_string(), Value::String(err.clone())))
        .collect();
    Value::Object(map)
}

/// Run the full pipeline for one site and persist one run per forecast date.
#[tracing::instrument(skip(engine, site), fields(site = %site.name, site_id = %site.id))]
pub async fn run_forecast_for_site(
    engine: &ForecastEngine,
    site: &Site,
) -> Result<Vec<RunOutcome>, AppError> {
    let (Some(lat), Some(lon)) = (site.latitude, site.longitude) else {
        return Err(AppError::BadRequest(format!(
            "Site '{}' has no coordinates",
            site.name
        )));
    };

    let profile = queries::get_active_threshold_profile(&engine.pool, site.id).await?;
    let thresholds = profile.as_ref().map(Thresholds::from).unwrap_or_default();
    let exposure = site.exposure.parse::<Exposure>().unwrap_or_else(|e| {
        tracing::warn!("{}, treating site as urban", e);
        Exposure::Urban
    });

    let issued_at = Utc::now();
    let dates = forecast_dates(issued_at.date_naive(), engine.settings.forecast_days);
    let (Some(&start_date), Some(&end_date)) = (dates.first(), dates.last()) else {
        return Ok(Vec::new());
    };

    let request = ForecastRequest {
        latitude: dec_to_f64(lat),
        longitude: dec_to_f64(lon),
        elevation_m: Some(site.elevation_m as f64),
        start_date,
        end_date,
    };

    let results = engine.client.fetch_models(&WeatherModel::ALL, &request).await;

    let grid = grid_for_dates(&dates);
    let mut members = Vec::new();
    let mut errors = Vec::new();
    for (model, result) in results {
        match result {
            Ok(raw) => {
                let member = normalize(&raw, &grid);
                tracing::debug!(
                    "{}: wind on {}/{} hours",
                    model.display_name(),
                    member.present_hours(Variable::WindSpeed),
                    grid.len()
                );
                members.push(member);
            }
            Err(e) => {
                tracing::warn!("{} fetch failed: {}", model.display_name(), e);
                errors.push((model, e.to_string()));
            }
        }
    }

    let models_used: Vec<String> = members.iter().map(|m| m.model.key().to_string()).collect();
    let model_errors = model_errors_json(&errors);
    let threshold_profile_id = profile.as_ref().map(|p| p.id);

    let base_run = |date: NaiveDate| InsertForecastRunParams {
        site_id: site.id,
        forecast_date: date,
        issued_at,
        generated_at: Utc::now(),
        status: "failed",
        peak_risk: None,
        recommendation: None,
        models_used: models_used.clone(),
        model_errors: model_errors.clone(),
        low_confidence_hours: 0,
        disagreement_hours: 0,
        threshold_profile_id,
        error_message: None,
    };

    let mut outcomes = Vec::with_capacity(dates.len());

    if members.is_empty() {
        let message = format!(
            "All models failed: {}",
            errors
                .iter()
                .map(|(m, e)| format!("{}: {}", m, e))
                .collect::<Vec<_>>()
                .join("; ")
        );
        tracing::error!("{}", message);
        for &date in &dates {
            let run = InsertForecastRunParams {
                error_message: Some(message.clone()),
                ..base_run(date)
            };
            let run_id = queries::insert_forecast_run(&engine.pool, &run, &[]).await?;
            outcomes.push(RunOutcome {
                run_id,
                site_id: site.id,
                forecast_date: date,
                status: "failed".to_string(),
                peak_risk: None,
                recommendation: None,
            });
        }
        return Ok(outcomes);
    }

    let days = build_day_forecasts(
        &members,
        issued_at,
        &dates,
        &thresholds,
        exposure,
        &engine.settings,
    );

    for day in days {
        let hours: Vec<InsertHourlyParams> = day
            .hours
            .iter()
            .map(|(h, r)| hourly_params(h, r))
            .collect();

        let run = match &day.summary {
            Some(summary) => InsertForecastRunParams {
                status: "success",
                peak_risk: Some(f64_to_decimal_1dp(summary.peak_risk)),
                recommendation: Some(summary.recommendation.as_str().to_string()),
                low_confidence_hours: day.low_confidence_hours() as i32,
                disagreement_hours: day.disagreement_hours() as i32,
                ..base_run(day.forecast_date)
            },
            None => InsertForecastRunParams {
                error_message: Some(format!("No ensemble data for {}", day.forecast_date)),
                ..base_run(day.forecast_date)
            },
        };

        let run_id = queries::insert_forecast_run(&engine.pool, &run, &hours).await?;

        tracing::info!(
            "{} {}: {} (peak {:.0}%, {} hours, {} low-confidence)",
            site.name,
            day.forecast_date,
            day.summary
                .map(|s| s.recommendation.as_str())
                .unwrap_or("FAILED"),
            day.summary.map(|s| s.peak_risk).unwrap_or(0.0),
            hours.len(),
            day.low_confidence_hours(),
        );

        outcomes.push(RunOutcome {
            run_id,
            site_id: site.id,
            forecast_date: day.forecast_date,
            status: run.status.to_string(),
            peak_risk: day.summary.map(|s| round_1dp(s.peak_risk)),
            recommendation: day.summary.map(|s| s.recommendation),
        });
    }

    Ok(outcomes)
}

/// Forecast a single site by id.
pub async fn run_forecast_for_site_id(
    engine: &ForecastEngine,
    site_id: Uuid,
) -> Result<Vec<RunOutcome>, AppError> {
    let site = queries::get_site(&engine.pool, site_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Site {} not found", site_id)))?;

    if !site.is_forecastable() {
        return Err(AppError::BadRequest(format!(
            "Site '{}' is inactive, complete or has no coordinates",
            site.name
        )));
    }

    run_forecast_for_site(engine, &site).await
}

/// Forecast every active, incomplete site with coordinates.
///
/// Sites run with bounded concurrency; a failing site is logged and counted
/// but never aborts the batch.
pub async fn run_forecasts_all_active(engine: &ForecastEngine) -> Result<BatchSummary, AppError> {
    let sites = queries::list_forecastable_sites(&engine.pool).await?;
    let total = sites.len();
    tracing::info!(
        "Forecasting {} active sites (concurrency {})",
        total,
        engine.settings.concurrency
    );

    let results: Vec<Result<Vec<RunOutcome>, AppError>> = stream::iter(sites)
        .map(|site| async move {
            let result = run_forecast_for_site(engine, &site).await;
            if let Err(e) = &result {
                tracing::error!("Forecast failed for site {} ({}): {}", site.name, site.id, e);
            }
            result
        })
        .buffer_unordered(engine.settings.concurrency.max(1))
        .collect()
        .await;

    let mut summary = BatchSummary {
        sites: total,
        ..Default::default()
    };
    for result in results {
        match result {
            Ok(outcomes) => {
                for o in outcomes {
                    if o.status == "success" {
                        summary.runs_success += 1;
                    } else {
                        summary.runs_failed += 1;
                    }
                }
            }
            Err(_) => summary.sites_failed += 1,
        }
    }

    tracing::info!(
        "Forecast batch complete: {} sites, {} failed, {} successful runs, {} failed runs",
        summary.sites,
        summary.sites_failed,
        summary.runs_success,
        summary.runs_failed
    );
    Ok(summary)
}

/// Run a site's forecast in the background (fire-and-forget).
pub fn spawn_forecast_for_site(engine: ForecastEngine, site_id: Uuid) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match run_forecast_for_site_id(&engine, site_id).await {
            Ok(outcomes) => {
                tracing::info!(
                    "Background forecast for site {} complete: {} day(s)",
                    site_id,
                    outcomes.len()
                );
            }
            Err(e) => {
                tracing::error!("Background forecast for site {} failed: {}", site_id, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse::<NaiveDate>().unwrap()
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            forecast_days: 2,
            work_start_hour: 7,
            work_end_hour: 18,
            concurrency: 1,
            ensemble: EnsembleConfig::default(),
        }
    }

    /// Member with constant values over the first `hours` hours of the grid.
    fn member(model: WeatherModel, grid: &[DateTime<Utc>], hours: usize, wind: f64) -> NormalizedForecast {
        let col = |v: f64| -> Vec<Option<f64>> {
            (0..grid.len()).map(|i| (i < hours).then_some(v)).collect()
        };
        NormalizedForecast::from_columns(
            model,
            grid.to_vec(),
            &[
                (Variable::WindSpeed, col(wind)),
                (Variable::WindGust, col(wind + 4.0)),
                (Variable::Precipitation, col(0.0)),
                (Variable::Temperature, col(8.0)),
            ],
        )
    }

    #[test]
    fn test_forecast_dates() {
        assert_eq!(
            forecast_dates(date("2026-02-27"), 3),
            vec![date("2026-02-27"), date("2026-02-28"), date("2026-03-01")]
        );
        assert!(forecast_dates(date("2026-02-27"), 0).is_empty());
    }

    #[test]
    fn test_grid_for_dates_covers_whole_days() {
        let grid = grid_for_dates(&[date("2026-03-01"), date("2026-03-02")]);
        assert_eq!(grid.len(), 48);
        assert_eq!(grid[0], utc("2026-03-01T00:00:00Z"));
        assert_eq!(grid[47], utc("2026-03-02T23:00:00Z"));
        assert!(grid_for_dates(&[]).is_empty());
    }

    #[test]
    fn test_build_day_forecasts_groups_by_date() {
        let dates = [date("2026-03-01"), date("2026-03-02")];
        let grid = grid_for_dates(&dates);
        let members = vec![
            member(WeatherModel::Ukv, &grid, 48, 12.0),
            member(WeatherModel::Ecmwf, &grid, 48, 12.0),
        ];

        let days = build_day_forecasts(
            &members,
            utc("2026-03-01T05:00:00Z"),
            &dates,
            &Thresholds::default(),
            Exposure::Urban,
            &settings(),
        );

        assert_eq!(days.len(), 2);
        for day in &days {
            assert_eq!(day.hours.len(), 24);
            let summary = day.summary.unwrap();
            assert_eq!(summary.hours, 11);
            assert_eq!(summary.recommendation, RiskLevel::Caution);
            assert!((summary.peak_risk - 75.0).abs() < 1e-9);
            assert_eq!(day.low_confidence_hours(), 0);
            assert_eq!(day.disagreement_hours(), 0);
        }
    }

    #[test]
    fn test_build_day_forecasts_day_without_data() {
        let dates = [date("2026-03-01"), date("2026-03-02")];
        let grid = grid_for_dates(&dates);
        // Single member covering only the first day.
        let members = vec![member(WeatherModel::Ukv, &grid, 24, 3.0)];

        let days = build_day_forecasts(
            &members,
            utc("2026-03-01T05:00:00Z"),
            &dates,
            &Thresholds::default(),
            Exposure::Urban,
            &settings(),
        );

        assert_eq!(days[0].hours.len(), 24);
        assert_eq!(days[0].summary.unwrap().recommendation, RiskLevel::Go);
        assert_eq!(days[0].low_confidence_hours(), 24);
        assert!(days[1].hours.is_empty());
        assert!(days[1].summary.is_none());
    }

    #[test]
    fn test_hourly_params_rounds_and_labels() {
        let dates = [date("2026-03-01")];
        let grid = grid_for_dates(&dates);
        let members = vec![
            member(WeatherModel::Ukv, &grid, 24, 3.0),
            member(WeatherModel::IconEu, &grid, 24, 8.0),
        ];
        let days = build_day_forecasts(
            &members,
            utc("2026-03-01T05:00:00Z"),
            &dates,
            &Thresholds::default(),
            Exposure::Urban,
            &settings(),
        );
        let (hour, risk) = &days[0].hours[10];
        let params = hourly_params(hour, risk);

        assert_eq!(params.valid_time, utc("2026-03-01T10:00:00Z"));
        assert_eq!(params.lead_hours, 5);
        assert_eq!(params.members, 2);
        assert_eq!(params.wind_spread, Some(f64_to_decimal_1dp(5.0)));
        assert_eq!(params.disagreement, vec!["wind_speed".to_string()]);
        assert_eq!(params.risk_level, risk.level.as_str());
        assert!(params.visibility.is_none());
    }

    #[test]
    fn test_model_errors_json() {
        let json = model_errors_json(&[
            (WeatherModel::Ecmwf, "HTTP 503".to_string()),
            (WeatherModel::Arpege, "timeout".to_string()),
        ]);
        assert_eq!(
            json,
            serde_json::json!({ "ecmwf": "HTTP 503", "arpege": "timeout" })
        );
        assert_eq!(model_errors_json(&[]), serde_json::json!({}));
    }
}
