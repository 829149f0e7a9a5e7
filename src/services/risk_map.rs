//! UK risk map: a per-date roll-up of the latest successful run of every
//! active site, stored as a snapshot for the map view.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::{ForecastRun, Site, UkRiskMap};
use crate::db::queries;
use crate::errors::AppError;
use crate::helpers::{dec_to_f64, f64_to_decimal_1dp, opt_dec_to_f64, round_1dp};

/// One site marker on the UK risk map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RiskMapPoint {
    pub site_id: Uuid,
    pub run_id: Uuid,
    pub client: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub peak_risk: Option<f64>,
    /// GO, CAUTION or CANCEL
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskMapAggregate {
    pub peak_risk: Option<f64>,
    pub points: Vec<RiskMapPoint>,
}

/// Join runs to their sites and find the overall peak.
///
/// Runs whose site is unknown or has no coordinates are left off the map.
/// Points are ordered by descending peak risk, then site name.
pub fn aggregate_runs(runs: &[ForecastRun], sites: &HashMap<Uuid, Site>) -> RiskMapAggregate {
    let mut points: Vec<RiskMapPoint> = runs
        .iter()
        .filter_map(|run| {
            let site = sites.get(&run.site_id)?;
            Some(RiskMapPoint {
                site_id: site.id,
                run_id: run.id,
                client: site.client_name.clone(),
                name: site.name.clone(),
                latitude: dec_to_f64(site.latitude?),
                longitude: dec_to_f64(site.longitude?),
                peak_risk: opt_dec_to_f64(run.peak_risk).map(round_1dp),
                recommendation: run.recommendation.clone(),
            })
        })
        .collect();

    points.sort_by(|a, b| {
        b.peak_risk
            .unwrap_or(-1.0)
            .total_cmp(&a.peak_risk.unwrap_or(-1.0))
            .then_with(|| a.name.cmp(&b.name))
    });

    let peak_risk = points
        .iter()
        .filter_map(|p| p.peak_risk)
        .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.max(r))));

    RiskMapAggregate { peak_risk, points }
}

/// Build and store the UK risk map for one forecast date.
pub async fn build_uk_risk_map(pool: &PgPool, forecast_date: NaiveDate) -> Result<UkRiskMap, AppError> {
    let runs = queries::get_latest_successful_runs_for_date(pool, forecast_date).await?;
    let sites: HashMap<Uuid, Site> = queries::list_sites(pool)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let aggregate = aggregate_runs(&runs, &sites);
    let points = serde_json::to_value(&aggregate.points)
        .map_err(|e| AppError::InternalError(format!("Failed to serialize risk map: {}", e)))?;

    let map = queries::insert_uk_risk_map(
        pool,
        forecast_date,
        aggregate.peak_risk.map(f64_to_decimal_1dp),
        aggregate.points.len() as i32,
        points,
    )
    .await?;

    tracing::info!(
        "UK risk map for {}: {} sites, peak {:?}",
        forecast_date,
        map.site_count,
        aggregate.peak_risk
    );
    Ok(map)
}

/// Build maps for several dates; a failing date is logged and skipped.
pub async fn build_uk_risk_maps(pool: &PgPool, dates: &[NaiveDate]) -> usize {
    let mut built = 0;
    for &date in dates {
        match build_uk_risk_map(pool, date).await {
            Ok(_) => built += 1,
            Err(e) => tracing::error!("Failed to build UK risk map for {}: {}", date, e),
        }
    }
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn site(name: &str, coords: Option<(i64, i64)>) -> Site {
        Site {
            id: Uuid::new_v4(),
            client_name: "Acme".to_string(),
            name: name.to_string(),
            postcode: String::new(),
            latitude: coords.map(|c| Decimal::new(c.0, 1)),
            longitude: coords.map(|c| Decimal::new(c.1, 1)),
            elevation_m: 0,
            exposure: "urban".to_string(),
            is_active: true,
            job_complete: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn run(site_id: Uuid, peak: Option<Decimal>, rec: Option<&str>) -> ForecastRun {
        ForecastRun {
            id: Uuid::new_v4(),
            site_id,
            forecast_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            issued_at: Utc::now(),
            generated_at: Utc::now(),
            status: "success".to_string(),
            peak_risk: peak,
            recommendation: rec.map(String::from),
            models_used: vec!["ukv".to_string()],
            model_errors: serde_json::json!({}),
            hours_count: 24,
            low_confidence_hours: 0,
            disagreement_hours: 0,
            threshold_profile_id: None,
            error_message: None,
        }
    }

    #[test]
    fn test_aggregate_orders_by_risk_and_finds_peak() {
        let a = site("Alpha", Some((515, -1)));
        let b = site("Bravo", Some((560, -40)));
        let runs = vec![
            run(a.id, Some(Decimal::new(325, 1)), Some("GO")),
            run(b.id, Some(Decimal::new(810, 1)), Some("CAUTION")),
        ];
        let sites: HashMap<Uuid, Site> = [a, b].into_iter().map(|s| (s.id, s)).collect();

        let agg = aggregate_runs(&runs, &sites);
        assert_eq!(agg.peak_risk, Some(81.0));
        assert_eq!(agg.points.len(), 2);
        assert_eq!(agg.points[0].name, "Bravo");
        assert_eq!(agg.points[0].latitude, 56.0);
        assert_eq!(agg.points[0].longitude, -4.0);
        assert_eq!(agg.points[1].peak_risk, Some(32.5));
        assert_eq!(agg.points[1].recommendation.as_deref(), Some("GO"));
    }

    #[test]
    fn test_aggregate_skips_unknown_and_unlocated_sites() {
        let located = site("Located", Some((515, -1)));
        let unlocated = site("Nowhere", None);
        let runs = vec![
            run(located.id, Some(Decimal::new(100, 1)), Some("GO")),
            run(unlocated.id, Some(Decimal::new(900, 1)), Some("CAUTION")),
            run(Uuid::new_v4(), Some(Decimal::new(1000, 1)), Some("CANCEL")),
        ];
        let sites: HashMap<Uuid, Site> =
            [located, unlocated].into_iter().map(|s| (s.id, s)).collect();

        let agg = aggregate_runs(&runs, &sites);
        assert_eq!(agg.points.len(), 1);
        assert_eq!(agg.peak_risk, Some(10.0));
    }

    #[test]
    fn test_aggregate_empty() {
        let agg = aggregate_runs(&[], &HashMap::new());
        assert!(agg.points.is_empty());
        assert_eq!(agg.peak_risk, None);
    }
}
