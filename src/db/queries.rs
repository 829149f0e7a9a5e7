use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use utoipa::ToSchema;
use uuid::Uuid;

use super::models::{
    ChangeLogEntry, ForecastRun, HourlyForecast, RiskGridPoint, RiskGridRun, Site,
    ThresholdProfileRow, UkRiskMap,
};

/// Postgres caps a statement at 65535 bind parameters; 5000 rows × 9 columns stays well below.
pub const GRID_POINT_BATCH_SIZE: usize = 5000;

const SITE_COLUMNS: &str = "id, client_name, name, postcode, latitude, longitude, elevation_m,
     exposure, is_active, job_complete, created_at, updated_at";

const THRESHOLD_COLUMNS: &str = "id, site_id, version, is_active,
     wind_mean_caution, wind_mean_cancel, gust_caution, gust_cancel,
     precip_caution, precip_cancel, temp_min_caution, temp_min_cancel,
     visibility_min_caution, visibility_min_cancel, created_by, created_at";

const RUN_COLUMNS: &str = "id, site_id, forecast_date, issued_at, generated_at, status,
     peak_risk, recommendation, models_used, model_errors, hours_count,
     low_confidence_hours, disagreement_hours, threshold_profile_id, error_message";

const HOURLY_COLUMNS: &str = "id, run_id, valid_time, lead_hours,
     wind_speed, wind_gusts, precipitation, temperature, visibility,
     wind_spread, gust_spread, precip_spread, temp_spread, visibility_spread,
     members, hourly_risk, risk_level, limiting_variable, disagreement,
     low_confidence, escalated";

const GRID_RUN_COLUMNS: &str = "id, forecast_date, status, lat_min, lat_max, lon_min, lon_max,
     resolution, grid_points, failed_points, num_hours, model, error_message, generated_at";

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

/// Registry values for a site, as loaded from the data file.
#[derive(Debug, Clone)]
pub struct UpsertSiteParams {
    pub client_name: String,
    pub name: String,
    pub postcode: String,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub elevation_m: i32,
    pub exposure: String,
    pub is_active: bool,
    pub job_complete: bool,
}

/// What an upsert did to the stored site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteChange {
    Created,
    Updated,
    Deactivated,
    Unchanged,
}

impl SiteChange {
    /// Whether the change warrants a fresh forecast (the site's inputs moved).
    pub fn triggers_forecast(self) -> bool {
        matches!(self, SiteChange::Created | SiteChange::Updated)
    }
}

/// Field-level diff between a stored site and incoming registry values.
///
/// Missing incoming coordinates keep the stored ones (a failed geocode must
/// not erase a previously known position).
pub(crate) fn site_field_changes(existing: &Site, params: &UpsertSiteParams) -> Map<String, Value> {
    let mut changes = Map::new();
    let mut record = |field: &str, old: Value, new: Value| {
        if old != new {
            changes.insert(field.to_string(), json!({ "old": old, "new": new }));
        }
    };

    record("postcode", json!(existing.postcode), json!(params.postcode));
    if let Some(lat) = params.latitude {
        if existing.latitude != Some(lat) {
            record("latitude", json!(existing.latitude), json!(lat));
        }
    }
    if let Some(lon) = params.longitude {
        if existing.longitude != Some(lon) {
            record("longitude", json!(existing.longitude), json!(lon));
        }
    }
    record("elevation_m", json!(existing.elevation_m), json!(params.elevation_m));
    record("exposure", json!(existing.exposure), json!(params.exposure));
    record("is_active", json!(existing.is_active), json!(params.is_active));
    record("job_complete", json!(existing.job_complete), json!(params.job_complete));

    changes
}

/// Insert or update a site keyed on (client_name, name), logging the change.
pub async fn upsert_site(
    pool: &PgPool,
    params: &UpsertSiteParams,
    actor: Option<&str>,
) -> Result<(Site, SiteChange), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let select_sql = format!(
        "SELECT {} FROM sites WHERE client_name = $1 AND name = $2 FOR UPDATE",
        SITE_COLUMNS
    );
    let existing = sqlx::query_as::<_, Site>(&select_sql)
        .bind(&params.client_name)
        .bind(&params.name)
        .fetch_optional(&mut *tx)
        .await?;

    let (site, change) = match existing {
        None => {
            let insert_sql = format!(
                "INSERT INTO sites (id, client_name, name, postcode, latitude, longitude,
                                    elevation_m, exposure, is_active, job_complete)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING {}",
                SITE_COLUMNS
            );
            let site = sqlx::query_as::<_, Site>(&insert_sql)
                .bind(Uuid::new_v4())
                .bind(&params.client_name)
                .bind(&params.name)
                .bind(&params.postcode)
                .bind(params.latitude)
                .bind(params.longitude)
                .bind(params.elevation_m)
                .bind(&params.exposure)
                .bind(params.is_active)
                .bind(params.job_complete)
                .fetch_one(&mut *tx)
                .await?;

            let details = json!({
                "client_name": site.client_name,
                "name": site.name,
                "postcode": site.postcode,
                "exposure": site.exposure,
            });
            insert_change_log(&mut tx, site.id, "site_created", details, actor).await?;
            (site, SiteChange::Created)
        }
        Some(existing) => {
            let changes = site_field_changes(&existing, params);
            if changes.is_empty() {
                (existing, SiteChange::Unchanged)
            } else {
                let update_sql = format!(
                    "UPDATE sites
                     SET postcode = $2,
                         latitude = COALESCE($3, latitude),
                         longitude = COALESCE($4, longitude),
                         elevation_m = $5,
                         exposure = $6,
                         is_active = $7,
                         job_complete = $8,
                         updated_at = NOW()
                     WHERE id = $1
                     RETURNING {}",
                    SITE_COLUMNS
                );
                let site = sqlx::query_as::<_, Site>(&update_sql)
                    .bind(existing.id)
                    .bind(&params.postcode)
                    .bind(params.latitude)
                    .bind(params.longitude)
                    .bind(params.elevation_m)
                    .bind(&params.exposure)
                    .bind(params.is_active)
                    .bind(params.job_complete)
                    .fetch_one(&mut *tx)
                    .await?;

                let change = if existing.is_active && !params.is_active {
                    SiteChange::Deactivated
                } else {
                    SiteChange::Updated
                };
                let action = match change {
                    SiteChange::Deactivated => "site_deactivated",
                    _ => "site_updated",
                };
                insert_change_log(&mut tx, site.id, action, Value::Object(changes), actor).await?;
                (site, change)
            }
        }
    };

    tx.commit().await?;
    Ok((site, change))
}

/// List all sites, ordered by client then site name.
pub async fn list_sites(pool: &PgPool) -> Result<Vec<Site>, sqlx::Error> {
    let sql = format!("SELECT {} FROM sites ORDER BY client_name, name", SITE_COLUMNS);
    sqlx::query_as::<_, Site>(&sql).fetch_all(pool).await
}

pub async fn get_site(pool: &PgPool, id: Uuid) -> Result<Option<Site>, sqlx::Error> {
    let sql = format!("SELECT {} FROM sites WHERE id = $1", SITE_COLUMNS);
    sqlx::query_as::<_, Site>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Look up a site by its registry key.
pub async fn get_site_by_key(
    pool: &PgPool,
    client_name: &str,
    name: &str,
) -> Result<Option<Site>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM sites WHERE client_name = $1 AND name = $2",
        SITE_COLUMNS
    );
    sqlx::query_as::<_, Site>(&sql)
        .bind(client_name)
        .bind(name)
        .fetch_optional(pool)
        .await
}

/// Active, incomplete sites with known coordinates.
pub async fn list_forecastable_sites(pool: &PgPool) -> Result<Vec<Site>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM sites
         WHERE is_active AND NOT job_complete
           AND latitude IS NOT NULL AND longitude IS NOT NULL
         ORDER BY client_name, name",
        SITE_COLUMNS
    );
    sqlx::query_as::<_, Site>(&sql).fetch_all(pool).await
}

// ---------------------------------------------------------------------------
// Threshold profiles & change log
// ---------------------------------------------------------------------------

/// Threshold values of a profile version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdParams {
    pub wind_mean_caution: Decimal,
    pub wind_mean_cancel: Decimal,
    pub gust_caution: Decimal,
    pub gust_cancel: Decimal,
    pub precip_caution: Decimal,
    pub precip_cancel: Decimal,
    pub temp_min_caution: Decimal,
    pub temp_min_cancel: Decimal,
    pub visibility_min_caution: Option<Decimal>,
    pub visibility_min_cancel: Option<Decimal>,
}

impl From<&ThresholdProfileRow> for ThresholdParams {
    fn from(row: &ThresholdProfileRow) -> Self {
        Self {
            wind_mean_caution: row.wind_mean_caution,
            wind_mean_cancel: row.wind_mean_cancel,
            gust_caution: row.gust_caution,
            gust_cancel: row.gust_cancel,
            precip_caution: row.precip_caution,
            precip_cancel: row.precip_cancel,
            temp_min_caution: row.temp_min_caution,
            temp_min_cancel: row.temp_min_cancel,
            visibility_min_caution: row.visibility_min_caution,
            visibility_min_cancel: row.visibility_min_cancel,
        }
    }
}

pub async fn get_active_threshold_profile(
    pool: &PgPool,
    site_id: Uuid,
) -> Result<Option<ThresholdProfileRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM threshold_profiles WHERE site_id = $1 AND is_active",
        THRESHOLD_COLUMNS
    );
    sqlx::query_as::<_, ThresholdProfileRow>(&sql)
        .bind(site_id)
        .fetch_optional(pool)
        .await
}

/// All profile versions for a site, newest first.
pub async fn list_threshold_profiles(
    pool: &PgPool,
    site_id: Uuid,
) -> Result<Vec<ThresholdProfileRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM threshold_profiles WHERE site_id = $1 ORDER BY version DESC",
        THRESHOLD_COLUMNS
    );
    sqlx::query_as::<_, ThresholdProfileRow>(&sql)
        .bind(site_id)
        .fetch_all(pool)
        .await
}

/// Make `params` the active threshold profile of a site.
///
/// Deactivates the current version, inserts version N+1 and logs the change,
/// all in one transaction. Returns `None` when the active profile already
/// holds identical values.
pub async fn replace_threshold_profile(
    pool: &PgPool,
    site_id: Uuid,
    params: &ThresholdParams,
    actor: Option<&str>,
) -> Result<Option<ThresholdProfileRow>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let current_sql = format!(
        "SELECT {} FROM threshold_profiles WHERE site_id = $1 AND is_active FOR UPDATE",
        THRESHOLD_COLUMNS
    );
    let current = sqlx::query_as::<_, ThresholdProfileRow>(&current_sql)
        .bind(site_id)
        .fetch_optional(&mut *tx)
        .await?;

    if let Some(cur) = &current {
        if ThresholdParams::from(cur) == *params {
            return Ok(None);
        }
    }

    sqlx::query("UPDATE threshold_profiles SET is_active = FALSE WHERE site_id = $1 AND is_active")
        .bind(site_id)
        .execute(&mut *tx)
        .await?;

    let next_version = sqlx::query_scalar::<_, i32>(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM threshold_profiles WHERE site_id = $1",
    )
    .bind(site_id)
    .fetch_one(&mut *tx)
    .await?;

    let insert_sql = format!(
        "INSERT INTO threshold_profiles (
            id, site_id, version, is_active,
            wind_mean_caution, wind_mean_cancel, gust_caution, gust_cancel,
            precip_caution, precip_cancel, temp_min_caution, temp_min_cancel,
            visibility_min_caution, visibility_min_cancel, created_by
        ) VALUES ($1, $2, $3, TRUE, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {}",
        THRESHOLD_COLUMNS
    );
    let profile = sqlx::query_as::<_, ThresholdProfileRow>(&insert_sql)
        .bind(Uuid::new_v4())
        .bind(site_id)
        .bind(next_version)
        .bind(params.wind_mean_caution)
        .bind(params.wind_mean_cancel)
        .bind(params.gust_caution)
        .bind(params.gust_cancel)
        .bind(params.precip_caution)
        .bind(params.precip_cancel)
        .bind(params.temp_min_caution)
        .bind(params.temp_min_cancel)
        .bind(params.visibility_min_caution)
        .bind(params.visibility_min_cancel)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

    let (action, details) = match &current {
        None => (
            "threshold_created",
            json!({ "version": next_version, "new": params }),
        ),
        Some(cur) => (
            "threshold_updated",
            json!({
                "version": next_version,
                "old": ThresholdParams::from(cur),
                "new": params,
            }),
        ),
    };
    insert_change_log(&mut tx, site_id, action, details, actor).await?;

    tx.commit().await?;
    Ok(Some(profile))
}

async fn insert_change_log(
    tx: &mut Transaction<'_, Postgres>,
    site_id: Uuid,
    action: &str,
    details: Value,
    actor: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO change_log (id, site_id, action, details, actor)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(site_id)
    .bind(action)
    .bind(details)
    .bind(actor)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Most recent change log entries for a site.
pub async fn list_change_log(
    pool: &PgPool,
    site_id: Uuid,
    limit: i64,
) -> Result<Vec<ChangeLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, ChangeLogEntry>(
        "SELECT id, site_id, action, details, actor, timestamp
         FROM change_log
         WHERE site_id = $1
         ORDER BY timestamp DESC
         LIMIT $2",
    )
    .bind(site_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

// ---------------------------------------------------------------------------
// Forecast runs
// ---------------------------------------------------------------------------

/// Parameters for inserting a forecast run.
pub struct InsertForecastRunParams {
    pub site_id: Uuid,
    pub forecast_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub status: &'static str,
    pub peak_risk: Option<Decimal>,
    pub recommendation: Option<String>,
    pub models_used: Vec<String>,
    pub model_errors: Value,
    pub low_confidence_hours: i32,
    pub disagreement_hours: i32,
    pub threshold_profile_id: Option<Uuid>,
    pub error_message: Option<String>,
}

/// Parameters for one hourly row of a run.
pub struct InsertHourlyParams {
    pub valid_time: DateTime<Utc>,
    pub lead_hours: i32,
    pub wind_speed: Option<Decimal>,
    pub wind_gusts: Option<Decimal>,
    pub precipitation: Option<Decimal>,
    pub temperature: Option<Decimal>,
    pub visibility: Option<Decimal>,
    pub wind_spread: Option<Decimal>,
    pub gust_spread: Option<Decimal>,
    pub precip_spread: Option<Decimal>,
    pub temp_spread: Option<Decimal>,
    pub visibility_spread: Option<Decimal>,
    pub members: i32,
    pub hourly_risk: Decimal,
    pub risk_level: String,
    pub limiting_variable: Option<String>,
    pub disagreement: Vec<String>,
    pub low_confidence: bool,
    pub escalated: bool,
}

/// Insert a run and all of its hourly rows atomically. Returns the run id.
pub async fn insert_forecast_run(
    pool: &PgPool,
    run: &InsertForecastRunParams,
    hours: &[InsertHourlyParams],
) -> Result<Uuid, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let run_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO forecast_runs (
            id, site_id, forecast_date, issued_at, generated_at, status,
            peak_risk, recommendation, models_used, model_errors, hours_count,
            low_confidence_hours, disagreement_hours, threshold_profile_id, error_message
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(run_id)
    .bind(run.site_id)
    .bind(run.forecast_date)
    .bind(run.issued_at)
    .bind(run.generated_at)
    .bind(run.status)
    .bind(run.peak_risk)
    .bind(&run.recommendation)
    .bind(&run.models_used)
    .bind(&run.model_errors)
    .bind(hours.len() as i32)
    .bind(run.low_confidence_hours)
    .bind(run.disagreement_hours)
    .bind(run.threshold_profile_id)
    .bind(&run.error_message)
    .execute(&mut *tx)
    .await?;

    if !hours.is_empty() {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO hourly_forecasts ({}) ",
            HOURLY_COLUMNS
        ));
        builder.push_values(hours, |mut b, h| {
            b.push_bind(Uuid::new_v4())
                .push_bind(run_id)
                .push_bind(h.valid_time)
                .push_bind(h.lead_hours)
                .push_bind(h.wind_speed)
                .push_bind(h.wind_gusts)
                .push_bind(h.precipitation)
                .push_bind(h.temperature)
                .push_bind(h.visibility)
                .push_bind(h.wind_spread)
                .push_bind(h.gust_spread)
                .push_bind(h.precip_spread)
                .push_bind(h.temp_spread)
                .push_bind(h.visibility_spread)
                .push_bind(h.members)
                .push_bind(h.hourly_risk)
                .push_bind(h.risk_level.clone())
                .push_bind(h.limiting_variable.clone())
                .push_bind(h.disagreement.clone())
                .push_bind(h.low_confidence)
                .push_bind(h.escalated);
        });
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(run_id)
}

pub async fn get_forecast_run(pool: &PgPool, id: Uuid) -> Result<Option<ForecastRun>, sqlx::Error> {
    let sql = format!("SELECT {} FROM forecast_runs WHERE id = $1", RUN_COLUMNS);
    sqlx::query_as::<_, ForecastRun>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Latest successful run per forecast date for a site, from `from_date` onwards.
pub async fn get_latest_runs_for_site(
    pool: &PgPool,
    site_id: Uuid,
    from_date: NaiveDate,
) -> Result<Vec<ForecastRun>, sqlx::Error> {
    let sql = format!(
        "SELECT DISTINCT ON (forecast_date) {}
         FROM forecast_runs
         WHERE site_id = $1 AND forecast_date >= $2 AND status = 'success'
         ORDER BY forecast_date, generated_at DESC",
        RUN_COLUMNS
    );
    sqlx::query_as::<_, ForecastRun>(&sql)
        .bind(site_id)
        .bind(from_date)
        .fetch_all(pool)
        .await
}

/// Latest run of every site for one forecast date, whatever its status.
pub async fn get_latest_runs_for_date(
    pool: &PgPool,
    forecast_date: NaiveDate,
) -> Result<Vec<ForecastRun>, sqlx::Error> {
    let sql = format!(
        "SELECT DISTINCT ON (site_id) {}
         FROM forecast_runs
         WHERE forecast_date = $1
         ORDER BY site_id, generated_at DESC",
        RUN_COLUMNS
    );
    sqlx::query_as::<_, ForecastRun>(&sql)
        .bind(forecast_date)
        .fetch_all(pool)
        .await
}

/// Latest successful run per active, incomplete site for one forecast date.
pub async fn get_latest_successful_runs_for_date(
    pool: &PgPool,
    forecast_date: NaiveDate,
) -> Result<Vec<ForecastRun>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM forecast_runs
         WHERE id IN (
             SELECT DISTINCT ON (r.site_id) r.id
             FROM forecast_runs r
             JOIN sites s ON s.id = r.site_id
             WHERE r.forecast_date = $1
               AND r.status = 'success'
               AND s.is_active AND NOT s.job_complete
             ORDER BY r.site_id, r.generated_at DESC
         )",
        RUN_COLUMNS
    );
    sqlx::query_as::<_, ForecastRun>(&sql)
        .bind(forecast_date)
        .fetch_all(pool)
        .await
}

/// Latest successful run of each site, preferring runs for `preferred_date`
/// and otherwise the run with the latest forecast date.
pub async fn get_latest_successful_run_per_site(
    pool: &PgPool,
    preferred_date: NaiveDate,
) -> Result<Vec<ForecastRun>, sqlx::Error> {
    let sql = format!(
        "SELECT DISTINCT ON (site_id) {}
         FROM forecast_runs
         WHERE status = 'success'
         ORDER BY site_id, (forecast_date = $1) DESC, forecast_date DESC, generated_at DESC",
        RUN_COLUMNS
    );
    sqlx::query_as::<_, ForecastRun>(&sql)
        .bind(preferred_date)
        .fetch_all(pool)
        .await
}

/// When the most recent forecast run was written, if any.
pub async fn get_last_generated_at(pool: &PgPool) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>("SELECT MAX(generated_at) FROM forecast_runs")
        .fetch_one(pool)
        .await
}

/// Hourly rows for a set of runs, ordered by run then valid time.
pub async fn get_hourly_for_runs(
    pool: &PgPool,
    run_ids: &[Uuid],
) -> Result<Vec<HourlyForecast>, sqlx::Error> {
    if run_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM hourly_forecasts WHERE run_id = ANY($1) ORDER BY run_id, valid_time",
        HOURLY_COLUMNS
    );
    sqlx::query_as::<_, HourlyForecast>(&sql)
        .bind(run_ids)
        .fetch_all(pool)
        .await
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Row counts affected by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RetentionCounts {
    pub forecast_runs: i64,
    pub uk_risk_maps: i64,
    pub risk_grid_runs: i64,
}

pub async fn count_generated_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<RetentionCounts, sqlx::Error> {
    let (forecast_runs, uk_risk_maps, risk_grid_runs) = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT
            (SELECT COUNT(*) FROM forecast_runs WHERE generated_at < $1),
            (SELECT COUNT(*) FROM uk_risk_maps WHERE generated_at < $1),
            (SELECT COUNT(*) FROM risk_grid_runs WHERE generated_at < $1)",
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    Ok(RetentionCounts {
        forecast_runs,
        uk_risk_maps,
        risk_grid_runs,
    })
}

/// Delete runs, maps and grids generated before `cutoff`. Hourly rows and
/// grid points go with their parents via ON DELETE CASCADE.
pub async fn delete_generated_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<RetentionCounts, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let forecast_runs = sqlx::query("DELETE FROM forecast_runs WHERE generated_at < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let uk_risk_maps = sqlx::query("DELETE FROM uk_risk_maps WHERE generated_at < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let risk_grid_runs = sqlx::query("DELETE FROM risk_grid_runs WHERE generated_at < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    Ok(RetentionCounts {
        forecast_runs: forecast_runs as i64,
        uk_risk_maps: uk_risk_maps as i64,
        risk_grid_runs: risk_grid_runs as i64,
    })
}

// ---------------------------------------------------------------------------
// UK risk maps
// ---------------------------------------------------------------------------

pub async fn insert_uk_risk_map(
    pool: &PgPool,
    forecast_date: NaiveDate,
    peak_risk: Option<Decimal>,
    site_count: i32,
    points: Value,
) -> Result<UkRiskMap, sqlx::Error> {
    sqlx::query_as::<_, UkRiskMap>(
        "INSERT INTO uk_risk_maps (id, forecast_date, peak_risk, site_count, points)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, forecast_date, generated_at, peak_risk, site_count, points",
    )
    .bind(Uuid::new_v4())
    .bind(forecast_date)
    .bind(peak_risk)
    .bind(site_count)
    .bind(points)
    .fetch_one(pool)
    .await
}

pub async fn get_latest_uk_risk_map(
    pool: &PgPool,
    forecast_date: NaiveDate,
) -> Result<Option<UkRiskMap>, sqlx::Error> {
    sqlx::query_as::<_, UkRiskMap>(
        "SELECT id, forecast_date, generated_at, peak_risk, site_count, points
         FROM uk_risk_maps
         WHERE forecast_date = $1
         ORDER BY generated_at DESC
         LIMIT 1",
    )
    .bind(forecast_date)
    .fetch_optional(pool)
    .await
}

// ---------------------------------------------------------------------------
// Risk grid
// ---------------------------------------------------------------------------

/// Bounding box and settings of a new grid run.
pub struct NewRiskGridRun {
    pub forecast_date: NaiveDate,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub resolution: f64,
    pub grid_points: i32,
    pub model: String,
}

/// Record a grid run in `running` state.
pub async fn insert_risk_grid_run(pool: &PgPool, run: &NewRiskGridRun) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO risk_grid_runs (
            id, forecast_date, status, lat_min, lat_max, lon_min, lon_max,
            resolution, grid_points, model
        ) VALUES ($1, $2, 'running', $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(id)
    .bind(run.forecast_date)
    .bind(run.lat_min)
    .bind(run.lat_max)
    .bind(run.lon_min)
    .bind(run.lon_max)
    .bind(run.resolution)
    .bind(run.grid_points)
    .bind(&run.model)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Store grid points in batches of [`GRID_POINT_BATCH_SIZE`] within one transaction.
pub async fn insert_risk_grid_points(
    pool: &PgPool,
    run_id: Uuid,
    points: &[RiskGridPoint],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for chunk in points.chunks(GRID_POINT_BATCH_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO risk_grid_points (
                run_id, latitude, longitude, valid_time,
                wind_speed, wind_gusts, precipitation, temperature, risk
            ) ",
        );
        builder.push_values(chunk, |mut b, p| {
            b.push_bind(run_id)
                .push_bind(p.latitude)
                .push_bind(p.longitude)
                .push_bind(p.valid_time)
                .push_bind(p.wind_speed)
                .push_bind(p.wind_gusts)
                .push_bind(p.precipitation)
                .push_bind(p.temperature)
                .push_bind(p.risk);
        });
        builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Mark a grid run successful and drop older successful runs for the same date.
pub async fn complete_risk_grid_run(
    pool: &PgPool,
    run_id: Uuid,
    failed_points: i32,
    num_hours: i32,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let forecast_date = sqlx::query_scalar::<_, NaiveDate>(
        "UPDATE risk_grid_runs
         SET status = 'success', failed_points = $2, num_hours = $3
         WHERE id = $1
         RETURNING forecast_date",
    )
    .bind(run_id)
    .bind(failed_points)
    .bind(num_hours)
    .fetch_one(&mut *tx)
    .await?;

    let replaced = sqlx::query(
        "DELETE FROM risk_grid_runs
         WHERE forecast_date = $1 AND status = 'success' AND id <> $2",
    )
    .bind(forecast_date)
    .bind(run_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(replaced)
}

pub async fn fail_risk_grid_run(
    pool: &PgPool,
    run_id: Uuid,
    failed_points: i32,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE risk_grid_runs
         SET status = 'failed', failed_points = $2, error_message = $3
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(failed_points)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest successful grid run, optionally restricted to a forecast date.
pub async fn get_latest_risk_grid_run(
    pool: &PgPool,
    forecast_date: Option<NaiveDate>,
) -> Result<Option<RiskGridRun>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM risk_grid_runs
         WHERE status = 'success' AND ($1::date IS NULL OR forecast_date = $1)
         ORDER BY generated_at DESC
         LIMIT 1",
        GRID_RUN_COLUMNS
    );
    sqlx::query_as::<_, RiskGridRun>(&sql)
        .bind(forecast_date)
        .fetch_optional(pool)
        .await
}

/// Distinct valid times available in a grid run.
pub async fn get_risk_grid_times(
    pool: &PgPool,
    run_id: Uuid,
) -> Result<Vec<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT DISTINCT valid_time FROM risk_grid_points WHERE run_id = $1 ORDER BY valid_time",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
}

/// Grid points of a run at a single valid time.
pub async fn get_risk_grid_points(
    pool: &PgPool,
    run_id: Uuid,
    valid_time: DateTime<Utc>,
) -> Result<Vec<RiskGridPoint>, sqlx::Error> {
    sqlx::query_as::<_, RiskGridPoint>(
        "SELECT latitude, longitude, valid_time,
                wind_speed, wind_gusts, precipitation, temperature, risk
         FROM risk_grid_points
         WHERE run_id = $1 AND valid_time = $2
         ORDER BY latitude, longitude",
    )
    .bind(run_id)
    .bind(valid_time)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn stored_site() -> Site {
        Site {
            id: Uuid::new_v4(),
            client_name: "Acme Access".into(),
            name: "Tower Bridge".into(),
            postcode: "SE1 2UP".into(),
            latitude: Some(dec("51.505500")),
            longitude: Some(dec("-0.075400")),
            elevation_m: 10,
            exposure: "urban".into(),
            is_active: true,
            job_complete: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn params_from(site: &Site) -> UpsertSiteParams {
        UpsertSiteParams {
            client_name: site.client_name.clone(),
            name: site.name.clone(),
            postcode: site.postcode.clone(),
            latitude: site.latitude,
            longitude: site.longitude,
            elevation_m: site.elevation_m,
            exposure: site.exposure.clone(),
            is_active: site.is_active,
            job_complete: site.job_complete,
        }
    }

    #[test]
    fn test_site_field_changes_none_when_identical() {
        let site = stored_site();
        assert!(site_field_changes(&site, &params_from(&site)).is_empty());
    }

    #[test]
    fn test_site_field_changes_ignores_missing_coordinates() {
        let site = stored_site();
        let mut params = params_from(&site);
        params.latitude = None;
        params.longitude = None;
        assert!(site_field_changes(&site, &params).is_empty());
    }

    #[test]
    fn test_site_field_changes_records_old_and_new() {
        let site = stored_site();
        let mut params = params_from(&site);
        params.exposure = "coastal".into();
        params.is_active = false;

        let changes = site_field_changes(&site, &params);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["exposure"], json!({ "old": "urban", "new": "coastal" }));
        assert_eq!(changes["is_active"], json!({ "old": true, "new": false }));
    }

    #[test]
    fn test_threshold_params_equality_ignores_scale() {
        let a = ThresholdParams {
            wind_mean_caution: dec("10.00"),
            wind_mean_cancel: dec("14"),
            gust_caution: dec("15.0"),
            gust_cancel: dec("20"),
            precip_caution: dec("0.70"),
            precip_cancel: dec("2"),
            temp_min_caution: dec("1"),
            temp_min_cancel: dec("-2.00"),
            visibility_min_caution: None,
            visibility_min_cancel: None,
        };
        let mut b = a.clone();
        b.wind_mean_caution = dec("10");
        b.precip_caution = dec("0.7");
        assert_eq!(a, b);

        b.gust_cancel = dec("21");
        assert_ne!(a, b);
    }

    #[test]
    fn test_site_change_triggers_forecast() {
        assert!(SiteChange::Created.triggers_forecast());
        assert!(SiteChange::Updated.triggers_forecast());
        assert!(!SiteChange::Deactivated.triggers_forecast());
        assert!(!SiteChange::Unchanged.triggers_forecast());
    }
}
