use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// A work site in the registry. Input to the forecast engine.
#[derive(Debug, Clone, FromRow)]
pub struct Site {
    pub id: Uuid,
    pub client_name: String,
    pub name: String,
    pub postcode: String,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub elevation_m: i32,
    /// "urban", "coastal", "highland" or "rural"
    pub exposure: String,
    pub is_active: bool,
    pub job_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    /// Whether the scheduler should produce forecasts for this site.
    pub fn is_forecastable(&self) -> bool {
        self.is_active && !self.job_complete && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// One version of a site's threshold profile.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; some accessed only via route serialization
pub struct ThresholdProfileRow {
    pub id: Uuid,
    pub site_id: Uuid,
    pub version: i32,
    pub is_active: bool,
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
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit entry for site lifecycle and threshold changes.
#[derive(Debug, Clone, FromRow)]
pub struct ChangeLogEntry {
    pub id: Uuid,
    pub site_id: Uuid,
    pub action: String,
    pub details: serde_json::Value,
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One immutable execution of the ensemble pipeline for a site and date.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; some accessed only via route serialization
pub struct ForecastRun {
    pub id: Uuid,
    pub site_id: Uuid,
    pub forecast_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// "success" or "failed"
    pub status: String,
    pub peak_risk: Option<Decimal>,
    /// "GO", "CAUTION" or "CANCEL"; NULL for failed runs
    pub recommendation: Option<String>,
    pub models_used: Vec<String>,
    /// Model key → error message for members that could not be fetched.
    pub model_errors: serde_json::Value,
    pub hours_count: i32,
    pub low_confidence_hours: i32,
    pub disagreement_hours: i32,
    pub threshold_profile_id: Option<Uuid>,
    pub error_message: Option<String>,
}

/// Combined ensemble values and risk for one valid hour of a run.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; some accessed only via route serialization
pub struct HourlyForecast {
    pub id: Uuid,
    pub run_id: Uuid,
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

/// Spatial roll-up of the latest site runs for one forecast date.
#[derive(Debug, Clone, FromRow)]
pub struct UkRiskMap {
    pub id: Uuid,
    pub forecast_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub peak_risk: Option<Decimal>,
    pub site_count: i32,
    pub points: serde_json::Value,
}

/// A UK-wide gridded risk generation run.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; some accessed only via route serialization
pub struct RiskGridRun {
    pub id: Uuid,
    pub forecast_date: NaiveDate,
    /// "running", "success" or "failed"
    pub status: String,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub resolution: f64,
    pub grid_points: i32,
    pub failed_points: i32,
    pub num_hours: i32,
    pub model: String,
    pub error_message: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// One grid cell at one valid hour.
#[derive(Debug, Clone, FromRow)]
pub struct RiskGridPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub valid_time: DateTime<Utc>,
    pub wind_speed: f32,
    pub wind_gusts: f32,
    pub precipitation: f32,
    pub temperature: f32,
    pub risk: f32,
}
