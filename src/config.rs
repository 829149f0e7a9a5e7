use anyhow::{anyhow, bail, Context, Result};

const OPENMETEO_FREE_URL: &str = "https://api.open-meteo.com/v1";
const OPENMETEO_CUSTOMER_URL: &str = "https://customer-api.open-meteo.com/v1";
const POSTCODES_URL: &str = "https://api.postcodes.io";

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Directory containing `sites.json` for registry seeding.
    pub data_dir: String,
    pub openmeteo_base_url: String,
    pub openmeteo_api_key: Option<String>,
    pub postcodes_base_url: String,
    /// Maximum number of sites forecast concurrently.
    pub forecast_concurrency: usize,
    /// Number of forecast dates produced per site run (today included).
    pub forecast_days: u32,
    /// UTC hours at which the scheduler wakes.
    pub schedule_hours: Vec<u32>,
    /// Working window `[start, end)` in UTC hours used for daily summaries.
    pub work_start_hour: u32,
    pub work_end_hour: u32,
    pub retention_days: i64,
    pub risk_grid_on_schedule: bool,
    pub json_logs: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| anyhow!("DATABASE_URL must be set"))?;

        let openmeteo_api_key = std::env::var("OPENMETEO_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        // Keyed requests must go to the customer host.
        let openmeteo_base_url = std::env::var("OPENMETEO_BASE_URL").unwrap_or_else(|_| {
            if openmeteo_api_key.is_some() {
                OPENMETEO_CUSTOMER_URL.to_string()
            } else {
                OPENMETEO_FREE_URL.to_string()
            }
        });

        let forecast_concurrency = match std::env::var("FORECAST_CONCURRENCY") {
            Ok(v) => parse_var("FORECAST_CONCURRENCY", &v)?,
            Err(_) => parse_env_or("WEB_CONCURRENCY", 4usize)?,
        };

        let config = Self {
            database_url,
            port: parse_env_or("PORT", 8080u16)?,
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            openmeteo_base_url,
            openmeteo_api_key,
            postcodes_base_url: std::env::var("POSTCODES_BASE_URL")
                .unwrap_or_else(|_| POSTCODES_URL.to_string()),
            forecast_concurrency: forecast_concurrency.max(1),
            forecast_days: parse_env_or("FORECAST_DAYS", 3u32)?,
            schedule_hours: parse_schedule_hours(
                &std::env::var("SCHEDULE_HOURS").unwrap_or_else(|_| "5,17".to_string()),
            )?,
            work_start_hour: parse_env_or("WORK_START_HOUR", 7u32)?,
            work_end_hour: parse_env_or("WORK_END_HOUR", 18u32)?,
            retention_days: parse_env_or(
                "RETENTION_DAYS",
                crate::services::cleanup::DEFAULT_RETENTION_DAYS,
            )?,
            risk_grid_on_schedule: parse_env_or("RISK_GRID_ON_SCHEDULE", false)?,
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.forecast_days) {
            bail!("FORECAST_DAYS must be between 1 and 16");
        }
        if self.work_start_hour >= self.work_end_hour || self.work_end_hour > 24 {
            bail!(
                "working window {}..{} is invalid (need start < end <= 24)",
                self.work_start_hour,
                self.work_end_hour
            );
        }
        if self.retention_days < 1 {
            bail!("RETENTION_DAYS must be at least 1");
        }
        Ok(())
    }

    /// Log the loaded configuration with the database password and API key masked.
    pub fn log_config(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL       : {}", mask_db_url(&self.database_url));
        tracing::info!("  OPENMETEO_BASE_URL : {}", self.openmeteo_base_url);
        tracing::info!(
            "  OPENMETEO_API_KEY  : {}",
            if self.openmeteo_api_key.is_some() { "****" } else { "(none)" }
        );
        tracing::info!("  FORECAST_DAYS      : {}", self.forecast_days);
        tracing::info!("  CONCURRENCY        : {}", self.forecast_concurrency);
        tracing::info!("  SCHEDULE_HOURS     : {:?}", self.schedule_hours);
        tracing::info!(
            "  WORK WINDOW (UTC)  : {:02}:00-{:02}:00",
            self.work_start_hour,
            self.work_end_hour
        );
        tracing::info!("  RETENTION_DAYS     : {}", self.retention_days);
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("Invalid {}: {}", name, e))
}

fn parse_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => parse_var(name, &v),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated list of UTC hours (e.g. "5,17"), sorted and deduplicated.
pub fn parse_schedule_hours(raw: &str) -> Result<Vec<u32>> {
    let mut hours = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let hour: u32 = part
            .parse()
            .with_context(|| format!("Invalid hour '{}' in SCHEDULE_HOURS", part))?;
        if hour > 23 {
            bail!("SCHEDULE_HOURS entries must be 0-23, got {}", hour);
        }
        hours.push(hour);
    }
    hours.sort_unstable();
    hours.dedup();
    if hours.is_empty() {
        bail!("SCHEDULE_HOURS must contain at least one hour");
    }
    Ok(hours)
}

fn mask_db_url(url: &str) -> String {
    let userinfo_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if colon_pos >= userinfo_start {
                return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}
