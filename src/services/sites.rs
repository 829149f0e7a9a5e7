//! Site registry seeding from `DATA_DIR/sites.json`.
//!
//! The file is the source of truth for clients, sites and their threshold
//! profiles. Seeding upserts each site (logging changes), geocodes missing
//! coordinates from the postcode, versions threshold changes and kicks off a
//! background forecast for sites whose inputs moved.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use utoipa::ToSchema;

use crate::db::models::Site;
use crate::db::queries::{self, SiteChange, UpsertSiteParams};
use crate::errors::AppError;
use crate::helpers::{f64_to_decimal_scaled, COORD_SCALE};
use crate::services::forecast::{spawn_forecast_for_site, ForecastEngine};
use crate::services::geocode::{clean_postcode, PostcodeClient};
use crate::services::risk::{Exposure, Thresholds};

/// Registry file name inside the data directory.
pub const SITES_FILE: &str = "sites.json";

/// Actor recorded in the change log for registry-driven changes.
const REGISTRY_ACTOR: &str = "registry";

/// Errors that can occur while loading the registry file.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error reading registry file: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid site '{site}': {message}")]
    InvalidSite { site: String, message: String },
}

fn default_true() -> bool {
    true
}

/// One site entry of the registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteRecord {
    pub client: String,
    pub name: String,
    #[serde(default)]
    pub postcode: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Metres above sea level
    #[serde(default)]
    pub elevation: i32,
    #[serde(default)]
    pub exposure: Exposure,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub job_complete: bool,
    /// Omitted thresholds mean the default profile.
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    sites: Vec<SiteRecord>,
}

impl SiteRecord {
    fn label(&self) -> String {
        format!("{} / {}", self.client, self.name)
    }

    fn invalid(&self, message: impl Into<String>) -> RegistryError {
        RegistryError::InvalidSite {
            site: self.label(),
            message: message.into(),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.client.trim().is_empty() || self.name.trim().is_empty() {
            return Err(self.invalid("client and name must not be empty"));
        }
        match (self.latitude, self.longitude) {
            (None, None) => {
                if self.postcode.trim().is_empty() {
                    return Err(self.invalid("needs either coordinates or a postcode"));
                }
            }
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    return Err(self.invalid(format!("coordinates ({}, {}) out of range", lat, lon)));
                }
            }
            _ => return Err(self.invalid("latitude and longitude must be given together")),
        }
        if let Some(thresholds) = &self.thresholds {
            thresholds
                .validate()
                .map_err(|e| self.invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Thresholds to store: the explicit profile or the defaults.
    pub fn effective_thresholds(&self) -> Thresholds {
        self.thresholds.unwrap_or_default()
    }
}

/// Parse and validate registry JSON.
pub fn parse_sites(json: &str) -> Result<Vec<SiteRecord>, RegistryError> {
    let file: RegistryFile = serde_json::from_str(json)?;

    let mut seen = HashSet::new();
    for record in &file.sites {
        record.validate()?;
        let key = (record.client.trim().to_lowercase(), record.name.trim().to_lowercase());
        if !seen.insert(key) {
            return Err(record.invalid("duplicate client/name pair"));
        }
    }
    Ok(file.sites)
}

/// Load `sites.json` from the data directory. A missing file yields no sites.
pub fn load_sites_file(dir: &Path) -> Result<Vec<SiteRecord>, RegistryError> {
    let path = dir.join(SITES_FILE);
    if !path.exists() {
        tracing::warn!("Site registry not found: {}", path.display());
        return Ok(Vec::new());
    }
    tracing::info!("Loading site registry from {}", path.display());
    let raw = std::fs::read_to_string(&path)?;
    parse_sites(&raw)
}

/// Counts of what a seeding pass changed.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct SeedSummary {
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub unchanged: usize,
    pub threshold_versions: usize,
    pub failed: usize,
    pub forecasts_triggered: usize,
}

/// Upsert every registry record.
///
/// Per-site failures are logged and counted. When `trigger_forecasts` is set,
/// sites that were created, updated or got a new threshold version are
/// forecast in the background.
pub async fn seed_sites(
    engine: &ForecastEngine,
    geocoder: &PostcodeClient,
    records: &[SiteRecord],
    trigger_forecasts: bool,
) -> SeedSummary {
    let mut summary = SeedSummary::default();

    for record in records {
        match seed_site(engine, geocoder, record).await {
            Ok((site, change, thresholds_changed)) => {
                match change {
                    SiteChange::Created => summary.created += 1,
                    SiteChange::Updated => summary.updated += 1,
                    SiteChange::Deactivated => summary.deactivated += 1,
                    SiteChange::Unchanged => summary.unchanged += 1,
                }
                if thresholds_changed {
                    summary.threshold_versions += 1;
                }

                let inputs_moved = change.triggers_forecast() || thresholds_changed;
                if trigger_forecasts && inputs_moved && site.is_forecastable() {
                    tracing::info!(
                        "Site {:?}: {} - triggering forecast generation",
                        change,
                        site.name
                    );
                    spawn_forecast_for_site(engine.clone(), site.id);
                    summary.forecasts_triggered += 1;
                }
            }
            Err(e) => {
                tracing::error!("Failed to seed site '{}': {}", record.label(), e);
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        "Site registry seeded: {} created, {} updated, {} deactivated, {} unchanged, {} failed",
        summary.created,
        summary.updated,
        summary.deactivated,
        summary.unchanged,
        summary.failed
    );
    summary
}

/// Whether the registry record needs a postcode lookup. A stored site keeps
/// its coordinates while its postcode is unchanged.
fn needs_geocode(record: &SiteRecord, existing: Option<&Site>) -> bool {
    if record.latitude.is_some() && record.longitude.is_some() {
        return false;
    }
    match existing {
        Some(site) => {
            site.latitude.is_none()
                || site.longitude.is_none()
                || site.postcode != clean_postcode(&record.postcode)
        }
        None => true,
    }
}

/// Upsert values for a record, coordinates rounded to the stored scale.
fn upsert_params(record: &SiteRecord, coords: Option<(f64, f64)>) -> UpsertSiteParams {
    UpsertSiteParams {
        client_name: record.client.trim().to_string(),
        name: record.name.trim().to_string(),
        postcode: clean_postcode(&record.postcode),
        latitude: coords.map(|(lat, _)| f64_to_decimal_scaled(lat, COORD_SCALE)),
        longitude: coords.map(|(_, lon)| f64_to_decimal_scaled(lon, COORD_SCALE)),
        elevation_m: record.elevation,
        exposure: record.exposure.as_str().to_string(),
        is_active: record.is_active,
        job_complete: record.job_complete,
    }
}

async fn seed_site(
    engine: &ForecastEngine,
    geocoder: &PostcodeClient,
    record: &SiteRecord,
) -> Result<(Site, SiteChange, bool), AppError> {
    let coords = match (record.latitude, record.longitude) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => {
            let existing =
                queries::get_site_by_key(&engine.pool, record.client.trim(), record.name.trim())
                    .await?;
            if needs_geocode(record, existing.as_ref()) {
                match geocoder.geocode(&record.postcode).await {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::warn!("Geocoding {} failed: {}", record.postcode, e);
                        None
                    }
                }
            } else {
                // Upsert keeps the stored coordinates.
                None
            }
        }
    };

    let params = upsert_params(record, coords);
    let (site, change) = queries::upsert_site(&engine.pool, &params, Some(REGISTRY_ACTOR)).await?;

    let new_profile = queries::replace_threshold_profile(
        &engine.pool,
        site.id,
        &record.effective_thresholds().to_params(),
        Some(REGISTRY_ACTOR),
    )
    .await?;

    Ok((site, change, new_profile.is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{
        "sites": [
            {
                "client": "Acme Access",
                "name": "Tower Bridge",
                "postcode": "SE1 2UP",
                "latitude": 51.5055,
                "longitude": -0.0754,
                "elevation": 10,
                "exposure": "urban"
            },
            {
                "client": "Acme Access",
                "name": "Ben Nevis Mast",
                "postcode": "PH33 6SY",
                "exposure": "highland",
                "thresholds": {
                    "wind_mean_caution": 8.0,
                    "wind_mean_cancel": 12.0,
                    "gust_caution": 12.0,
                    "gust_cancel": 18.0,
                    "precip_caution": 0.5,
                    "precip_cancel": 1.5,
                    "temp_min_caution": 2.0,
                    "temp_min_cancel": -1.0
                }
            }
        ]
    }"#;

    #[test]
    fn test_parse_registry() {
        let sites = parse_sites(REGISTRY).unwrap();
        assert_eq!(sites.len(), 2);

        let tower = &sites[0];
        assert_eq!(tower.exposure, Exposure::Urban);
        assert!(tower.is_active);
        assert!(!tower.job_complete);
        assert_eq!(tower.effective_thresholds(), Thresholds::default());

        let mast = &sites[1];
        assert_eq!(mast.latitude, None);
        assert_eq!(mast.exposure, Exposure::Highland);
        assert_eq!(mast.effective_thresholds().wind_mean_caution, 8.0);
        assert_eq!(mast.effective_thresholds().visibility_min_caution, None);
    }

    #[test]
    fn test_half_coordinates_rejected() {
        let json = r#"{"sites": [{"client": "A", "name": "B", "latitude": 51.0}]}"#;
        let err = parse_sites(json).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSite { .. }));
    }

    #[test]
    fn test_missing_location_rejected() {
        let json = r#"{"sites": [{"client": "A", "name": "B"}]}"#;
        assert!(parse_sites(json).is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let json = r#"{"sites": [{
            "client": "A", "name": "B", "postcode": "SW1A 1AA",
            "thresholds": {
                "wind_mean_caution": 14.0, "wind_mean_cancel": 10.0,
                "gust_caution": 15.0, "gust_cancel": 20.0,
                "precip_caution": 0.7, "precip_cancel": 2.0,
                "temp_min_caution": 1.0, "temp_min_cancel": -2.0
            }
        }]}"#;
        let err = parse_sites(json).unwrap_err();
        assert!(err.to_string().contains("wind_mean"));
    }

    #[test]
    fn test_duplicate_sites_rejected() {
        let json = r#"{"sites": [
            {"client": "A", "name": "Site", "postcode": "SW1A 1AA"},
            {"client": "a", "name": "site ", "postcode": "SW1A 1AA"}
        ]}"#;
        let err = parse_sites(json).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unknown_exposure_rejected() {
        let json = r#"{"sites": [{"client": "A", "name": "B", "postcode": "X", "exposure": "lunar"}]}"#;
        assert!(matches!(parse_sites(json), Err(RegistryError::Json(_))));
    }

    #[test]
    fn test_missing_file_yields_no_sites() {
        let dir = std::env::temp_dir().join("ensemble-forecast-no-registry");
        let sites = load_sites_file(&dir).unwrap();
        assert!(sites.is_empty());
    }

    fn stored(record: &SiteRecord, latitude: Option<&str>, longitude: Option<&str>) -> Site {
        use rust_decimal::Decimal;
        use std::str::FromStr;

        let now = chrono::Utc::now();
        Site {
            id: uuid::Uuid::new_v4(),
            client_name: record.client.clone(),
            name: record.name.clone(),
            postcode: clean_postcode(&record.postcode),
            latitude: latitude.map(|v| Decimal::from_str(v).unwrap()),
            longitude: longitude.map(|v| Decimal::from_str(v).unwrap()),
            elevation_m: record.elevation,
            exposure: record.exposure.as_str().to_string(),
            is_active: record.is_active,
            job_complete: record.job_complete,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_geocode_skipped_when_site_already_located() {
        let sites = parse_sites(REGISTRY).unwrap();
        let mast = &sites[1];

        assert!(needs_geocode(mast, None));
        assert!(!needs_geocode(
            mast,
            Some(&stored(mast, Some("56.796900"), Some("-5.003700")))
        ));
        assert!(needs_geocode(mast, Some(&stored(mast, None, None))));

        let mut moved = stored(mast, Some("56.796900"), Some("-5.003700"));
        moved.postcode = "PH33 6AA".to_string();
        assert!(needs_geocode(mast, Some(&moved)));

        // Explicit coordinates never need a lookup.
        assert!(!needs_geocode(&sites[0], None));
    }

    #[test]
    fn test_reseeding_over_precise_coordinates_is_unchanged() {
        let json = r#"{"sites": [{
            "client": "Acme Access",
            "name": "Shard",
            "postcode": "se1 9sg",
            "latitude": 51.50450049,
            "longitude": -0.08649951,
            "elevation": 12
        }]}"#;
        let record = &parse_sites(json).unwrap()[0];
        let params = upsert_params(record, record.latitude.zip(record.longitude));

        // What NUMERIC(9, 6) returned after the first seed.
        let site = stored(record, Some("51.504500"), Some("-0.086500"));

        assert_eq!(params.postcode, "SE1 9SG");
        assert!(queries::site_field_changes(&site, &params).is_empty());
    }
}
