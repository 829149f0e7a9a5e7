//! Open-Meteo forecast client.
//!
//! Fetches hourly forecasts for a single location from one numerical weather
//! model per request. The ensemble uses four members: UKV, ECMWF, ICON-EU and
//! ARPEGE. See: https://open-meteo.com/en/docs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

use crate::errors::AppError;

/// Hourly variables requested from every model.
const HOURLY_VARIABLES: &str = "wind_speed_10m,wind_gusts_10m,precipitation,temperature_2m,visibility";

/// Request timeout for a single model fetch.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A numerical weather prediction model that contributes to the ensemble.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum WeatherModel {
    /// Met Office UK variable-resolution model (2 km)
    Ukv,
    /// ECMWF IFS (0.25°)
    Ecmwf,
    /// DWD ICON Europe nest
    IconEu,
    /// Météo-France ARPEGE Europe
    Arpege,
}

impl WeatherModel {
    pub const ALL: [WeatherModel; 4] = [
        WeatherModel::Ukv,
        WeatherModel::Ecmwf,
        WeatherModel::IconEu,
        WeatherModel::Arpege,
    ];

    /// Short stable key used in the database and on the CLI.
    pub fn key(self) -> &'static str {
        match self {
            WeatherModel::Ukv => "ukv",
            WeatherModel::Ecmwf => "ecmwf",
            WeatherModel::IconEu => "icon_eu",
            WeatherModel::Arpege => "arpege",
        }
    }

    /// Open-Meteo `models=` identifier.
    pub fn api_name(self) -> &'static str {
        match self {
            WeatherModel::Ukv => "ukmo_uk_deterministic_2km",
            WeatherModel::Ecmwf => "ecmwf_ifs025",
            WeatherModel::IconEu => "icon_eu",
            WeatherModel::Arpege => "meteofrance_arpege_europe",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            WeatherModel::Ukv => "Met Office UKV",
            WeatherModel::Ecmwf => "ECMWF IFS",
            WeatherModel::IconEu => "DWD ICON-EU",
            WeatherModel::Arpege => "Météo-France ARPEGE",
        }
    }
}

impl fmt::Display for WeatherModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for WeatherModel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ukv" => Ok(WeatherModel::Ukv),
            "ecmwf" => Ok(WeatherModel::Ecmwf),
            "icon_eu" | "icon" => Ok(WeatherModel::IconEu),
            "arpege" => Ok(WeatherModel::Arpege),
            other => Err(AppError::BadRequest(format!(
                "Unknown model '{}'. Available: ukv, ecmwf, icon_eu, arpege",
                other
            ))),
        }
    }
}

/// Location and date window for a forecast fetch.
#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub latitude: f64,
    pub longitude: f64,
    /// Site elevation in metres; Open-Meteo applies its own lapse-rate downscaling.
    pub elevation_m: Option<f64>,
    pub start_date: NaiveDate,
    /// Inclusive end date.
    pub end_date: NaiveDate,
}

/// Units declared by Open-Meteo for each hourly variable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlyUnits {
    pub wind_speed_10m: Option<String>,
    pub wind_gusts_10m: Option<String>,
    pub precipitation: Option<String>,
    pub temperature_2m: Option<String>,
    pub visibility: Option<String>,
}

/// Column-oriented hourly arrays as returned by Open-Meteo.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHourly {
    pub time: Vec<String>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_gusts_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub visibility: Vec<Option<f64>>,
}

/// Raw (un-normalized) forecast from a single model.
#[derive(Debug, Clone)]
pub struct RawModelForecast {
    pub model: WeatherModel,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub units: HourlyUnits,
    pub hourly: RawHourly,
}

// --- Open-Meteo JSON response types ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    latitude: f64,
    longitude: f64,
    elevation: Option<f64>,
    #[serde(default)]
    hourly_units: HourlyUnits,
    hourly: Option<RawHourly>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    reason: Option<String>,
}

/// Client for the Open-Meteo forecast API.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenMeteoClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::BadRequest(format!(
                "Invalid coordinates ({}, {}): latitude must be -90 to 90, longitude -180 to 180",
                latitude, longitude
            )));
        }
        Ok(())
    }

    fn build_url(&self, model: WeatherModel, request: &ForecastRequest) -> String {
        let mut url = format!(
            "{}/forecast?latitude={:.4}&longitude={:.4}&hourly={}&models={}\
             &wind_speed_unit=ms&timezone=UTC&start_date={}&end_date={}",
            self.base_url,
            request.latitude,
            request.longitude,
            HOURLY_VARIABLES,
            model.api_name(),
            request.start_date.format("%Y-%m-%d"),
            request.end_date.format("%Y-%m-%d"),
        );
        if let Some(elevation) = request.elevation_m {
            url.push_str(&format!("&elevation={:.0}", elevation));
        }
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={}", key));
        }
        url
    }

    /// Fetch the hourly forecast of one model for a location.
    #[tracing::instrument(skip(self, request), fields(model = %model, lat = request.latitude, lon = request.longitude))]
    pub async fn fetch_model(
        &self,
        model: WeatherModel,
        request: &ForecastRequest,
    ) -> Result<RawModelForecast, AppError> {
        Self::validate_coordinates(request.latitude, request.longitude)?;
        if request.end_date < request.start_date {
            return Err(AppError::BadRequest(format!(
                "end_date {} is before start_date {}",
                request.end_date, request.start_date
            )));
        }

        let url = self.build_url(model, request);
        tracing::debug!("Fetching {} forecast", model.display_name());

        // reqwest errors carry the request URL, which holds the API key.
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::ExternalServiceError(format!(
                "Open-Meteo request failed ({}): {}",
                model,
                e.without_url()
            ))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited(format!(
                "Open-Meteo rate limit hit for {}",
                model
            )));
        }
        if status.is_server_error() {
            return Err(AppError::ServiceUnavailable(format!(
                "Open-Meteo unavailable for {}: HTTP {}",
                model, status
            )));
        }
        if !status.is_success() {
            let reason = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|b| b.reason)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo rejected {} request: {}",
                model, reason
            )));
        }

        let body: ApiResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!(
                "Open-Meteo JSON parse error ({}): {}",
                model,
                e.without_url()
            ))
        })?;

        let hourly = body.hourly.ok_or_else(|| {
            AppError::ExternalServiceError(format!("Open-Meteo returned no hourly data for {}", model))
        })?;

        if hourly.time.is_empty() {
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo returned an empty timeseries for {}",
                model
            )));
        }

        Ok(RawModelForecast {
            model,
            latitude: body.latitude,
            longitude: body.longitude,
            elevation: body.elevation,
            units: body.hourly_units,
            hourly,
        })
    }

    /// Fetch several models concurrently. Each model succeeds or fails independently.
    pub async fn fetch_models(
        &self,
        models: &[WeatherModel],
        request: &ForecastRequest,
    ) -> Vec<(WeatherModel, Result<RawModelForecast, AppError>)> {
        let futures = models.iter().map(|&model| async move {
            let result = self.fetch_model(model, request).await;
            (model, result)
        });
        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ForecastRequest {
        ForecastRequest {
            latitude: 51.5074,
            longitude: -0.1278,
            elevation_m: Some(35.0),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        }
    }

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "latitude": 51.5,
            "longitude": -0.12,
            "elevation": 35.0,
            "hourly_units": {
                "time": "iso8601",
                "wind_speed_10m": "m/s",
                "wind_gusts_10m": "m/s",
                "precipitation": "mm",
                "temperature_2m": "°C",
                "visibility": "m"
            },
            "hourly": {
                "time": ["2026-03-01T00:00", "2026-03-01T01:00"],
                "wind_speed_10m": [5.2, null],
                "wind_gusts_10m": [9.1, 10.4],
                "precipitation": [0.0, 0.3],
                "temperature_2m": [4.5, 4.1],
                "visibility": [24000.0, 18000.0]
            }
        })
    }

    fn client(server: &MockServer, api_key: Option<&str>) -> OpenMeteoClient {
        OpenMeteoClient::new(&server.uri(), api_key.map(str::to_string)).unwrap()
    }

    #[test]
    fn test_model_keys_round_trip_through_from_str() {
        for model in WeatherModel::ALL {
            assert_eq!(model.key().parse::<WeatherModel>().unwrap(), model);
        }
        assert_eq!("ICON-EU".parse::<WeatherModel>().unwrap(), WeatherModel::IconEu);
        assert!("gfs".parse::<WeatherModel>().is_err());
    }

    #[test]
    fn test_build_url_contains_model_and_window() {
        let c = OpenMeteoClient::new("https://example.test/v1/", None).unwrap();
        let url = c.build_url(WeatherModel::Arpege, &request());
        assert!(url.starts_with("https://example.test/v1/forecast?"));
        assert!(url.contains("models=meteofrance_arpege_europe"));
        assert!(url.contains("latitude=51.5074&longitude=-0.1278"));
        assert!(url.contains("start_date=2026-03-01&end_date=2026-03-01"));
        assert!(url.contains("elevation=35"));
        assert!(!url.contains("apikey"));
    }

    #[tokio::test]
    async fn test_fetch_model_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("models", "ukmo_uk_deterministic_2km"))
            .and(query_param("wind_speed_unit", "ms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&server)
            .await;

        let raw = assert_ok!(
            client(&server, None)
                .fetch_model(WeatherModel::Ukv, &request())
                .await
        );

        assert_eq!(raw.model, WeatherModel::Ukv);
        assert_eq!(raw.hourly.time.len(), 2);
        assert_eq!(raw.hourly.wind_speed_10m, vec![Some(5.2), None]);
        assert_eq!(raw.units.wind_speed_10m.as_deref(), Some("m/s"));
        assert_eq!(raw.elevation, Some(35.0));
    }

    #[tokio::test]
    async fn test_fetch_model_sends_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("apikey", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, Some("secret-key"))
            .fetch_model(WeatherModel::Ecmwf, &request())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_model_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server, None)
            .fetch_model(WeatherModel::Ecmwf, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_fetch_model_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server, None)
            .fetch_model(WeatherModel::IconEu, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert_eq!(err.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_connection_error_does_not_expose_api_key() {
        // Nothing listens on port 1.
        let c = OpenMeteoClient::new("http://127.0.0.1:1", Some("SECRET-KEY-123".to_string()))
            .unwrap();

        let err = assert_err!(c.fetch_model(WeatherModel::Ukv, &request()).await);

        assert!(matches!(err, AppError::ExternalServiceError(_)));
        let message = err.to_string();
        assert!(message.contains("Open-Meteo request failed (ukv)"), "{}", message);
        assert!(!message.contains("SECRET-KEY-123"), "{}", message);
        assert!(!message.contains("apikey"), "{}", message);
    }

    #[tokio::test]
    async fn test_parse_error_does_not_expose_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server, Some("SECRET-KEY-123"))
            .fetch_model(WeatherModel::Ecmwf, &request())
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("SECRET-KEY-123"), "{}", err);
    }

    #[tokio::test]
    async fn test_fetch_model_surfaces_rejection_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": true,
                "reason": "Parameter 'start_date' is out of allowed range"
            })))
            .mount(&server)
            .await;

        let err = client(&server, None)
            .fetch_model(WeatherModel::Arpege, &request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out of allowed range"), "{}", err);
    }

    #[tokio::test]
    async fn test_fetch_model_rejects_invalid_coordinates_without_io() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(0)
            .mount(&server)
            .await;

        let mut req = request();
        req.latitude = 95.0;
        let err = client(&server, None)
            .fetch_model(WeatherModel::Ukv, &req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_fetch_models_isolates_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("models", "ecmwf_ifs025"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&server)
            .await;

        let results = client(&server, None)
            .fetch_models(&WeatherModel::ALL, &request())
            .await;

        assert_eq!(results.len(), 4);
        for (model, result) in &results {
            if *model == WeatherModel::Ecmwf {
                assert!(result.is_err());
            } else {
                assert!(result.is_ok(), "{} should succeed", model);
            }
        }
    }
}
