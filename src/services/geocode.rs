//! UK postcode geocoding via postcodes.io (free, no key).
//!
//! See: https://postcodes.io/docs

use serde::Deserialize;
use std::time::Duration;

use crate::errors::AppError;

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct PostcodeResponse {
    status: u16,
    result: Option<PostcodeResult>,
}

#[derive(Debug, Deserialize)]
struct PostcodeResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Client for the postcodes.io lookup endpoint.
#[derive(Debug, Clone)]
pub struct PostcodeClient {
    client: reqwest::Client,
    base_url: String,
}

/// Upper-case and strip surrounding whitespace; inner spaces are kept.
pub fn clean_postcode(postcode: &str) -> String {
    postcode.trim().to_uppercase()
}

impl PostcodeClient {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Look up a postcode. Returns `Ok(None)` for unknown postcodes.
    pub async fn geocode(&self, postcode: &str) -> Result<Option<(f64, f64)>, AppError> {
        let clean = clean_postcode(postcode);
        if clean.is_empty() {
            return Ok(None);
        }

        let url = format!("{}/postcodes/{}", self.base_url, clean);
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::ExternalServiceError(format!("postcodes.io request failed: {}", e))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!("Postcode {} not found", clean);
            return Ok(None);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited("postcodes.io rate limit hit".to_string()));
        }
        if !status.is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "postcodes.io returned HTTP {} for {}",
                status, clean
            )));
        }

        let body: PostcodeResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("postcodes.io JSON parse error: {}", e))
        })?;

        if body.status != 200 {
            return Ok(None);
        }
        Ok(body
            .result
            .and_then(|r| Some((r.latitude?, r.longitude?))))
    }
}
