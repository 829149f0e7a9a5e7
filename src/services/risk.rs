//! Risk evaluation against a site's threshold profile.
//!
//! Every variable is scored on a 0–100 scale: 50 at its caution threshold,
//! 100 at its cancel threshold, falling linearly to 0 one caution-to-cancel
//! interval on the safe side of caution. The hourly risk is the worst
//! per-variable score, classified as GO (< 50), CAUTION (< 100) or CANCEL.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::db::models::ThresholdProfileRow;
use crate::db::queries::ThresholdParams;
use crate::errors::AppError;
use crate::helpers::{
    dec_to_f64, f64_to_decimal_scaled, opt_dec_to_f64, THRESHOLD_SCALE, VISIBILITY_SCALE,
};
use crate::services::ensemble::CombinedHour;
use crate::services::normalize::Variable;

/// Score at the caution threshold.
pub const CAUTION_SCORE: f64 = 50.0;
/// Score at (and beyond) the cancel threshold.
pub const CANCEL_SCORE: f64 = 100.0;

/// Go / no-go classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Go,
    Caution,
    Cancel,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Go => "GO",
            RiskLevel::Caution => "CAUTION",
            RiskLevel::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GO" => Ok(RiskLevel::Go),
            "CAUTION" => Ok(RiskLevel::Caution),
            "CANCEL" => Ok(RiskLevel::Cancel),
            other => Err(AppError::InternalError(format!("Unknown risk level '{}'", other))),
        }
    }
}

/// Classify a 0–100 risk score.
pub fn classify(risk: f64) -> RiskLevel {
    if risk >= CANCEL_SCORE {
        RiskLevel::Cancel
    } else if risk >= CAUTION_SCORE {
        RiskLevel::Caution
    } else {
        RiskLevel::Go
    }
}

/// How exposed a site is to wind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    #[default]
    Urban,
    Rural,
    Coastal,
    Highland,
}

impl Exposure {
    /// Multiplier applied to wind and gust before scoring.
    pub fn wind_factor(self) -> f64 {
        match self {
            Exposure::Urban => 1.0,
            Exposure::Rural => 1.05,
            Exposure::Coastal => 1.15,
            Exposure::Highland => 1.2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Exposure::Urban => "urban",
            Exposure::Rural => "rural",
            Exposure::Coastal => "coastal",
            Exposure::Highland => "highland",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Exposure::Urban => "Urban / sheltered",
            Exposure::Rural => "Rural / open",
            Exposure::Coastal => "Coastal / exposed",
            Exposure::Highland => "Highland / elevated",
        }
    }
}

impl FromStr for Exposure {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "urban" => Ok(Exposure::Urban),
            "rural" => Ok(Exposure::Rural),
            "coastal" => Ok(Exposure::Coastal),
            "highland" => Ok(Exposure::Highland),
            other => Err(AppError::BadRequest(format!(
                "Unknown exposure '{}'. Expected urban, rural, coastal or highland",
                other
            ))),
        }
    }
}

/// Numeric limits of a threshold profile, in pipeline units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Thresholds {
    /// Mean wind speed (m/s)
    pub wind_mean_caution: f64,
    pub wind_mean_cancel: f64,
    /// Gust speed (m/s)
    pub gust_caution: f64,
    pub gust_cancel: f64,
    /// Precipitation (mm/h)
    pub precip_caution: f64,
    pub precip_cancel: f64,
    /// Minimum temperature (°C); lower is worse
    pub temp_min_caution: f64,
    pub temp_min_cancel: f64,
    /// Minimum visibility (m); lower is worse. Unset disables the check.
    #[serde(default)]
    pub visibility_min_caution: Option<f64>,
    #[serde(default)]
    pub visibility_min_cancel: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            wind_mean_caution: 10.0,
            wind_mean_cancel: 14.0,
            gust_caution: 15.0,
            gust_cancel: 20.0,
            precip_caution: 0.7,
            precip_cancel: 2.0,
            temp_min_caution: 1.0,
            temp_min_cancel: -2.0,
            visibility_min_caution: None,
            visibility_min_cancel: None,
        }
    }
}

impl Thresholds {
    /// Check that caution and cancel are ordered the right way round.
    pub fn validate(&self) -> Result<(), AppError> {
        let rising = [
            ("wind_mean", self.wind_mean_caution, self.wind_mean_cancel),
            ("gust", self.gust_caution, self.gust_cancel),
            ("precip", self.precip_caution, self.precip_cancel),
        ];
        for (name, caution, cancel) in rising {
            if !caution.is_finite() || !cancel.is_finite() || caution < 0.0 || caution >= cancel {
                return Err(AppError::BadRequest(format!(
                    "{name}: caution ({caution}) must be non-negative and below cancel ({cancel})"
                )));
            }
        }

        if !self.temp_min_caution.is_finite()
            || !self.temp_min_cancel.is_finite()
            || self.temp_min_caution <= self.temp_min_cancel
        {
            return Err(AppError::BadRequest(format!(
                "temp_min: caution ({}) must be above cancel ({})",
                self.temp_min_caution, self.temp_min_cancel
            )));
        }

        match (self.visibility_min_caution, self.visibility_min_cancel) {
            (None, None) => Ok(()),
            (Some(caution), Some(cancel)) if cancel >= 0.0 && caution > cancel => Ok(()),
            (caution, cancel) => Err(AppError::BadRequest(format!(
                "visibility_min: caution ({:?}) and cancel ({:?}) must both be set, with caution above cancel",
                caution, cancel
            ))),
        }
    }

    fn visibility(&self) -> Option<(f64, f64)> {
        self.visibility_min_caution.zip(self.visibility_min_cancel)
    }

    /// Decimal form for storage as a profile version, rounded to the
    /// column scale so an unchanged profile compares equal on re-seed.
    pub fn to_params(&self) -> ThresholdParams {
        let limit = |v: f64| f64_to_decimal_scaled(v, THRESHOLD_SCALE);
        let visibility = |v: f64| f64_to_decimal_scaled(v, VISIBILITY_SCALE);
        ThresholdParams {
            wind_mean_caution: limit(self.wind_mean_caution),
            wind_mean_cancel: limit(self.wind_mean_cancel),
            gust_caution: limit(self.gust_caution),
            gust_cancel: limit(self.gust_cancel),
            precip_caution: limit(self.precip_caution),
            precip_cancel: limit(self.precip_cancel),
            temp_min_caution: limit(self.temp_min_caution),
            temp_min_cancel: limit(self.temp_min_cancel),
            visibility_min_caution: self.visibility_min_caution.map(visibility),
            visibility_min_cancel: self.visibility_min_cancel.map(visibility),
        }
    }
}

impl From<&ThresholdProfileRow> for Thresholds {
    fn from(row: &ThresholdProfileRow) -> Self {
        Self {
            wind_mean_caution: dec_to_f64(row.wind_mean_caution),
            wind_mean_cancel: dec_to_f64(row.wind_mean_cancel),
            gust_caution: dec_to_f64(row.gust_caution),
            gust_cancel: dec_to_f64(row.gust_cancel),
            precip_caution: dec_to_f64(row.precip_caution),
            precip_cancel: dec_to_f64(row.precip_cancel),
            temp_min_caution: dec_to_f64(row.temp_min_caution),
            temp_min_cancel: dec_to_f64(row.temp_min_cancel),
            visibility_min_caution: opt_dec_to_f64(row.visibility_min_caution),
            visibility_min_cancel: opt_dec_to_f64(row.visibility_min_cancel),
        }
    }
}

/// Score a variable where larger values are worse (wind, gust, precipitation).
pub fn score_rising(value: f64, caution: f64, cancel: f64) -> f64 {
    let zero = (caution - (cancel - caution)).max(0.0);
    ramp(value, zero, caution, cancel)
}

/// Score a variable where smaller values are worse (temperature, visibility).
pub fn score_falling(value: f64, caution: f64, cancel: f64) -> f64 {
    let zero = caution + (caution - cancel);
    ramp(-value, -zero, -caution, -cancel)
}

fn ramp(value: f64, zero: f64, caution: f64, cancel: f64) -> f64 {
    if !value.is_finite() || value <= zero {
        0.0
    } else if value < caution {
        CAUTION_SCORE * (value - zero) / (caution - zero)
    } else if value < cancel {
        CAUTION_SCORE + (CANCEL_SCORE - CAUTION_SCORE) * (value - caution) / (cancel - caution)
    } else {
        CANCEL_SCORE
    }
}

/// Hourly risk from the four core variables with no exposure adjustment.
pub fn calculate_hourly_risk(
    wind: f64,
    gust: f64,
    precip: f64,
    temp: f64,
    thresholds: &Thresholds,
) -> f64 {
    [
        score_rising(wind, thresholds.wind_mean_caution, thresholds.wind_mean_cancel),
        score_rising(gust, thresholds.gust_caution, thresholds.gust_cancel),
        score_rising(precip, thresholds.precip_caution, thresholds.precip_cancel),
        score_falling(temp, thresholds.temp_min_caution, thresholds.temp_min_cancel),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

/// Risk verdict for one hour.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HourlyRisk {
    pub risk: f64,
    pub level: RiskLevel,
    /// Variable with the highest score; `None` when every score is zero.
    pub limiting: Option<Variable>,
    /// Raised from GO to CAUTION because the pessimistic band edge reached CANCEL.
    pub escalated: bool,
}

/// Scores of each variable for one set of values. Missing values score nothing.
fn variable_scores(
    value: impl Fn(Variable) -> Option<f64>,
    thresholds: &Thresholds,
    exposure: Exposure,
) -> Vec<(Variable, f64)> {
    let factor = exposure.wind_factor();
    let mut scores = Vec::with_capacity(5);

    if let Some(w) = value(Variable::WindSpeed) {
        scores.push((
            Variable::WindSpeed,
            score_rising(w * factor, thresholds.wind_mean_caution, thresholds.wind_mean_cancel),
        ));
    }
    if let Some(g) = value(Variable::WindGust) {
        scores.push((
            Variable::WindGust,
            score_rising(g * factor, thresholds.gust_caution, thresholds.gust_cancel),
        ));
    }
    if let Some(p) = value(Variable::Precipitation) {
        scores.push((
            Variable::Precipitation,
            score_rising(p, thresholds.precip_caution, thresholds.precip_cancel),
        ));
    }
    if let Some(t) = value(Variable::Temperature) {
        scores.push((
            Variable::Temperature,
            score_falling(t, thresholds.temp_min_caution, thresholds.temp_min_cancel),
        ));
    }
    if let (Some(v), Some((caution, cancel))) = (value(Variable::Visibility), thresholds.visibility())
    {
        scores.push((Variable::Visibility, score_falling(v, caution, cancel)));
    }

    scores
}

fn worst(scores: &[(Variable, f64)]) -> (f64, Option<Variable>) {
    scores
        .iter()
        .fold((0.0, None), |(best, var), &(v, score)| {
            if score > best {
                (score, Some(v))
            } else {
                (best, var)
            }
        })
}

/// Evaluate one combined ensemble hour.
pub fn evaluate_hour(hour: &CombinedHour, thresholds: &Thresholds, exposure: Exposure) -> HourlyRisk {
    let mean_scores = variable_scores(|v| hour.mean(v), thresholds, exposure);
    let (risk, limiting) = worst(&mean_scores);
    let mut level = classify(risk);

    // Pessimistic edge: band max for rising variables, band min for falling ones.
    let pessimistic_scores = variable_scores(
        |v| {
            hour.stats(v).map(|s| match v {
                Variable::Temperature | Variable::Visibility => s.min,
                _ => s.max,
            })
        },
        thresholds,
        exposure,
    );
    let (pessimistic_risk, _) = worst(&pessimistic_scores);

    let escalated = level == RiskLevel::Go && classify(pessimistic_risk) == RiskLevel::Cancel;
    if escalated {
        level = RiskLevel::Caution;
    }

    HourlyRisk {
        risk,
        level,
        limiting,
        escalated,
    }
}

/// Daily roll-up of hourly risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct DaySummary {
    pub peak_risk: f64,
    pub recommendation: RiskLevel,
    /// Number of hours the summary was computed from.
    pub hours: usize,
}

/// Summarize a day's hours over the working window `[work_start, work_end)` (UTC hours).
///
/// Falls back to all hours when none lie inside the window. `None` for an empty day.
pub fn summarize_day(
    hours: &[(DateTime<Utc>, HourlyRisk)],
    work_start: u32,
    work_end: u32,
) -> Option<DaySummary> {
    let in_window: Vec<&HourlyRisk> = hours
        .iter()
        .filter(|(t, _)| (work_start..work_end).contains(&t.hour()))
        .map(|(_, r)| r)
        .collect();

    let selected: Vec<&HourlyRisk> = if in_window.is_empty() {
        hours.iter().map(|(_, r)| r).collect()
    } else {
        in_window
    };

    if selected.is_empty() {
        return None;
    }

    let peak_risk = selected.iter().map(|r| r.risk).fold(0.0, f64::max);
    let recommendation = selected
        .iter()
        .map(|r| r.level)
        .max()
        .unwrap_or(RiskLevel::Go);

    Some(DaySummary {
        peak_risk,
        recommendation,
        hours: selected.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::hourly_grid;
    use crate::services::ensemble::{combine, EnsembleConfig};
    use crate::services::normalize::NormalizedForecast;
    use crate::services::open_meteo::WeatherModel;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// One-hour ensemble where each member supplies (wind, gust, precip, temp).
    fn hour_from(members: &[(WeatherModel, [f64; 4])]) -> CombinedHour {
        let times = hourly_grid(utc("2026-03-01T10:00:00Z"), utc("2026-03-01T11:00:00Z"));
        let forecasts: Vec<NormalizedForecast> = members
            .iter()
            .map(|(model, v)| {
                NormalizedForecast::from_columns(
                    *model,
                    times.clone(),
                    &[
                        (Variable::WindSpeed, vec![Some(v[0])]),
                        (Variable::WindGust, vec![Some(v[1])]),
                        (Variable::Precipitation, vec![Some(v[2])]),
                        (Variable::Temperature, vec![Some(v[3])]),
                    ],
                )
            })
            .collect();
        combine(&forecasts, utc("2026-03-01T05:00:00Z"), &EnsembleConfig::default())
            .pop()
            .unwrap()
    }

    fn hourly(risk: f64) -> HourlyRisk {
        HourlyRisk {
            risk,
            level: classify(risk),
            limiting: None,
            escalated: false,
        }
    }

    #[test]
    fn test_score_rising_boundaries() {
        assert_eq!(score_rising(6.0, 10.0, 14.0), 0.0);
        assert!(approx(score_rising(8.0, 10.0, 14.0), 25.0));
        assert_eq!(score_rising(10.0, 10.0, 14.0), 50.0);
        assert!(approx(score_rising(12.0, 10.0, 14.0), 75.0));
        assert_eq!(score_rising(14.0, 10.0, 14.0), 100.0);
        assert_eq!(score_rising(30.0, 10.0, 14.0), 100.0);
    }

    #[test]
    fn test_score_rising_zero_floor_clamped_at_zero() {
        // precip 0.7 / 2.0: zero point would be -0.6, clamped to 0.
        assert_eq!(score_rising(0.0, 0.7, 2.0), 0.0);
        assert!(approx(score_rising(0.35, 0.7, 2.0), 25.0));
    }

    #[test]
    fn test_score_falling_temperature_inversion() {
        // caution 1 °C, cancel -2 °C: zero at 4 °C.
        assert_eq!(score_falling(4.0, 1.0, -2.0), 0.0);
        assert!(approx(score_falling(2.5, 1.0, -2.0), 25.0));
        assert_eq!(score_falling(1.0, 1.0, -2.0), 50.0);
        assert!(approx(score_falling(-0.5, 1.0, -2.0), 75.0));
        assert_eq!(score_falling(-2.0, 1.0, -2.0), 100.0);
        assert_eq!(score_falling(-10.0, 1.0, -2.0), 100.0);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0.0), RiskLevel::Go);
        assert_eq!(classify(49.9), RiskLevel::Go);
        assert_eq!(classify(50.0), RiskLevel::Caution);
        assert_eq!(classify(99.9), RiskLevel::Caution);
        assert_eq!(classify(100.0), RiskLevel::Cancel);
    }

    #[test]
    fn test_calculate_hourly_risk_takes_worst_variable() {
        let t = Thresholds::default();
        assert_eq!(calculate_hourly_risk(3.0, 5.0, 0.0, 10.0, &t), 0.0);
        assert_eq!(calculate_hourly_risk(3.0, 20.0, 0.0, 10.0, &t), 100.0);
        assert_eq!(calculate_hourly_risk(3.0, 5.0, 0.0, 1.0, &t), 50.0);
    }

    #[test]
    fn test_exposure_scales_wind() {
        let hour = hour_from(&[(WeatherModel::Ukv, [9.0, 5.0, 0.0, 10.0])]);
        let t = Thresholds::default();

        let urban = evaluate_hour(&hour, &t, Exposure::Urban);
        let highland = evaluate_hour(&hour, &t, Exposure::Highland);

        assert_eq!(urban.level, RiskLevel::Go);
        // 9 × 1.2 = 10.8 m/s, above the 10 m/s caution threshold.
        assert_eq!(highland.level, RiskLevel::Caution);
        assert_eq!(highland.limiting, Some(Variable::WindSpeed));
        assert!(highland.risk > urban.risk);
    }

    #[test]
    fn test_uncertainty_escalation() {
        // Mean wind ≈ 7 m/s (GO) but one member reaches the 14 m/s cancel limit.
        let hour = hour_from(&[
            (WeatherModel::Ukv, [4.0, 6.0, 0.0, 10.0]),
            (WeatherModel::IconEu, [4.0, 6.0, 0.0, 10.0]),
            (WeatherModel::Ecmwf, [14.0, 6.0, 0.0, 10.0]),
        ]);
        let r = evaluate_hour(&hour, &Thresholds::default(), Exposure::Urban);
        assert!(r.risk < CAUTION_SCORE, "mean risk {}", r.risk);
        assert!(r.escalated);
        assert_eq!(r.level, RiskLevel::Caution);
    }

    #[test]
    fn test_no_escalation_when_band_stays_below_cancel() {
        let hour = hour_from(&[
            (WeatherModel::Ukv, [4.0, 6.0, 0.0, 10.0]),
            (WeatherModel::Ecmwf, [11.0, 6.0, 0.0, 10.0]),
        ]);
        let r = evaluate_hour(&hour, &Thresholds::default(), Exposure::Urban);
        assert!(!r.escalated);
        assert_eq!(r.level, classify(r.risk));
    }

    #[test]
    fn test_visibility_scored_only_with_thresholds() {
        let times = hourly_grid(utc("2026-03-01T10:00:00Z"), utc("2026-03-01T11:00:00Z"));
        let f = NormalizedForecast::from_columns(
            WeatherModel::Ukv,
            times,
            &[(Variable::Visibility, vec![Some(150.0)])],
        );
        let hour = combine(&[f], utc("2026-03-01T05:00:00Z"), &EnsembleConfig::default())
            .pop()
            .unwrap();

        let mut t = Thresholds::default();
        assert_eq!(evaluate_hour(&hour, &t, Exposure::Urban).risk, 0.0);

        t.visibility_min_caution = Some(1000.0);
        t.visibility_min_cancel = Some(200.0);
        let r = evaluate_hour(&hour, &t, Exposure::Urban);
        assert_eq!(r.level, RiskLevel::Cancel);
        assert_eq!(r.limiting, Some(Variable::Visibility));
    }

    #[test]
    fn test_summarize_day_uses_work_window() {
        let hours = vec![
            (utc("2026-03-01T03:00:00Z"), hourly(100.0)),
            (utc("2026-03-01T08:00:00Z"), hourly(30.0)),
            (utc("2026-03-01T12:00:00Z"), hourly(60.0)),
            (utc("2026-03-01T18:00:00Z"), hourly(100.0)),
        ];
        let s = summarize_day(&hours, 7, 18).unwrap();
        assert_eq!(s.peak_risk, 60.0);
        assert_eq!(s.recommendation, RiskLevel::Caution);
        assert_eq!(s.hours, 2);
    }

    #[test]
    fn test_summarize_day_falls_back_to_all_hours() {
        let hours = vec![
            (utc("2026-03-01T20:00:00Z"), hourly(10.0)),
            (utc("2026-03-01T21:00:00Z"), hourly(55.0)),
        ];
        let s = summarize_day(&hours, 7, 18).unwrap();
        assert_eq!(s.peak_risk, 55.0);
        assert_eq!(s.recommendation, RiskLevel::Caution);
        assert!(summarize_day(&[], 7, 18).is_none());
    }

    #[test]
    fn test_summarize_day_keeps_escalated_level() {
        let mut escalated = hourly(20.0);
        escalated.level = RiskLevel::Caution;
        escalated.escalated = true;
        let hours = vec![(utc("2026-03-01T09:00:00Z"), escalated)];
        let s = summarize_day(&hours, 7, 18).unwrap();
        assert_eq!(s.peak_risk, 20.0);
        assert_eq!(s.recommendation, RiskLevel::Caution);
    }

    #[test]
    fn test_thresholds_validate() {
        assert!(Thresholds::default().validate().is_ok());

        let mut t = Thresholds::default();
        t.gust_cancel = 10.0;
        assert!(t.validate().is_err());

        let mut t = Thresholds::default();
        t.temp_min_cancel = 5.0;
        assert!(t.validate().is_err());

        let mut t = Thresholds::default();
        t.visibility_min_caution = Some(1000.0);
        assert!(t.validate().is_err());
        t.visibility_min_cancel = Some(200.0);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_exposure_and_level_parsing() {
        assert_eq!("Coastal".parse::<Exposure>().unwrap(), Exposure::Coastal);
        assert!("desert".parse::<Exposure>().is_err());
        assert_eq!("CANCEL".parse::<RiskLevel>().unwrap(), RiskLevel::Cancel);
        assert!(RiskLevel::Cancel > RiskLevel::Caution && RiskLevel::Caution > RiskLevel::Go);
        assert_eq!(
            serde_json::to_value(RiskLevel::Caution).unwrap(),
            serde_json::json!("CAUTION")
        );
    }

    #[test]
    fn test_over_precise_thresholds_match_stored_profile() {
        use rust_decimal::Decimal;
        use std::str::FromStr;

        let dec = |v: &str| Decimal::from_str(v).unwrap();
        let thresholds = Thresholds {
            wind_mean_caution: 10.125,
            gust_cancel: 20.004,
            temp_min_cancel: -2.125,
            visibility_min_caution: Some(1234.56),
            visibility_min_cancel: Some(200.04),
            ..Thresholds::default()
        };
        let params = thresholds.to_params();

        // Values as NUMERIC(6, 2) / NUMERIC(8, 1) hand them back.
        let stored = ThresholdProfileRow {
            id: uuid::Uuid::new_v4(),
            site_id: uuid::Uuid::new_v4(),
            version: 1,
            is_active: true,
            wind_mean_caution: dec("10.13"),
            wind_mean_cancel: dec("14.00"),
            gust_caution: dec("15.00"),
            gust_cancel: dec("20.00"),
            precip_caution: dec("0.70"),
            precip_cancel: dec("2.00"),
            temp_min_caution: dec("1.00"),
            temp_min_cancel: dec("-2.13"),
            visibility_min_caution: Some(dec("1234.6")),
            visibility_min_cancel: Some(dec("200.0")),
            created_by: Some("registry".to_string()),
            created_at: Utc::now(),
        };

        assert_eq!(ThresholdParams::from(&stored), params);
        assert_eq!(Thresholds::from(&stored).to_params(), params);
    }
}
