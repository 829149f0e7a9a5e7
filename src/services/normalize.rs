//! Normalizes raw per-model forecasts onto a common schema.
//!
//! All models end up on the same hourly UTC grid with SI units:
//! wind and gust in m/s, precipitation in mm/h, temperature in °C and
//! visibility in metres. Short gaps in continuous variables are filled by
//! linear interpolation; precipitation is an accumulation and is never
//! interpolated.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use utoipa::ToSchema;

use crate::helpers::floor_to_hour;
use crate::services::open_meteo::{RawModelForecast, WeatherModel};

/// Longest run of missing hours that is filled by interpolation.
pub const MAX_INTERPOLATION_GAP_HOURS: usize = 3;

/// A weather variable carried through the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    WindSpeed,
    WindGust,
    Precipitation,
    Temperature,
    Visibility,
}

impl Variable {
    pub const ALL: [Variable; 5] = [
        Variable::WindSpeed,
        Variable::WindGust,
        Variable::Precipitation,
        Variable::Temperature,
        Variable::Visibility,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Variable::WindSpeed => "wind_speed",
            Variable::WindGust => "wind_gust",
            Variable::Precipitation => "precipitation",
            Variable::Temperature => "temperature",
            Variable::Visibility => "visibility",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Variable::WindSpeed => 0,
            Variable::WindGust => 1,
            Variable::Precipitation => 2,
            Variable::Temperature => 3,
            Variable::Visibility => 4,
        }
    }

    /// Physically non-negative quantities.
    fn is_non_negative(self) -> bool {
        matches!(
            self,
            Variable::WindSpeed | Variable::WindGust | Variable::Precipitation | Variable::Visibility
        )
    }

    fn interpolates(self) -> bool {
        self != Variable::Precipitation
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One model's forecast on the common grid.
#[derive(Debug, Clone)]
pub struct NormalizedForecast {
    pub model: WeatherModel,
    pub times: Vec<DateTime<Utc>>,
    values: [Vec<Option<f64>>; 5],
}

impl NormalizedForecast {
    pub fn series(&self, var: Variable) -> &[Option<f64>] {
        &self.values[var.index()]
    }

    pub fn value(&self, var: Variable, idx: usize) -> Option<f64> {
        self.values[var.index()].get(idx).copied().flatten()
    }

    /// Number of grid hours with a value for `var`.
    pub fn present_hours(&self, var: Variable) -> usize {
        self.series(var).iter().filter(|v| v.is_some()).count()
    }

    /// Build a forecast directly from already-normalized columns.
    #[cfg(test)]
    pub(crate) fn from_columns(
        model: WeatherModel,
        times: Vec<DateTime<Utc>>,
        columns: &[(Variable, Vec<Option<f64>>)],
    ) -> Self {
        let mut values: [Vec<Option<f64>>; 5] = std::array::from_fn(|_| vec![None; times.len()]);
        for (var, column) in columns {
            values[var.index()] = column.clone();
        }
        Self {
            model,
            times,
            values,
        }
    }
}

/// Parse an Open-Meteo timestamp (`YYYY-MM-DDTHH:MM`, UTC). Seconds and
/// RFC 3339 offsets are accepted too.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a value from the unit Open-Meteo reported into the pipeline's SI unit.
fn to_si(var: Variable, unit: Option<&str>, v: f64) -> f64 {
    let unit = unit.map(str::trim).unwrap_or("");
    match var {
        Variable::WindSpeed | Variable::WindGust => match unit {
            "km/h" | "kmh" => v / 3.6,
            "mph" | "mp/h" => v * 0.447_04,
            "kn" | "kt" | "knots" => v * 0.514_444,
            "m/s" | "ms" | "" => v,
            other => {
                tracing::warn!("Unknown wind unit '{}', assuming m/s", other);
                v
            }
        },
        Variable::Precipitation => match unit {
            "inch" | "in" => v * 25.4,
            "mm" | "" => v,
            other => {
                tracing::warn!("Unknown precipitation unit '{}', assuming mm", other);
                v
            }
        },
        Variable::Temperature => match unit {
            "°F" | "F" | "degF" => (v - 32.0) * 5.0 / 9.0,
            "°C" | "C" | "degC" | "" => v,
            other => {
                tracing::warn!("Unknown temperature unit '{}', assuming °C", other);
                v
            }
        },
        Variable::Visibility => match unit {
            "ft" | "feet" => v * 0.3048,
            "km" => v * 1000.0,
            "m" | "" => v,
            other => {
                tracing::warn!("Unknown visibility unit '{}', assuming m", other);
                v
            }
        },
    }
}

fn sanitize(var: Variable, v: f64) -> Option<f64> {
    if !v.is_finite() {
        return None;
    }
    if var.is_non_negative() && v < 0.0 {
        return Some(0.0);
    }
    Some(v)
}

fn raw_series(raw: &RawModelForecast, var: Variable) -> (&[Option<f64>], Option<&str>) {
    let h = &raw.hourly;
    let u = &raw.units;
    match var {
        Variable::WindSpeed => (&h.wind_speed_10m, u.wind_speed_10m.as_deref()),
        Variable::WindGust => (&h.wind_gusts_10m, u.wind_gusts_10m.as_deref()),
        Variable::Precipitation => (&h.precipitation, u.precipitation.as_deref()),
        Variable::Temperature => (&h.temperature_2m, u.temperature_2m.as_deref()),
        Variable::Visibility => (&h.visibility, u.visibility.as_deref()),
    }
}

/// Linearly fill runs of at most `max_gap` missing values bounded by known
/// values on both sides. Leading and trailing gaps are left empty.
pub fn interpolate_gaps(series: &mut [Option<f64>], max_gap: usize) {
    let mut last_known: Option<usize> = None;
    for i in 0..series.len() {
        let Some(current) = series[i] else { continue };
        if let Some(prev_idx) = last_known {
            let missing = i - prev_idx - 1;
            if missing > 0 && missing <= max_gap {
                if let Some(prev) = series[prev_idx] {
                    let step = (current - prev) / (missing + 1) as f64;
                    for k in 1..=missing {
                        series[prev_idx + k] = Some(prev + step * k as f64);
                    }
                }
            }
        }
        last_known = Some(i);
    }
}

/// Map a raw model forecast onto `grid` (sorted hourly UTC instants).
///
/// Timestamps are floored to the hour; the first value for an hour wins and
/// hours outside the grid are dropped.
pub fn normalize(raw: &RawModelForecast, grid: &[DateTime<Utc>]) -> NormalizedForecast {
    let slot_of: HashMap<DateTime<Utc>, usize> =
        grid.iter().enumerate().map(|(i, t)| (*t, i)).collect();

    let mut values: [Vec<Option<f64>>; 5] = std::array::from_fn(|_| vec![None; grid.len()]);
    let mut filled = vec![false; grid.len()];
    let mut unparsable = 0usize;

    for (i, time_str) in raw.hourly.time.iter().enumerate() {
        let Some(time) = parse_time(time_str) else {
            unparsable += 1;
            continue;
        };
        let Some(&slot) = slot_of.get(&floor_to_hour(time)) else {
            continue;
        };
        if filled[slot] {
            continue;
        }
        filled[slot] = true;

        for var in Variable::ALL {
            let (series, unit) = raw_series(raw, var);
            values[var.index()][slot] = series
                .get(i)
                .copied()
                .flatten()
                .map(|v| to_si(var, unit, v))
                .and_then(|v| sanitize(var, v));
        }
    }

    if unparsable > 0 {
        tracing::warn!(
            "{}: skipped {} unparsable timestamps",
            raw.model,
            unparsable
        );
    }

    for var in Variable::ALL.into_iter().filter(|v| v.interpolates()) {
        interpolate_gaps(&mut values[var.index()], MAX_INTERPOLATION_GAP_HOURS);
    }

    NormalizedForecast {
        model: raw.model,
        times: grid.to_vec(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::hourly_grid;
    use crate::services::open_meteo::{HourlyUnits, RawHourly};

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    fn raw(times: &[&str], wind: Vec<Option<f64>>) -> RawModelForecast {
        let n = times.len();
        RawModelForecast {
            model: WeatherModel::Ukv,
            latitude: 51.5,
            longitude: -0.1,
            elevation: None,
            units: HourlyUnits {
                wind_speed_10m: Some("m/s".into()),
                wind_gusts_10m: Some("m/s".into()),
                precipitation: Some("mm".into()),
                temperature_2m: Some("°C".into()),
                visibility: Some("m".into()),
            },
            hourly: RawHourly {
                time: times.iter().map(|s| s.to_string()).collect(),
                wind_speed_10m: wind,
                wind_gusts_10m: vec![Some(8.0); n],
                precipitation: vec![Some(0.2); n],
                temperature_2m: vec![Some(5.0); n],
                visibility: vec![Some(20000.0); n],
            },
        }
    }

    fn grid_3h() -> Vec<DateTime<Utc>> {
        hourly_grid(utc("2026-03-01T00:00:00Z"), utc("2026-03-01T03:00:00Z"))
    }

    #[test]
    fn test_parse_time_formats() {
        let expected = utc("2026-03-01T07:00:00Z");
        assert_eq!(parse_time("2026-03-01T07:00"), Some(expected));
        assert_eq!(parse_time("2026-03-01T07:00:00"), Some(expected));
        assert_eq!(parse_time("2026-03-01T07:00:00Z"), Some(expected));
        assert_eq!(parse_time("2026-03-01T08:00:00+01:00"), Some(expected));
        assert_eq!(parse_time("yesterday"), None);
    }

    #[test]
    fn test_unit_conversions() {
        assert!((to_si(Variable::WindSpeed, Some("km/h"), 36.0) - 10.0).abs() < 1e-9);
        assert!((to_si(Variable::WindGust, Some("mph"), 10.0) - 4.4704).abs() < 1e-9);
        assert!((to_si(Variable::WindSpeed, Some("kn"), 10.0) - 5.14444).abs() < 1e-9);
        assert!((to_si(Variable::Precipitation, Some("inch"), 1.0) - 25.4).abs() < 1e-9);
        assert!((to_si(Variable::Temperature, Some("°F"), 50.0) - 10.0).abs() < 1e-9);
        assert!((to_si(Variable::Visibility, Some("ft"), 1000.0) - 304.8).abs() < 1e-9);
        assert_eq!(to_si(Variable::Temperature, Some("°C"), -3.5), -3.5);
        assert_eq!(to_si(Variable::WindSpeed, None, 7.0), 7.0);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(Variable::WindSpeed, f64::NAN), None);
        assert_eq!(sanitize(Variable::Temperature, f64::INFINITY), None);
        assert_eq!(sanitize(Variable::Precipitation, -0.1), Some(0.0));
        assert_eq!(sanitize(Variable::Temperature, -4.0), Some(-4.0));
    }

    #[test]
    fn test_normalize_aligns_to_grid_and_clips_window() {
        let r = raw(
            &["2026-02-28T23:00", "2026-03-01T01:00", "2026-03-01T02:00", "2026-03-01T03:00"],
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)],
        );
        let n = normalize(&r, &grid_3h());

        assert_eq!(n.times.len(), 3);
        assert_eq!(
            n.series(Variable::WindSpeed),
            &[None, Some(2.0), Some(3.0)],
            "00:00 missing (no leading extrapolation); 23:00 and 03:00 outside window"
        );
    }

    #[test]
    fn test_normalize_first_duplicate_wins() {
        let r = raw(
            &["2026-03-01T00:00", "2026-03-01T00:30", "2026-03-01T01:00"],
            vec![Some(5.0), Some(9.0), Some(6.0)],
        );
        let n = normalize(&r, &grid_3h());
        assert_eq!(n.value(Variable::WindSpeed, 0), Some(5.0));
        assert_eq!(n.value(Variable::WindSpeed, 1), Some(6.0));
    }

    #[test]
    fn test_normalize_converts_and_sanitizes() {
        let mut r = raw(
            &["2026-03-01T00:00", "2026-03-01T01:00", "2026-03-01T02:00"],
            vec![Some(36.0), Some(f64::NAN), Some(-3.6)],
        );
        r.units.wind_speed_10m = Some("km/h".into());
        r.hourly.precipitation = vec![Some(-0.5), None, Some(1.0)];

        let n = normalize(&r, &grid_3h());
        let wind = n.series(Variable::WindSpeed);
        assert!((wind[0].unwrap() - 10.0).abs() < 1e-9);
        // NaN hour is bracketed by known values and gets interpolated.
        assert!((wind[1].unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(wind[2], Some(0.0));
        assert_eq!(
            n.series(Variable::Precipitation),
            &[Some(0.0), None, Some(1.0)]
        );
    }

    #[test]
    fn test_interpolate_short_gap() {
        let mut s = vec![Some(2.0), None, None, None, Some(6.0)];
        interpolate_gaps(&mut s, 3);
        assert_eq!(s, vec![Some(2.0), Some(3.0), Some(4.0), Some(5.0), Some(6.0)]);
    }

    #[test]
    fn test_interpolate_leaves_long_gap_and_edges() {
        let mut s = vec![None, Some(1.0), None, None, None, None, Some(9.0), None];
        interpolate_gaps(&mut s, 3);
        assert_eq!(
            s,
            vec![None, Some(1.0), None, None, None, None, Some(9.0), None]
        );
    }

    #[test]
    fn test_precipitation_never_interpolated() {
        let times = ["2026-03-01T00:00", "2026-03-01T01:00", "2026-03-01T02:00"];
        let mut r = raw(&times, vec![Some(1.0), None, Some(3.0)]);
        r.hourly.precipitation = vec![Some(1.0), None, Some(3.0)];

        let n = normalize(&r, &grid_3h());
        assert_eq!(n.value(Variable::WindSpeed, 1), Some(2.0));
        assert_eq!(n.value(Variable::Precipitation, 1), None);
        assert_eq!(n.present_hours(Variable::Precipitation), 2);
    }

    #[test]
    fn test_short_value_arrays_are_missing() {
        let times = ["2026-03-01T00:00", "2026-03-01T01:00", "2026-03-01T02:00"];
        let mut r = raw(&times, vec![Some(1.0), Some(2.0), Some(3.0)]);
        r.hourly.visibility = vec![Some(10000.0)];

        let n = normalize(&r, &grid_3h());
        assert_eq!(n.series(Variable::Visibility), &[Some(10000.0), None, None]);
    }
}
