//! Ensemble combiner.
//!
//! Merges normalized model forecasts hour by hour into a lead-time weighted
//! mean with an uncertainty band (min / max / spread), and flags hours where
//! the members disagree or too few of them contributed.
//!
//! Weighting favours the high-resolution UKV at short range and the global
//! ECMWF beyond two days:
//!
//! | lead      | UKV  | ECMWF | ICON-EU | ARPEGE |
//! |-----------|------|-------|---------|--------|
//! | < 24 h    | 0.35 | 0.20  | 0.25    | 0.20   |
//! | 24–48 h   | 0.30 | 0.25  | 0.25    | 0.20   |
//! | > 48 h    | 0.00 | 0.40  | 0.30    | 0.30   |
//!
//! Weights are renormalized over the members present for each hour and
//! variable. If every present member has zero weight the plain mean is used.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::normalize::{NormalizedForecast, Variable};
use crate::services::open_meteo::WeatherModel;

/// Default minimum number of wind members for a confident hour.
pub const DEFAULT_MIN_MEMBERS: usize = 2;

/// Spread above which members are considered to disagree, per variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisagreementTolerances {
    pub wind_speed: f64,
    pub wind_gust: f64,
    pub precipitation: f64,
    pub temperature: f64,
    pub visibility: f64,
}

impl Default for DisagreementTolerances {
    fn default() -> Self {
        Self {
            wind_speed: 4.0,
            wind_gust: 6.0,
            precipitation: 1.0,
            temperature: 3.0,
            visibility: 5000.0,
        }
    }
}

impl DisagreementTolerances {
    pub fn get(&self, var: Variable) -> f64 {
        match var {
            Variable::WindSpeed => self.wind_speed,
            Variable::WindGust => self.wind_gust,
            Variable::Precipitation => self.precipitation,
            Variable::Temperature => self.temperature,
            Variable::Visibility => self.visibility,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleConfig {
    pub tolerances: DisagreementTolerances,
    pub min_members: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            tolerances: DisagreementTolerances::default(),
            min_members: DEFAULT_MIN_MEMBERS,
        }
    }
}

/// Weight of `model` at a lead time of `lead_hours`.
pub fn model_weight(model: WeatherModel, lead_hours: i64) -> f64 {
    match (lead_hours, model) {
        (l, WeatherModel::Ukv) if l < 24 => 0.35,
        (l, WeatherModel::IconEu) if l < 24 => 0.25,
        (l, WeatherModel::Arpege) if l < 24 => 0.20,
        (l, WeatherModel::Ecmwf) if l < 24 => 0.20,
        (l, WeatherModel::Ukv) if l <= 48 => 0.30,
        (l, WeatherModel::Ecmwf) if l <= 48 => 0.25,
        (l, WeatherModel::IconEu) if l <= 48 => 0.25,
        (l, WeatherModel::Arpege) if l <= 48 => 0.20,
        (_, WeatherModel::Ecmwf) => 0.40,
        (_, WeatherModel::IconEu) => 0.30,
        (_, WeatherModel::Arpege) => 0.30,
        (_, WeatherModel::Ukv) => 0.0,
    }
}

/// Band statistics for one variable in one hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct VariableStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub spread: f64,
    pub members: usize,
}

/// Combined ensemble values for one valid hour.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedHour {
    pub valid_time: DateTime<Utc>,
    /// Hours between issue time and valid time (negative for hours already past).
    pub lead_hours: i64,
    stats: [Option<VariableStats>; 5],
    /// Models contributing at least one variable.
    pub members: usize,
    pub disagreement: Vec<Variable>,
    pub low_confidence: bool,
}

impl CombinedHour {
    pub fn stats(&self, var: Variable) -> Option<VariableStats> {
        self.stats[var.index()]
    }

    pub fn mean(&self, var: Variable) -> Option<f64> {
        self.stats(var).map(|s| s.mean)
    }
}

/// Weighted statistics over `(weight, value)` samples. `None` when empty.
pub fn combine_values(samples: &[(f64, f64)]) -> Option<VariableStats> {
    if samples.is_empty() {
        return None;
    }

    let min = samples.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = samples
        .iter()
        .map(|(_, v)| *v)
        .fold(f64::NEG_INFINITY, f64::max);

    let total_weight: f64 = samples.iter().map(|(w, _)| w.max(0.0)).sum();
    let mean = if total_weight > 0.0 {
        samples.iter().map(|(w, v)| w.max(0.0) * v).sum::<f64>() / total_weight
    } else {
        samples.iter().map(|(_, v)| v).sum::<f64>() / samples.len() as f64
    };

    Some(VariableStats {
        mean: mean.clamp(min, max),
        min,
        max,
        spread: max - min,
        members: samples.len(),
    })
}

/// Combine member forecasts that share the same hourly grid.
///
/// Hours where no member has any value are omitted.
pub fn combine(
    members: &[NormalizedForecast],
    issued_at: DateTime<Utc>,
    config: &EnsembleConfig,
) -> Vec<CombinedHour> {
    let Some(first) = members.first() else {
        return Vec::new();
    };

    let mut hours = Vec::with_capacity(first.times.len());

    for (idx, &valid_time) in first.times.iter().enumerate() {
        let lead_hours = (valid_time - issued_at).num_hours();

        let mut stats: [Option<VariableStats>; 5] = [None; 5];
        for var in Variable::ALL {
            let samples: Vec<(f64, f64)> = members
                .iter()
                .filter_map(|m| {
                    m.value(var, idx)
                        .map(|v| (model_weight(m.model, lead_hours), v))
                })
                .collect();
            stats[var.index()] = combine_values(&samples);
        }

        let contributing = members
            .iter()
            .filter(|m| Variable::ALL.iter().any(|&v| m.value(v, idx).is_some()))
            .count();
        if contributing == 0 {
            continue;
        }

        let disagreement: Vec<Variable> = Variable::ALL
            .into_iter()
            .filter(|&var| {
                stats[var.index()]
                    .is_some_and(|s| s.members > 1 && s.spread > config.tolerances.get(var))
            })
            .collect();

        let wind_members = stats[Variable::WindSpeed.index()]
            .map(|s| s.members)
            .unwrap_or(0);

        hours.push(CombinedHour {
            valid_time,
            lead_hours,
            stats,
            members: contributing,
            disagreement,
            low_confidence: wind_members < config.min_members,
        });
    }

    hours
}
