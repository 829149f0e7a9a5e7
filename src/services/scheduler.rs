//! Background scheduler for twice-daily forecast refreshes.
//!
//! Wakes at fixed UTC hours (`SCHEDULE_HOURS`, default 05:00 and 17:00) and
//! runs a full cycle:
//! - forecast every active, incomplete site with coordinates
//! - rebuild the UK risk map for each forecast date
//! - once per UTC day, delete data older than the retention window
//! - optionally regenerate the UK risk grid
//!
//! State is in-memory (`Arc<RwLock<SchedulerState>>`) and exposed by the
//! status endpoint. Failures are logged and the loop carries on.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::db::queries::RetentionCounts;
use crate::services::cleanup::cleanup_forecasts;
use crate::services::forecast::{forecast_dates, run_forecasts_all_active, BatchSummary, ForecastEngine};
use crate::services::risk_grid::{generate_risk_grid, GridOptions, GridSummary};
use crate::services::risk_map::build_uk_risk_maps;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Minimum sleep between cycles (seconds), guards against clock skew loops.
const SCHEDULER_MIN_SLEEP_SECS: u64 = 1;

// ---------------------------------------------------------------------------
// Scheduler state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

/// Settings the scheduler reads from configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub schedule_hours: Vec<u32>,
    pub retention_days: i64,
    pub risk_grid_on_schedule: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            schedule_hours: config.schedule_hours.clone(),
            retention_days: config.retention_days,
            risk_grid_on_schedule: config.risk_grid_on_schedule,
        }
    }
}

/// Global scheduler state, exposed via the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerState {
    pub active: bool,
    /// True while a cycle is in progress
    pub running: bool,
    /// Wake-up hours (UTC)
    pub schedule_hours: Vec<u32>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_completed_at: Option<DateTime<Utc>>,
    pub last_run_duration_ms: Option<u64>,
    pub total_runs: u64,
    pub last_batch: Option<BatchSummary>,
    pub last_risk_maps_built: usize,
    pub last_cleanup_date: Option<NaiveDate>,
    pub last_cleanup: Option<RetentionCounts>,
    pub last_risk_grid: Option<GridSummary>,
    /// Errors from the last cycle, in the order they occurred
    pub last_errors: Vec<String>,
}

impl SchedulerState {
    pub fn new(schedule_hours: Vec<u32>) -> Self {
        Self {
            active: true,
            running: false,
            schedule_hours,
            next_run_at: None,
            last_run_started_at: None,
            last_run_completed_at: None,
            last_run_duration_ms: None,
            total_runs: 0,
            last_batch: None,
            last_risk_maps_built: 0,
            last_cleanup_date: None,
            last_cleanup: None,
            last_risk_grid: None,
            last_errors: Vec::new(),
        }
    }
}

/// Shared scheduler state handle.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Next wake-up strictly after `now` at one of the given UTC hours.
///
/// `hours` must be non-empty (configuration guarantees it); an empty list
/// falls back to the same hour tomorrow.
pub fn compute_next_run(now: DateTime<Utc>, hours: &[u32]) -> DateTime<Utc> {
    let today_midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc())
        .unwrap_or(now);

    let mut sorted: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).collect();
    sorted.sort_unstable();

    for day in 0..=1 {
        for &hour in &sorted {
            let candidate = today_midnight + Duration::days(day) + Duration::hours(hour as i64);
            if candidate > now {
                return candidate;
            }
        }
    }

    today_midnight + Duration::days(1) + Duration::hours(now.hour() as i64)
}

/// Cleanup runs at most once per UTC day.
fn cleanup_due(last_cleanup: Option<NaiveDate>, today: NaiveDate) -> bool {
    last_cleanup.map_or(true, |last| last < today)
}

// ---------------------------------------------------------------------------
// Main scheduler loop
// ---------------------------------------------------------------------------

/// Run the background scheduler. This function never returns (runs until process exit).
///
/// Should be spawned via `tokio::spawn(run_scheduler(...))`.
pub async fn run_scheduler(
    engine: ForecastEngine,
    settings: SchedulerSettings,
    state: SharedSchedulerState,
) {
    tracing::info!(
        "Forecast scheduler started (UTC hours {:?})",
        settings.schedule_hours
    );

    loop {
        let now = Utc::now();
        let next = compute_next_run(now, &settings.schedule_hours);
        {
            let mut s = state.write().await;
            s.next_run_at = Some(next);
        }

        let wait = (next - now).num_seconds().max(0) as u64;
        tracing::debug!("Scheduler: sleeping {} seconds until {}", wait, next);
        sleep_secs(wait.max(SCHEDULER_MIN_SLEEP_SECS)).await;

        run_cycle(&engine, &settings, &state).await;
    }
}

/// One full scheduled cycle.
pub async fn run_cycle(engine: &ForecastEngine, settings: &SchedulerSettings, state: &SharedSchedulerState) {
    let started = Utc::now();
    let today = started.date_naive();
    let mut errors = Vec::new();

    let last_cleanup_date = {
        let mut s = state.write().await;
        s.running = true;
        s.last_run_started_at = Some(started);
        s.last_cleanup_date
    };
    tracing::info!("Scheduler: cycle started at {}", started);

    // 1. Forecast all active sites
    let batch = match run_forecasts_all_active(engine).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::error!("Scheduler: forecast batch failed: {}", e);
            errors.push(format!("forecast batch: {}", e));
            None
        }
    };

    // 2. Rebuild UK risk maps for every forecast date
    let dates = forecast_dates(today, engine.settings.forecast_days);
    let maps_built = build_uk_risk_maps(&engine.pool, &dates).await;
    if maps_built < dates.len() {
        errors.push(format!(
            "risk maps: {} of {} dates failed",
            dates.len() - maps_built,
            dates.len()
        ));
    }

    // 3. Retention cleanup, once per UTC day
    let mut cleanup = None;
    let mut cleanup_date = last_cleanup_date;
    if cleanup_due(last_cleanup_date, today) {
        match cleanup_forecasts(&engine.pool, settings.retention_days, false).await {
            Ok(counts) => {
                cleanup = Some(counts);
                cleanup_date = Some(today);
            }
            Err(e) => {
                tracing::error!("Scheduler: retention cleanup failed: {}", e);
                errors.push(format!("cleanup: {}", e));
            }
        }
    }

    // 4. Optional UK risk grid
    let mut grid = None;
    if settings.risk_grid_on_schedule {
        match generate_risk_grid(&engine.pool, &engine.client, GridOptions::default()).await {
            Ok(summary) => grid = Some(summary),
            Err(e) => {
                tracing::error!("Scheduler: risk grid generation failed: {}", e);
                errors.push(format!("risk grid: {}", e));
            }
        }
    }

    let completed = Utc::now();
    let duration_ms = (completed - started).num_milliseconds().max(0) as u64;

    let mut s = state.write().await;
    s.running = false;
    s.last_run_completed_at = Some(completed);
    s.last_run_duration_ms = Some(duration_ms);
    s.total_runs += 1;
    s.last_batch = batch;
    s.last_risk_maps_built = maps_built;
    s.last_cleanup_date = cleanup_date;
    if cleanup.is_some() {
        s.last_cleanup = cleanup;
    }
    if grid.is_some() {
        s.last_risk_grid = grid;
    }
    s.last_errors = errors;

    tracing::info!(
        "Scheduler: cycle complete in {} ms ({} error(s))",
        duration_ms,
        s.last_errors.len()
    );
}

/// Sleep for the given number of seconds.
async fn sleep_secs(secs: u64) {
    tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
}
