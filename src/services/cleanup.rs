//! Retention cleanup for generated forecast data.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::db::queries::{self, RetentionCounts};
use crate::errors::AppError;

/// Default retention window (days).
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Anything generated before this instant is eligible for deletion.
pub fn retention_cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}

/// Delete forecast runs, UK risk maps and risk grid runs older than `days`.
///
/// With `dry_run` nothing is deleted and the counts report what would go.
pub async fn cleanup_forecasts(
    pool: &PgPool,
    days: i64,
    dry_run: bool,
) -> Result<RetentionCounts, AppError> {
    if days < 1 {
        return Err(AppError::BadRequest(format!(
            "Retention must be at least 1 day, got {}",
            days
        )));
    }

    let cutoff = retention_cutoff(Utc::now(), days);

    if dry_run {
        let counts = queries::count_generated_before(pool, cutoff).await?;
        tracing::info!(
            "Would delete {} forecast runs, {} UK risk maps and {} risk grid runs older than {} days",
            counts.forecast_runs,
            counts.uk_risk_maps,
            counts.risk_grid_runs,
            days
        );
        return Ok(counts);
    }

    let counts = queries::delete_generated_before(pool, cutoff).await?;
    tracing::info!(
        "Deleted {} forecast runs, {} UK risk maps and {} risk grid runs older than {} days",
        counts.forecast_runs,
        counts.uk_risk_maps,
        counts.risk_grid_runs,
        days
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_cutoff() {
        let now = "2026-03-31T05:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            retention_cutoff(now, DEFAULT_RETENTION_DAYS),
            "2026-03-01T05:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}
