//! Scheduler status HTTP endpoint.
//!
//! GET /api/v1/scheduler/status: in-memory state of the forecast scheduler.

use axum::extract::State;
use axum::Json;

use crate::services::scheduler::{SchedulerState, SharedSchedulerState};

/// Get the current scheduler status.
///
/// Returns the wake-up hours, next and last cycle times, the last batch
/// summary, cleanup counts and any errors from the last cycle.
#[utoipa::path(
    get,
    path = "/api/v1/scheduler/status",
    tag = "Scheduler",
    responses(
        (status = 200, description = "Current scheduler status", body = SchedulerState),
    )
)]
pub async fn get_scheduler_status(State(state): State<SharedSchedulerState>) -> Json<SchedulerState> {
    let s = state.read().await;
    Json(s.clone())
}
