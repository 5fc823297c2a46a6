use axum::{Json, Router, extract::State, routing::get};

use crate::{jobs::FailedJob, state::SharedState};

#[utoipa::path(
    get,
    path = "/jobs/failed",
    tag = "jobs",
    responses((status = 200, description = "Jobs that exhausted their attempts, oldest first", body = [FailedJob]))
)]
/// List the most recent exhausted jobs across every queue.
pub async fn failed_jobs(State(state): State<SharedState>) -> Json<Vec<FailedJob>> {
    Json(state.jobs().failed_jobs())
}

/// Configure the job inspection routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/jobs/failed", get(failed_jobs))
}
