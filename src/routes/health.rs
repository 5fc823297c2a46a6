use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::health::HealthResponse, services::health_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses(
        (status = 200, description = "Per-store reachability, the degraded verdict and the failed job count", body = HealthResponse)
    )
)]
/// Report whether the quiz backend accepts writes right now.
///
/// Always answers 200; a degraded backend is signalled in the body so load
/// balancers keep routing the read-only lookups.
pub async fn quiz_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(health_service::health_status(&state).await)
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/healthcheck", get(quiz_health))
}
