use serde::Serialize;
use utoipa::ToSchema;

use crate::services::storage_supervisor::StoreHealth;

/// Overall verdict of the health check.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both stores answer and writes are accepted.
    Ok,
    /// A store is unreachable, or the supervisor flagged one; writes answer 503.
    Degraded,
}

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Whether the session store answered this check.
    pub session_store: bool,
    /// Whether the live store answered this check.
    pub live_store: bool,
    /// Jobs that failed for good since start.
    pub failed_jobs: u64,
}

impl HealthResponse {
    /// Combine a fresh store check with the supervisor's degraded flag.
    pub fn new(stores: StoreHealth, flagged_degraded: bool, failed_jobs: u64) -> Self {
        let status = if stores.all_up() && !flagged_degraded {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            session_store: stores.session_store,
            live_store: stores.live_store,
            failed_jobs,
        }
    }
}
