use crate::{dto::health::HealthResponse, services::storage_supervisor, state::SharedState};

/// Ping both stores and report the failed-job count alongside the result.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let stores = storage_supervisor::check_stores(state).await;
    HealthResponse::new(stores, state.is_degraded(), state.jobs().failed_total())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{live_store::MemoryLiveStore, session_store::MemorySessionStore},
        dto::health::HealthStatus,
        state::AppState,
    };

    fn state() -> SharedState {
        AppState::new(
            AppConfig::default(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryLiveStore::new(Duration::from_secs(60))),
        )
    }

    #[tokio::test]
    async fn memory_stores_report_ok() {
        let state = state();
        let response = health_status(&state).await;
        assert_eq!(response.status, HealthStatus::Ok);
        assert!(response.session_store && response.live_store);
        assert_eq!(response.failed_jobs, 0);
    }

    #[tokio::test]
    async fn degraded_flag_wins_over_a_successful_ping() {
        let state = state();
        let mut watcher = state.degraded_watcher();
        state.set_degraded(true);
        assert!(watcher.has_changed().unwrap());
        assert!(*watcher.borrow_and_update());

        let response = health_status(&state).await;
        assert_eq!(response.status, HealthStatus::Degraded);
        assert!(response.session_store && response.live_store);
        state.set_degraded(false);
        assert_eq!(health_status(&state).await.status, HealthStatus::Ok);
    }
}
