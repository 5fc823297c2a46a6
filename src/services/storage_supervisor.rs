use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::SharedState;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of one ping of each store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHealth {
    pub session_store: bool,
    pub live_store: bool,
}

impl StoreHealth {
    pub fn all_up(&self) -> bool {
        self.session_store && self.live_store
    }
}

/// Ping both stores once, logging whichever one fails.
pub async fn check_stores(state: &SharedState) -> StoreHealth {
    let (durable, live) = tokio::join!(
        state.sessions().health_check(),
        state.live().health_check()
    );
    if let Err(err) = &durable {
        warn!(error = %err, "session store health check failed");
    }
    if let Err(err) = &live {
        warn!(error = %err, "live store health check failed");
    }
    StoreHealth {
        session_store: durable.is_ok(),
        live_store: live.is_ok(),
    }
}

/// Poll store health forever and keep the shared degraded flag in sync.
///
/// Both drivers reconnect on their own, so the supervisor only observes: while a store is
/// unreachable the poll interval backs off exponentially from one second up to ten.
pub async fn run(state: SharedState) {
    let mut delay = INITIAL_DELAY;

    loop {
        if check_stores(&state).await.all_up() {
            if state.is_degraded() {
                info!("storage healthy again; leaving degraded mode");
                state.set_degraded(false);
            }
            delay = INITIAL_DELAY;
            sleep(HEALTH_POLL_INTERVAL).await;
        } else {
            if !state.is_degraded() {
                warn!("storage unreachable; entering degraded mode");
                state.set_degraded(true);
            }
            sleep(delay).await;
            delay = (delay * 2).min(MAX_DELAY);
        }
    }
}
