use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;
use tracing::{debug, info};

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};
use crate::jobs::Backoff;

const MAX_STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Wait before the next startup ping, after `attempt` pings failed.
fn startup_delay(backoff: Backoff, attempt: u32) -> Duration {
    backoff.delay_for(attempt).min(MAX_STARTUP_DELAY)
}

/// Open the quiz database and wait until the server answers a ping, so the session store
/// never starts against an unreachable server.
pub async fn open_quiz_database(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);
    let attempts = config.startup_attempts.max(1);

    let mut attempt = 1;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                info!(database = %config.database_name, attempt, "quiz database reachable");
                return Ok((client, database));
            }
            Err(err) if attempt >= attempts => {
                return Err(MongoDaoError::InitialPing {
                    attempts,
                    source: err,
                });
            }
            Err(err) => {
                let delay = startup_delay(config.startup_backoff, attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "quiz database not reachable yet");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
