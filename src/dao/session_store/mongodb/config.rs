use std::env;

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};
use crate::jobs::Backoff;

const DEFAULT_URI: &str = "mongodb://localhost:27017";
const DEFAULT_DATABASE: &str = "live_quiz";
const APP_NAME: &str = "live-quiz-back";

/// Where quiz sessions and submissions are persisted, and how hard to try reaching the server
/// at startup.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
    /// Pings attempted before startup gives up.
    pub startup_attempts: u32,
    /// Wait between startup pings; each delay is capped at five seconds.
    pub startup_backoff: Backoff,
}

impl MongoConfig {
    /// Read `MONGO_URI` and `MONGO_DB`, falling back to a local server and the `live_quiz`
    /// database.
    pub async fn from_env() -> MongoResult<Self> {
        let uri = env::var("MONGO_URI").unwrap_or_else(|_| DEFAULT_URI.to_owned());
        let database = env::var("MONGO_DB").ok();
        Self::from_uri(&uri, database.as_deref()).await
    }

    pub async fn from_uri(uri: &str, database: Option<&str>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        if options.app_name.is_none() {
            options.app_name = Some(APP_NAME.to_owned());
        }
        let database_name = database
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DATABASE)
            .to_owned();

        Ok(Self {
            options,
            database_name,
            startup_attempts: 10,
            startup_backoff: Backoff::Exponential { delay_ms: 250 },
        })
    }
}
