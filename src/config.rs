//! Application-level configuration loading: TTL window, scoring constants, debounce timing and
//! per-queue worker policies.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::jobs::{Backoff, QueuePolicy};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_QUIZ_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Worker policies for the four job queues.
pub struct QueuesConfig {
    pub score: QueuePolicy,
    pub leaderboard: QueuePolicy,
    pub question_timer: QueuePolicy,
    pub cleanup: QueuePolicy,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            score: QueuePolicy {
                concurrency: 20,
                attempts: 3,
                backoff: Backoff::Exponential { delay_ms: 1_000 },
            },
            leaderboard: QueuePolicy {
                concurrency: 15,
                attempts: 2,
                backoff: Backoff::Fixed { delay_ms: 500 },
            },
            question_timer: QueuePolicy {
                concurrency: 10,
                attempts: 3,
                backoff: Backoff::Exponential { delay_ms: 2_000 },
            },
            cleanup: QueuePolicy {
                concurrency: 5,
                attempts: 2,
                backoff: Backoff::Fixed { delay_ms: 5_000 },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// TTL applied to every ephemeral key of a session.
    pub state_ttl: Duration,
    /// Points awarded per correct answer.
    pub points_per_correct: u32,
    /// Rows included in leaderboard broadcasts.
    pub leaderboard_limit: usize,
    /// Window during which leaderboard triggers for one session collapse into one broadcast.
    pub leaderboard_debounce: Duration,
    /// Delay before a finished session's ephemeral state is purged.
    pub cleanup_delay: Duration,
    /// Time allowed for in-flight jobs to finish on shutdown.
    pub shutdown_grace: Duration,
    pub queues: QueuesConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_ttl: Duration::from_secs(crate::dao::live_store::DEFAULT_TTL_SECONDS),
            points_per_correct: 10,
            leaderboard_limit: 10,
            leaderboard_debounce: Duration::from_millis(1_000),
            cleanup_delay: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(10),
            queues: QueuesConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    state_ttl_seconds: Option<u64>,
    points_per_correct: Option<u32>,
    leaderboard_limit: Option<usize>,
    leaderboard_debounce_ms: Option<u64>,
    cleanup_delay_seconds: Option<u64>,
    shutdown_grace_seconds: Option<u64>,
    queues: RawQueues,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQueues {
    score: Option<QueuePolicy>,
    leaderboard: Option<QueuePolicy>,
    question_timer: Option<QueuePolicy>,
    cleanup: Option<QueuePolicy>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let queues = QueuesConfig {
            score: value.queues.score.unwrap_or(defaults.queues.score),
            leaderboard: value.queues.leaderboard.unwrap_or(defaults.queues.leaderboard),
            question_timer: value
                .queues
                .question_timer
                .unwrap_or(defaults.queues.question_timer),
            cleanup: value.queues.cleanup.unwrap_or(defaults.queues.cleanup),
        };
        Self {
            state_ttl: value
                .state_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.state_ttl),
            points_per_correct: value.points_per_correct.unwrap_or(defaults.points_per_correct),
            leaderboard_limit: value.leaderboard_limit.unwrap_or(defaults.leaderboard_limit),
            leaderboard_debounce: value
                .leaderboard_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.leaderboard_debounce),
            cleanup_delay: value
                .cleanup_delay_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_delay),
            shutdown_grace: value
                .shutdown_grace_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            queues,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
