/// Durable record of scheduled jobs for resume after a restart.
pub mod job_journal;
/// Ephemeral per-session state (room meta, active question, tallies, scores).
pub mod live_store;
/// Durable domain entities shared by every layer.
pub mod models;
/// Durable session and submission storage.
pub mod session_store;
/// Storage error taxonomy.
pub mod storage;
