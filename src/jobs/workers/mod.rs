//! Handlers of the four job queues. Each one captures the stores and the room hub it needs.

pub mod cleanup;
pub mod leaderboard;
pub mod question_timer;
pub mod score;

pub use self::cleanup::{CleanupJob, CleanupWorker};
pub use self::leaderboard::{LeaderboardJob, LeaderboardWorker};
pub use self::question_timer::{QuestionTimerJob, QuestionTimerWorker};
pub use self::score::{ScoreJob, ScoreWorker};
