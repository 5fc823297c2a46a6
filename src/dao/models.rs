use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Lifecycle status of a quiz session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Authored but not started.
    Draft,
    /// Running; participants may answer.
    Live,
    /// Over; ephemeral state is eligible for cleanup.
    Finished,
}

impl SessionStatus {
    /// Wire/storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Live => "live",
            SessionStatus::Finished => "finished",
        }
    }

    /// Parse the storage representation back into a status.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(SessionStatus::Draft),
            "live" => Some(SessionStatus::Live),
            "finished" => Some(SessionStatus::Finished),
            _ => None,
        }
    }
}

/// Question owned by the authoring collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Stable identifier, unique inside the session.
    pub id: String,
    /// Prompt shown to participants.
    pub text: String,
    /// Ordered answer options (at least two).
    pub options: Vec<String>,
    /// Index of the correct option, when the question is graded.
    pub correct_index: Option<u32>,
}

impl QuestionEntity {
    /// Whether `selected_index` is the graded answer. Ungraded questions are never correct.
    pub fn is_correct(&self, selected_index: u32) -> bool {
        self.correct_index == Some(selected_index)
    }
}

/// Question as shown to clients: the correct index never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PublicQuestion {
    /// Stable identifier, unique inside the session.
    pub id: String,
    /// Prompt shown to participants.
    pub text: String,
    /// Ordered answer options.
    pub options: Vec<String>,
}

impl From<&QuestionEntity> for PublicQuestion {
    fn from(value: &QuestionEntity) -> Self {
        Self {
            id: value.id.clone(),
            text: value.text.clone(),
            options: value.options.clone(),
        }
    }
}

/// Role a connection claims when joining a session room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Session owner; may open questions and change status.
    Presenter,
    /// Answers questions.
    Participant,
}

/// Durable session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Upper-cased human join code, unique across sessions.
    pub join_code: String,
    /// Secret handed to the session owner at creation.
    pub presenter_token: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Epoch millis of the first transition to live.
    pub started_at: Option<i64>,
    /// Optional overall duration for the quiz.
    pub duration_seconds: Option<u32>,
    /// Authored question set, in presentation order.
    pub questions: Vec<QuestionEntity>,
    /// Epoch millis of creation.
    pub created_at: i64,
}

impl SessionEntity {
    /// Look up a question by id.
    pub fn question(&self, question_id: &str) -> Option<&QuestionEntity> {
        self.questions.iter().find(|question| question.id == question_id)
    }
}

/// Identity under which a participant's submission is stored.
///
/// Participants with an id are matched by id. Anonymous participants are matched by display
/// name, and only against other anonymous submissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParticipantKey {
    /// Known participant identifier.
    Id(String),
    /// Display name of a participant without an identifier.
    Name(String),
}

impl ParticipantKey {
    /// Build the key from optional identity fields, preferring the participant id.
    pub fn from_identity(participant_id: Option<&str>, display_name: &str) -> Self {
        match participant_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => ParticipantKey::Id(id.to_owned()),
            None => ParticipantKey::Name(display_name.trim().to_owned()),
        }
    }

    /// Stable string form used as a storage key and in leaderboards.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }

    /// Parse the string produced by [`ParticipantKey::storage_key`].
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(id) = value.strip_prefix("id:") {
            Some(ParticipantKey::Id(id.to_owned()))
        } else {
            value
                .strip_prefix("name:")
                .map(|name| ParticipantKey::Name(name.to_owned()))
        }
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantKey::Id(id) => write!(f, "id:{id}"),
            ParticipantKey::Name(name) => write!(f, "name:{name}"),
        }
    }
}

/// One answer inside a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Question that was answered.
    pub question_id: String,
    /// Option chosen by the participant.
    pub selected_index: u32,
    /// Correctness derived at reconciliation time.
    pub correct: bool,
}

/// Durable per-participant record of every answer given in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionEntity {
    /// Participant identifier, when known.
    pub participant_id: Option<String>,
    /// Name displayed on leaderboards.
    pub display_name: String,
    /// Answers in arrival order, at most one per question.
    pub answers: Vec<AnswerEntity>,
    /// Epoch millis of the latest answer.
    pub submitted_at: i64,
}

impl SubmissionEntity {
    /// Key used to match this submission against incoming answers.
    pub fn key(&self) -> ParticipantKey {
        ParticipantKey::from_identity(self.participant_id.as_deref(), &self.display_name)
    }

    /// Whether the submission already holds an answer for `question_id`.
    pub fn has_answer(&self, question_id: &str) -> bool {
        self.answers
            .iter()
            .any(|answer| answer.question_id == question_id)
    }
}

/// Session together with its full submission set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullSessionEntity {
    /// Session metadata and questions.
    pub session: SessionEntity,
    /// Every submission recorded for the session.
    pub submissions: Vec<SubmissionEntity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_key_prefers_id_over_name() {
        assert_eq!(
            ParticipantKey::from_identity(Some("p-1"), "Ada"),
            ParticipantKey::Id("p-1".into())
        );
        assert_eq!(
            ParticipantKey::from_identity(Some("  "), " Ada "),
            ParticipantKey::Name("Ada".into())
        );
    }

    #[test]
    fn participant_key_storage_form_parses_back() {
        let key = ParticipantKey::Name("name:with:colons".into());
        assert_eq!(ParticipantKey::parse(&key.storage_key()), Some(key));
        assert_eq!(ParticipantKey::parse("bogus"), None);
    }

    #[test]
    fn ungraded_question_is_never_correct() {
        let question = QuestionEntity {
            id: "q1".into(),
            text: "?".into(),
            options: vec!["a".into(), "b".into()],
            correct_index: None,
        };
        assert!(!question.is_correct(0));
    }
}
