//! DTO definitions used by the session REST API and documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::dao::{
    live_store::ScoreEntry,
    models::{PublicQuestion, QuestionEntity, SessionEntity, SessionStatus},
};

/// Question as authored by the session owner.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_correct_index"))]
pub struct QuestionInput {
    /// Optional stable id; generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
    #[validate(length(min = 1, message = "question text must not be empty"))]
    pub text: String,
    #[validate(length(min = 2, message = "a question needs at least two options"))]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_index: Option<u32>,
}

fn validate_correct_index(question: &QuestionInput) -> Result<(), ValidationError> {
    match question.correct_index {
        Some(index) if index as usize >= question.options.len() => {
            let mut err = ValidationError::new("correct_index_range");
            err.message = Some(
                format!(
                    "correct_index {index} is out of range for {} options",
                    question.options.len()
                )
                .into(),
            );
            Err(err)
        }
        _ => Ok(()),
    }
}

impl QuestionInput {
    /// Convert into the stored entity, generating an id when none was supplied.
    pub fn into_entity(self) -> QuestionEntity {
        QuestionEntity {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            text: self.text,
            options: self.options,
            correct_index: self.correct_index,
        }
    }
}

/// Payload used to create a new quiz session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[validate(nested)]
    #[serde(default)]
    pub questions: Vec<QuestionInput>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

/// Credentials returned once to the session owner.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub join_code: String,
    pub presenter_token: String,
}

/// Public view of a session: no correct answers and no presenter token.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub title: String,
    pub join_code: String,
    pub status: SessionStatus,
    pub started_at: Option<i64>,
    pub duration_seconds: Option<u32>,
    pub questions: Vec<PublicQuestion>,
}

impl From<&SessionEntity> for SessionSummary {
    fn from(session: &SessionEntity) -> Self {
        Self {
            session_id: session.id,
            title: session.title.clone(),
            join_code: session.join_code.clone(),
            status: session.status,
            started_at: session.started_at,
            duration_seconds: session.duration_seconds,
            questions: session.questions.iter().map(PublicQuestion::from).collect(),
        }
    }
}

/// Answer submitted over HTTP.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub question_id: String,
    pub selected_index: u32,
    #[serde(default)]
    pub participant_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Outcome of an accepted answer.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitAnswerResponse {
    pub question_id: String,
    pub participant_key: String,
    pub selected_index: u32,
    pub correct: bool,
    pub submitted_at: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeStatusRequest {
    pub status: SessionStatus,
}

/// Live ranking as currently held by the ephemeral store.
#[derive(Debug, Serialize, ToSchema)]
pub struct LiveLeaderboardResponse {
    pub session_id: Uuid,
    pub leaderboard: Vec<ScoreEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: usize, correct_index: Option<u32>) -> QuestionInput {
        QuestionInput {
            id: None,
            text: "Largest ocean?".into(),
            options: (0..options).map(|i| format!("option {i}")).collect(),
            correct_index,
        }
    }

    #[test]
    fn correct_index_must_point_at_an_option() {
        assert!(question(3, Some(2)).validate().is_ok());
        assert!(question(3, None).validate().is_ok());
        assert!(question(3, Some(3)).validate().is_err());
        assert!(question(1, None).validate().is_err());
    }

    #[test]
    fn nested_questions_are_validated() {
        let request = CreateSessionRequest {
            title: "Oceans".into(),
            questions: vec![question(2, Some(0)), question(2, Some(5))],
            duration_seconds: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.errors().contains_key("questions"));
    }

    #[test]
    fn generated_question_ids_are_unique() {
        let a = question(2, None).into_entity();
        let b = question(2, None).into_entity();
        assert_ne!(a.id, b.id);
    }
}
