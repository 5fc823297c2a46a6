use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{Role, SessionStatus};

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Messages accepted from quiz socket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first frame of a connection.
    Join(JoinRequest),
    /// Presenter only.
    OpenQuestion {
        question_id: String,
        #[serde(default)]
        duration_seconds: Option<u32>,
    },
    /// Presenter only.
    PublishQuestionList,
    /// Presenter only.
    ChangeStatus { status: SessionStatus },
    SubmitAnswer(SubmitAnswerMessage),
}

impl ClientMessage {
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Join a session room by id or by join code.
pub struct JoinRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub join_code: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub participant_id: Option<String>,
    #[serde(default)]
    pub presenter_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Answer sent over the socket. Identity fields default to the ones given at join.
pub struct SubmitAnswerMessage {
    /// Defaults to the active question.
    #[serde(default)]
    pub question_id: Option<String>,
    pub selected_index: u32,
    #[serde(default)]
    pub participant_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_by_code_parses_with_defaults() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"join","join_code":"abc234","role":"participant","display_name":"Ada"}"#,
        )
        .unwrap();
        let ClientMessage::Join(join) = message else {
            panic!("expected join");
        };
        assert_eq!(join.join_code.as_deref(), Some("abc234"));
        assert_eq!(join.session_id, None);
        assert_eq!(join.role, Role::Participant);
    }

    #[test]
    fn presenter_messages_parse() {
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"publish_question_list"}"#).unwrap(),
            ClientMessage::PublishQuestionList
        );
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"change_status","status":"live"}"#).unwrap(),
            ClientMessage::ChangeStatus {
                status: SessionStatus::Live
            }
        );
        assert!(ClientMessage::from_json_str(r#"{"type":"buzz"}"#).is_err());
    }
}
