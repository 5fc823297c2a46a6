use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, FullSessionEntity, ParticipantKey, QuestionEntity, SessionEntity, SessionStatus,
    SubmissionEntity,
};

/// Session document; submissions are embedded so conditional answer writes stay single-document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    title: String,
    join_code: String,
    presenter_token: String,
    status: SessionStatus,
    started_at: Option<i64>,
    duration_seconds: Option<i64>,
    questions: Vec<MongoQuestionDocument>,
    created_at: DateTime,
    #[serde(default)]
    submissions: Vec<MongoSubmissionDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQuestionDocument {
    id: String,
    text: String,
    options: Vec<String>,
    correct_index: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSubmissionDocument {
    participant_key: String,
    participant_id: Option<String>,
    display_name: String,
    answers: Vec<MongoAnswerDocument>,
    submitted_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    question_id: String,
    selected_index: i64,
    correct: bool,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            title: value.title,
            join_code: value.join_code,
            presenter_token: value.presenter_token,
            status: value.status,
            started_at: value.started_at,
            duration_seconds: value.duration_seconds.map(i64::from),
            questions: value.questions.into_iter().map(Into::into).collect(),
            created_at: DateTime::from_millis(value.created_at),
            submissions: Vec::new(),
        }
    }
}

impl MongoSessionDocument {
    fn session_id(&self) -> Uuid {
        Uuid::parse_str(&self.id).unwrap_or_default()
    }

    /// Split the document into the session and its embedded submissions.
    pub fn into_full(self) -> FullSessionEntity {
        let id = self.session_id();
        let submissions = self.submissions.into_iter().map(Into::into).collect();
        let session = SessionEntity {
            id,
            title: self.title,
            join_code: self.join_code,
            presenter_token: self.presenter_token,
            status: self.status,
            started_at: self.started_at,
            duration_seconds: self
                .duration_seconds
                .and_then(|seconds| u32::try_from(seconds).ok()),
            questions: self.questions.into_iter().map(Into::into).collect(),
            created_at: self.created_at.timestamp_millis(),
        };
        FullSessionEntity {
            session,
            submissions,
        }
    }

    pub fn into_session(self) -> SessionEntity {
        self.into_full().session
    }

    /// Submission stored under `key`, if any.
    pub fn submission(&self, key: &ParticipantKey) -> Option<SubmissionEntity> {
        let key = key.storage_key();
        self.submissions
            .iter()
            .find(|submission| submission.participant_key == key)
            .cloned()
            .map(Into::into)
    }
}

impl From<QuestionEntity> for MongoQuestionDocument {
    fn from(value: QuestionEntity) -> Self {
        Self {
            id: value.id,
            text: value.text,
            options: value.options,
            correct_index: value.correct_index.map(i64::from),
        }
    }
}

impl From<MongoQuestionDocument> for QuestionEntity {
    fn from(value: MongoQuestionDocument) -> Self {
        Self {
            id: value.id,
            text: value.text,
            options: value.options,
            correct_index: value
                .correct_index
                .and_then(|index| u32::try_from(index).ok()),
        }
    }
}

impl From<MongoSubmissionDocument> for SubmissionEntity {
    fn from(value: MongoSubmissionDocument) -> Self {
        Self {
            participant_id: value.participant_id,
            display_name: value.display_name,
            answers: value
                .answers
                .into_iter()
                .map(|answer| AnswerEntity {
                    question_id: answer.question_id,
                    selected_index: u32::try_from(answer.selected_index).unwrap_or_default(),
                    correct: answer.correct,
                })
                .collect(),
            submitted_at: value.submitted_at.timestamp_millis(),
        }
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn question_document(question: &QuestionEntity) -> Document {
    doc! {
        "id": question.id.as_str(),
        "text": question.text.as_str(),
        "options": question.options.clone(),
        "correct_index": question.correct_index.map(i64::from),
    }
}

pub fn answer_document(answer: &AnswerEntity) -> Document {
    doc! {
        "question_id": answer.question_id.as_str(),
        "selected_index": i64::from(answer.selected_index),
        "correct": answer.correct,
    }
}

pub fn submission_document(submission: &SubmissionEntity) -> Document {
    let answers: Vec<Document> = submission.answers.iter().map(answer_document).collect();
    doc! {
        "participant_key": submission.key().storage_key(),
        "participant_id": submission.participant_id.clone(),
        "display_name": submission.display_name.as_str(),
        "answers": answers,
        "submitted_at": DateTime::from_millis(submission.submitted_at),
    }
}
