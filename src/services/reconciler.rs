//! Durable answer reconciliation: one stored answer per participant and question.
//!
//! The store arbitrates concurrent writers through conditional single-document writes. This
//! module only sequences them: append, detect a genuine duplicate, create, and on a lost
//! creation race go back to append.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, ParticipantKey, QuestionEntity, SessionEntity, SessionStatus,
            SubmissionEntity, now_millis,
        },
        session_store::SessionStore,
    },
    error::ServiceError,
};

/// Append/create rounds attempted before giving up on a contended submission.
const MAX_PASSES: usize = 3;

/// Answer as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerInput {
    pub session_id: Uuid,
    pub question_id: String,
    pub participant_id: Option<String>,
    pub display_name: Option<String>,
    pub selected_index: u32,
}

/// Answer stored durably, with the context needed for side effects.
#[derive(Debug, Clone)]
pub struct ReconciledAnswer {
    pub session: SessionEntity,
    pub question: QuestionEntity,
    pub participant_key: ParticipantKey,
    pub display_name: String,
    pub selected_index: u32,
    pub correct: bool,
    pub submitted_at: i64,
}

/// Store `input` exactly once for its participant and question.
///
/// Fails with [`ServiceError::DuplicateAnswer`] when the participant already answered the
/// question, and with [`ServiceError::Unavailable`] when the store cannot be reached.
pub async fn reconcile_answer(
    sessions: &dyn SessionStore,
    input: AnswerInput,
) -> Result<ReconciledAnswer, ServiceError> {
    let session = sessions
        .find_session(input.session_id)
        .await?
        .ok_or_else(|| ServiceError::SessionNotFound(input.session_id.to_string()))?;
    if session.status == SessionStatus::Finished {
        return Err(ServiceError::InvalidState("session is finished".into()));
    }
    let question = session
        .question(&input.question_id)
        .cloned()
        .ok_or_else(|| ServiceError::QuestionNotFound(input.question_id.clone()))?;
    if input.selected_index as usize >= question.options.len() {
        return Err(ServiceError::InvalidInput(format!(
            "selected_index {} is out of range",
            input.selected_index
        )));
    }

    let participant_id = input
        .participant_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let display_name = input
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or(participant_id)
        .ok_or_else(|| {
            ServiceError::InvalidInput("a participant id or display name is required".into())
        })?
        .to_owned();
    let participant_key = ParticipantKey::from_identity(participant_id, &display_name);

    let correct = question.is_correct(input.selected_index);
    let answer = AnswerEntity {
        question_id: question.id.clone(),
        selected_index: input.selected_index,
        correct,
    };

    for pass in 1..=MAX_PASSES {
        let submitted_at = now_millis();
        if sessions
            .append_submission_answer(session.id, &participant_key, answer.clone(), submitted_at)
            .await?
        {
            debug!(session_id = %session.id, participant = %participant_key, question_id = %question.id, "answer appended");
            return Ok(accepted(session, question, participant_key, display_name, answer, submitted_at));
        }

        if sessions
            .has_answered(session.id, &participant_key, &question.id)
            .await?
        {
            return Err(ServiceError::DuplicateAnswer {
                question_id: question.id,
            });
        }

        let submission = SubmissionEntity {
            participant_id: participant_id.map(str::to_owned),
            display_name: display_name.clone(),
            answers: vec![answer.clone()],
            submitted_at,
        };
        if sessions.create_submission(session.id, submission).await? {
            debug!(session_id = %session.id, participant = %participant_key, question_id = %question.id, "submission created");
            return Ok(accepted(session, question, participant_key, display_name, answer, submitted_at));
        }
        debug!(session_id = %session.id, participant = %participant_key, pass, "submission created concurrently; retrying append");
    }

    warn!(session_id = %session.id, participant = %participant_key, "submission stayed contended");
    Err(ServiceError::InvalidState(
        "answer could not be recorded, please retry".into(),
    ))
}

fn accepted(
    session: SessionEntity,
    question: QuestionEntity,
    participant_key: ParticipantKey,
    display_name: String,
    answer: AnswerEntity,
    submitted_at: i64,
) -> ReconciledAnswer {
    ReconciledAnswer {
        session,
        question,
        participant_key,
        display_name,
        selected_index: answer.selected_index,
        correct: answer.correct,
        submitted_at,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::session_store::MemorySessionStore;

    fn session(questions: usize) -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            title: "Reconcile".into(),
            join_code: "RECON2".into(),
            presenter_token: "token".into(),
            status: SessionStatus::Live,
            started_at: Some(0),
            duration_seconds: None,
            questions: (0..questions)
                .map(|i| QuestionEntity {
                    id: format!("q{i}"),
                    text: format!("question {i}"),
                    options: vec!["a".into(), "b".into()],
                    correct_index: Some(0),
                })
                .collect(),
            created_at: 0,
        }
    }

    fn input(session_id: Uuid, question_id: &str) -> AnswerInput {
        AnswerInput {
            session_id,
            question_id: question_id.into(),
            participant_id: Some("p1".into()),
            display_name: Some("Ada".into()),
            selected_index: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_answers_to_distinct_questions_are_all_kept() {
        let store = Arc::new(MemorySessionStore::new());
        let session = session(8);
        let session_id = session.id;
        store.create_session(session).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    reconcile_answer(store.as_ref(), input(session_id, &format!("q{i}"))).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let submission = store
            .find_submission(session_id, &ParticipantKey::Id("p1".into()))
            .await
            .unwrap()
            .expect("one submission");
        let mut answered: Vec<_> = submission
            .answers
            .iter()
            .map(|answer| answer.question_id.clone())
            .collect();
        answered.sort();
        assert_eq!(answered, (0..8).map(|i| format!("q{i}")).collect::<Vec<_>>());
        let full = store.find_full_session(session_id).await.unwrap().unwrap();
        assert_eq!(full.submissions.len(), 1);
    }

    #[tokio::test]
    async fn second_answer_to_the_same_question_is_a_duplicate() {
        let store = MemorySessionStore::new();
        let session = session(1);
        let session_id = session.id;
        store.create_session(session).await.unwrap();

        let first = reconcile_answer(&store, input(session_id, "q0")).await.unwrap();
        assert!(first.correct);
        let mut retry = input(session_id, "q0");
        retry.selected_index = 1;
        let err = reconcile_answer(&store, retry).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateAnswer { ref question_id } if question_id == "q0"));

        let submission = store
            .find_submission(session_id, &ParticipantKey::Id("p1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.answers.len(), 1);
        assert_eq!(submission.answers[0].selected_index, 0);
    }

    #[tokio::test]
    async fn anonymous_participants_are_keyed_by_display_name() {
        let store = MemorySessionStore::new();
        let session = session(1);
        let session_id = session.id;
        store.create_session(session).await.unwrap();
        let anonymous = AnswerInput {
            participant_id: None,
            display_name: Some("  Ada ".into()),
            ..input(session_id, "q0")
        };

        let stored = reconcile_answer(&store, anonymous.clone()).await.unwrap();
        assert_eq!(stored.participant_key, ParticipantKey::Name("Ada".into()));
        // An identified participant with the same name is someone else.
        reconcile_answer(&store, input(session_id, "q0")).await.unwrap();
        assert!(matches!(
            reconcile_answer(&store, anonymous).await,
            Err(ServiceError::DuplicateAnswer { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_session_question_and_identity_are_rejected() {
        let store = MemorySessionStore::new();
        let session = session(1);
        let session_id = session.id;
        store.create_session(session).await.unwrap();

        assert!(matches!(
            reconcile_answer(&store, input(Uuid::new_v4(), "q0")).await,
            Err(ServiceError::SessionNotFound(_))
        ));
        assert!(matches!(
            reconcile_answer(&store, input(session_id, "q9")).await,
            Err(ServiceError::QuestionNotFound(_))
        ));
        let nameless = AnswerInput {
            participant_id: None,
            display_name: Some(" ".into()),
            ..input(session_id, "q0")
        };
        assert!(matches!(
            reconcile_answer(&store, nameless).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
