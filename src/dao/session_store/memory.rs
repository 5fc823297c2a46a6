use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use super::{SessionStore, normalize_join_code};
use crate::dao::{
    models::{
        AnswerEntity, FullSessionEntity, ParticipantKey, QuestionEntity, SessionEntity,
        SessionStatus, SubmissionEntity,
    },
    storage::StorageResult,
};

/// In-process [`SessionStore`] used for single-node deployments and tests.
///
/// Each session lives in one map entry; holding the entry's write guard makes every
/// conditional submission write atomic for that session.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionRecord>,
    join_codes: DashMap<String, Uuid>,
}

struct SessionRecord {
    session: SessionEntity,
    submissions: Vec<SubmissionEntity>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, mut session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        async move {
            session.join_code = normalize_join_code(&session.join_code);
            match inner.join_codes.entry(session.join_code.clone()) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(session.id);
                    inner.sessions.insert(
                        session.id,
                        SessionRecord {
                            session,
                            submissions: Vec::new(),
                        },
                    );
                    Ok(true)
                }
            }
        }
        .boxed()
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        async move { Ok(inner.sessions.get(&id).map(|record| record.session.clone())) }.boxed()
    }

    fn find_session_by_join_code(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        let code = normalize_join_code(code);
        async move {
            let Some(id) = inner.join_codes.get(&code).map(|entry| *entry.value()) else {
                return Ok(None);
            };
            Ok(inner.sessions.get(&id).map(|record| record.session.clone()))
        }
        .boxed()
    }

    fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        started_at: Option<i64>,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        async move {
            Ok(inner.sessions.get_mut(&id).map(|mut record| {
                record.session.status = status;
                if record.session.started_at.is_none() {
                    record.session.started_at = started_at;
                }
                record.session.clone()
            }))
        }
        .boxed()
    }

    fn add_question(
        &self,
        id: Uuid,
        question: QuestionEntity,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        async move {
            Ok(inner.sessions.get_mut(&id).map(|mut record| {
                record.session.questions.push(question);
                record.session.clone()
            }))
        }
        .boxed()
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        async move {
            let Some((_, record)) = inner.sessions.remove(&id) else {
                return Ok(false);
            };
            inner.join_codes.remove(&record.session.join_code);
            Ok(true)
        }
        .boxed()
    }

    fn append_submission_answer(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
        answer: AnswerEntity,
        submitted_at: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        let key = key.clone();
        async move {
            let Some(mut record) = inner.sessions.get_mut(&session_id) else {
                return Ok(false);
            };
            let eligible = record
                .submissions
                .iter_mut()
                .find(|submission| submission.key() == key && !submission.has_answer(&answer.question_id));
            match eligible {
                Some(submission) => {
                    submission.answers.push(answer);
                    submission.submitted_at = submitted_at;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
        .boxed()
    }

    fn has_answered(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
        question_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        let key = key.clone();
        let question_id = question_id.to_owned();
        async move {
            Ok(inner.sessions.get(&session_id).is_some_and(|record| {
                record
                    .submissions
                    .iter()
                    .any(|submission| submission.key() == key && submission.has_answer(&question_id))
            }))
        }
        .boxed()
    }

    fn create_submission(
        &self,
        session_id: Uuid,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        async move {
            let Some(mut record) = inner.sessions.get_mut(&session_id) else {
                return Ok(false);
            };
            let key = submission.key();
            if record.submissions.iter().any(|existing| existing.key() == key) {
                return Ok(false);
            }
            record.submissions.push(submission);
            Ok(true)
        }
        .boxed()
    }

    fn find_submission(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        let inner = self.inner.clone();
        let key = key.clone();
        async move {
            Ok(inner.sessions.get(&session_id).and_then(|record| {
                record
                    .submissions
                    .iter()
                    .find(|submission| submission.key() == key)
                    .cloned()
            }))
        }
        .boxed()
    }

    fn find_full_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FullSessionEntity>>> {
        let inner = self.inner.clone();
        async move {
            Ok(inner.sessions.get(&id).map(|record| FullSessionEntity {
                session: record.session.clone(),
                submissions: record.submissions.clone(),
            }))
        }
        .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        async { Ok(()) }.boxed()
    }
}
