use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{DateTime, doc},
    options::IndexOptions,
};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::open_quiz_database,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoSessionDocument, answer_document, doc_id, question_document, submission_document,
    },
};
use crate::dao::{
    models::{
        AnswerEntity, FullSessionEntity, ParticipantKey, QuestionEntity, SessionEntity,
        SessionStatus, SubmissionEntity,
    },
    session_store::{SessionStore, normalize_join_code},
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";

/// [`SessionStore`] backed by a MongoDB `sessions` collection.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: Database,
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) = open_quiz_database(&config).await?;

        let store = Self {
            inner: Arc::new(MongoInner { database }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = IndexModel::builder()
            .keys(doc! {"join_code": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_join_code_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.collection()
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "join_code",
                source,
            })?;
        Ok(())
    }

    fn collection(&self) -> Collection<MongoSessionDocument> {
        self.inner
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn load(&self, id: Uuid) -> MongoResult<Option<MongoSessionDocument>> {
        self.collection()
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession { id, source })
    }

    async fn ping(&self) -> MongoResult<()> {
        self.inner
            .database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }
}

impl SessionStore for MongoSessionStore {
    fn create_session(&self, mut session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        async move {
            session.join_code = normalize_join_code(&session.join_code);
            let id = session.id;
            let document = MongoSessionDocument::from(session);
            match store.collection().insert_one(&document).await {
                Ok(_) => Ok(true),
                Err(err) if is_duplicate_key(&err) => Ok(false),
                Err(source) => Err(MongoDaoError::InsertSession { id, source }.into()),
            }
        }
        .boxed()
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        async move {
            Ok(store
                .load(id)
                .await?
                .map(MongoSessionDocument::into_session))
        }
        .boxed()
    }

    fn find_session_by_join_code(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        let code = normalize_join_code(code);
        async move {
            let document = store
                .collection()
                .find_one(doc! {"join_code": code.as_str()})
                .await
                .map_err(|source| MongoDaoError::LookupJoinCode {
                    code: code.clone(),
                    source,
                })?;
            Ok(document.map(MongoSessionDocument::into_session))
        }
        .boxed()
    }

    fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        started_at: Option<i64>,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        async move {
            let collection = store.collection();
            let result = collection
                .update_one(doc_id(id), doc! {"$set": {"status": status.as_str()}})
                .await
                .map_err(|source| MongoDaoError::UpdateSession { id, source })?;
            if result.matched_count == 0 {
                return Ok(None);
            }

            if let Some(started_at) = started_at {
                collection
                    .update_one(
                        doc! {"_id": id.to_string(), "started_at": null},
                        doc! {"$set": {"started_at": started_at}},
                    )
                    .await
                    .map_err(|source| MongoDaoError::UpdateSession { id, source })?;
            }

            Ok(store
                .load(id)
                .await?
                .map(MongoSessionDocument::into_session))
        }
        .boxed()
    }

    fn add_question(
        &self,
        id: Uuid,
        question: QuestionEntity,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        async move {
            let result = store
                .collection()
                .update_one(
                    doc_id(id),
                    doc! {"$push": {"questions": question_document(&question)}},
                )
                .await
                .map_err(|source| MongoDaoError::UpdateSession { id, source })?;
            if result.matched_count == 0 {
                return Ok(None);
            }
            Ok(store
                .load(id)
                .await?
                .map(MongoSessionDocument::into_session))
        }
        .boxed()
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        async move {
            let result = store
                .collection()
                .delete_one(doc_id(id))
                .await
                .map_err(|source| MongoDaoError::DeleteSession { id, source })?;
            Ok(result.deleted_count > 0)
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
        let store = self.clone();
        let key = key.storage_key();
        async move {
            // `$elemMatch` with `$ne` selects the participant's submission only while it has no
            // answer for this question; the positional `$` then targets that same element.
            let filter = doc! {
                "_id": session_id.to_string(),
                "submissions": {
                    "$elemMatch": {
                        "participant_key": key.as_str(),
                        "answers.question_id": {"$ne": answer.question_id.as_str()},
                    }
                },
            };
            let update = doc! {
                "$push": {"submissions.$.answers": answer_document(&answer)},
                "$set": {"submissions.$.submitted_at": DateTime::from_millis(submitted_at)},
            };
            let result = store
                .collection()
                .update_one(filter, update)
                .await
                .map_err(|source| MongoDaoError::WriteSubmission {
                    id: session_id,
                    key: key.clone(),
                    source,
                })?;
            Ok(result.modified_count == 1)
        }
        .boxed()
    }

    fn has_answered(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
        question_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let key = key.storage_key();
        let question_id = question_id.to_owned();
        async move {
            let filter = doc! {
                "_id": session_id.to_string(),
                "submissions": {
                    "$elemMatch": {
                        "participant_key": key.as_str(),
                        "answers.question_id": question_id.as_str(),
                    }
                },
            };
            let count = store
                .collection()
                .count_documents(filter)
                .await
                .map_err(|source| MongoDaoError::ReadSubmission {
                    id: session_id,
                    key: key.clone(),
                    source,
                })?;
            Ok(count > 0)
        }
        .boxed()
    }

    fn create_submission(
        &self,
        session_id: Uuid,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        async move {
            let key = submission.key().storage_key();
            let filter = doc! {
                "_id": session_id.to_string(),
                "submissions.participant_key": {"$ne": key.as_str()},
            };
            let update = doc! {"$push": {"submissions": submission_document(&submission)}};
            let result = store
                .collection()
                .update_one(filter, update)
                .await
                .map_err(|source| MongoDaoError::WriteSubmission {
                    id: session_id,
                    key: key.clone(),
                    source,
                })?;
            Ok(result.modified_count == 1)
        }
        .boxed()
    }

    fn find_submission(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        let store = self.clone();
        let key = key.clone();
        async move {
            Ok(store
                .load(session_id)
                .await?
                .and_then(|document| document.submission(&key)))
        }
        .boxed()
    }

    fn find_full_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FullSessionEntity>>> {
        let store = self.clone();
        async move { Ok(store.load(id).await?.map(MongoSessionDocument::into_full)) }.boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        async move { store.ping().await.map_err(Into::into) }.boxed()
    }
}
