use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use indexmap::IndexMap;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::debug;
use uuid::Uuid;

use super::{
    ActiveQuestion, LiveStore, ParticipantInfo, RoomMeta, ScoreEntry, ScoreRecord, SessionMode,
    rank_scores,
};
use crate::dao::{models::PublicQuestion, storage::StorageResult};

/// In-process [`LiveStore`] for single-node deployments and tests.
///
/// A session's state sits in one map entry, so every operation on it runs under that entry's
/// lock and is atomic with respect to the others.
#[derive(Clone)]
pub struct MemoryLiveStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    sessions: DashMap<Uuid, LiveSession>,
    ttl: Duration,
}

struct ScoreSlot {
    score: u32,
    elapsed_ms: i64,
    display_name: String,
}

struct LiveSession {
    meta: Option<RoomMeta>,
    mode: Option<SessionMode>,
    active: Option<ActiveQuestion>,
    questions: Option<Vec<PublicQuestion>>,
    counts: Option<Vec<u32>>,
    respondents: HashMap<String, u32>,
    expired: HashSet<(String, i64)>,
    participants: IndexMap<String, ParticipantInfo>,
    scores: HashMap<String, ScoreSlot>,
    expires_at: Instant,
}

impl LiveSession {
    fn new(expires_at: Instant) -> Self {
        Self {
            meta: None,
            mode: None,
            active: None,
            questions: None,
            counts: None,
            respondents: HashMap::new(),
            expired: HashSet::new(),
            participants: IndexMap::new(),
            scores: HashMap::new(),
            expires_at,
        }
    }

    /// Number of logical keys the session holds, mirroring the Redis layout.
    fn key_count(&self) -> u64 {
        [
            self.meta.is_some(),
            self.mode.is_some(),
            self.active.is_some(),
            self.questions.is_some(),
            self.counts.is_some(),
            !self.respondents.is_empty(),
            !self.expired.is_empty(),
            !self.participants.is_empty(),
            !self.scores.is_empty(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count() as u64
    }

    fn clear_round(&mut self) {
        self.active = None;
        self.counts = None;
        self.respondents.clear();
    }
}

impl MemoryLiveStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                sessions: DashMap::new(),
                ttl,
            }),
        }
    }

    /// Periodically drop sessions whose TTL elapsed. The task ends with the store.
    pub fn spawn_sweeper(&self, every: Duration) {
        let weak: Weak<MemoryInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let before = inner.sessions.len();
                inner.sessions.retain(|_, session| session.expires_at > now);
                let swept = before.saturating_sub(inner.sessions.len());
                if swept > 0 {
                    debug!(swept, "expired ephemeral sessions removed");
                }
            }
        });
    }

    /// Run `f` on the session, creating it if needed, and refresh its TTL.
    fn write<R>(&self, session: Uuid, f: impl FnOnce(&mut LiveSession) -> R) -> R {
        let now = Instant::now();
        let expires_at = now + self.inner.ttl;
        let mut entry = self
            .inner
            .sessions
            .entry(session)
            .or_insert_with(|| LiveSession::new(expires_at));
        if entry.expires_at <= now {
            *entry = LiveSession::new(expires_at);
        }
        let out = f(&mut *entry);
        entry.expires_at = expires_at;
        out
    }

    /// Run `f` on a live (non-expired) session, if present.
    fn read<R>(&self, session: Uuid, f: impl FnOnce(&LiveSession) -> R) -> Option<R> {
        let entry = self.inner.sessions.get(&session)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(f(&*entry))
    }

    /// Like [`Self::write`] but never creates a session.
    fn update_existing<R>(&self, session: Uuid, f: impl FnOnce(&mut LiveSession) -> R) -> Option<R> {
        let now = Instant::now();
        let mut entry = self.inner.sessions.get_mut(&session)?;
        if entry.expires_at <= now {
            return None;
        }
        let out = f(&mut *entry);
        entry.expires_at = now + self.inner.ttl;
        Some(out)
    }
}

fn ready<T: Send + 'static>(value: T) -> BoxFuture<'static, StorageResult<T>> {
    future::ready(Ok(value)).boxed()
}

fn ranked(scores: &HashMap<String, ScoreSlot>) -> Vec<ScoreEntry> {
    rank_scores(
        scores
            .iter()
            .map(|(key, slot)| ScoreRecord {
                participant_key: key.clone(),
                display_name: slot.display_name.clone(),
                score: slot.score,
                elapsed_ms: slot.elapsed_ms,
            })
            .collect(),
    )
}

impl LiveStore for MemoryLiveStore {
    fn set_room_meta(&self, session: Uuid, meta: RoomMeta) -> BoxFuture<'static, StorageResult<()>> {
        self.write(session, |state| state.meta.get_or_insert_with(RoomMeta::default).merge(meta));
        ready(())
    }

    fn room_meta(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomMeta>>> {
        ready(self.read(session, |state| state.meta.clone()).flatten())
    }

    fn set_active_question(
        &self,
        session: Uuid,
        question: ActiveQuestion,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(session, |state| {
            state.clear_round();
            state.questions = None;
            state.counts = Some(vec![0; question.question.options.len()]);
            state.active = Some(question);
            state.mode = Some(SessionMode::SingleQuestion);
        });
        ready(())
    }

    fn active_question(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveQuestion>>> {
        ready(self.read(session, |state| state.active.clone()).flatten())
    }

    fn clear_active_question(&self, session: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.update_existing(session, LiveSession::clear_round);
        ready(())
    }

    fn set_question_list(
        &self,
        session: Uuid,
        questions: Vec<PublicQuestion>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(session, |state| {
            state.clear_round();
            state.questions = Some(questions);
            state.mode = Some(SessionMode::QuestionList);
        });
        ready(())
    }

    fn question_list(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Vec<PublicQuestion>>>> {
        ready(self.read(session, |state| state.questions.clone()).flatten())
    }

    fn session_mode(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionMode>>> {
        ready(self.read(session, |state| state.mode).flatten())
    }

    fn init_counts(&self, session: Uuid, options: usize) -> BoxFuture<'static, StorageResult<()>> {
        self.write(session, |state| state.counts = Some(vec![0; options]));
        ready(())
    }

    fn counts(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Vec<u32>>> {
        ready(
            self.read(session, |state| state.counts.clone().unwrap_or_default())
                .unwrap_or_default(),
        )
    }

    fn set_counts(&self, session: Uuid, counts: Vec<u32>) -> BoxFuture<'static, StorageResult<()>> {
        self.write(session, |state| state.counts = Some(counts));
        ready(())
    }

    fn increment_count(
        &self,
        session: Uuid,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<u32>>> {
        let counts = self.write(session, |state| {
            let counts = state.counts.get_or_insert_with(Vec::new);
            if let Some(slot) = counts.get_mut(index as usize) {
                *slot += 1;
            }
            counts.clone()
        });
        ready(counts)
    }

    fn decrement_count(
        &self,
        session: Uuid,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<u32>>> {
        let counts = self
            .update_existing(session, |state| {
                let counts = state.counts.get_or_insert_with(Vec::new);
                if let Some(slot) = counts.get_mut(index as usize) {
                    *slot = slot.saturating_sub(1);
                }
                counts.clone()
            })
            .unwrap_or_default();
        ready(counts)
    }

    fn record_respondent(
        &self,
        session: Uuid,
        connection: &str,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let recorded = self.write(session, |state| {
            if state.respondents.contains_key(connection) {
                false
            } else {
                state.respondents.insert(connection.to_owned(), index);
                true
            }
        });
        ready(recorded)
    }

    fn has_responded(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        ready(
            self.read(session, |state| state.respondents.contains_key(connection))
                .unwrap_or(false),
        )
    }

    fn remove_respondent(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<Option<u32>>> {
        ready(
            self.update_existing(session, |state| state.respondents.remove(connection))
                .flatten(),
        )
    }

    fn clear_respondents(&self, session: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.update_existing(session, |state| state.respondents.clear());
        ready(())
    }

    fn mark_question_expired(
        &self,
        session: Uuid,
        question_id: &str,
        sent_at: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let first = self.write(session, |state| {
            state.expired.insert((question_id.to_owned(), sent_at))
        });
        ready(first)
    }

    fn upsert_participant(
        &self,
        session: Uuid,
        connection: &str,
        info: ParticipantInfo,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(session, |state| {
            state.participants.insert(connection.to_owned(), info);
        });
        ready(())
    }

    fn remove_participant(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.update_existing(session, |state| state.participants.shift_remove(connection));
        ready(())
    }

    fn participants(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<(String, ParticipantInfo)>>> {
        ready(
            self.read(session, |state| {
                state
                    .participants
                    .iter()
                    .map(|(connection, info)| (connection.clone(), info.clone()))
                    .collect()
            })
            .unwrap_or_default(),
        )
    }

    fn update_score(
        &self,
        session: Uuid,
        participant_key: &str,
        score: u32,
        elapsed_ms: i64,
        display_name: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(session, |state| {
            let slot = state
                .scores
                .entry(participant_key.to_owned())
                .or_insert_with(|| ScoreSlot {
                    score,
                    elapsed_ms,
                    display_name: display_name.to_owned(),
                });
            slot.score = slot.score.max(score);
            slot.elapsed_ms = slot.elapsed_ms.max(elapsed_ms);
            slot.display_name = display_name.to_owned();
        });
        ready(())
    }

    fn top_scores(
        &self,
        session: Uuid,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEntry>>> {
        ready(
            self.read(session, |state| {
                let mut rows = ranked(&state.scores);
                rows.truncate(limit);
                rows
            })
            .unwrap_or_default(),
        )
    }

    fn rank(
        &self,
        session: Uuid,
        participant_key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ScoreEntry>>> {
        ready(
            self.read(session, |state| {
                ranked(&state.scores)
                    .into_iter()
                    .find(|entry| entry.participant_key == participant_key)
            })
            .flatten(),
        )
    }

    fn purge_session(&self, session: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        let removed = self
            .inner
            .sessions
            .remove(&session)
            .map(|(_, state)| state.key_count())
            .unwrap_or(0);
        ready(removed)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{Role, SessionStatus};

    fn store() -> MemoryLiveStore {
        MemoryLiveStore::new(Duration::from_secs(60))
    }

    fn active(id: &str, sent_at: i64) -> ActiveQuestion {
        ActiveQuestion {
            question: PublicQuestion {
                id: id.into(),
                text: "Capital of France?".into(),
                options: vec!["Paris".into(), "Lyon".into(), "Nice".into()],
            },
            sent_at,
            duration_seconds: None,
        }
    }

    #[tokio::test]
    async fn opening_a_question_resets_round_state() {
        let store = store();
        let session = Uuid::new_v4();
        store.set_active_question(session, active("q1", 1)).await.unwrap();
        assert!(store.record_respondent(session, "c1", 0).await.unwrap());
        store.increment_count(session, 0).await.unwrap();

        store.set_active_question(session, active("q2", 2)).await.unwrap();

        assert_eq!(store.counts(session).await.unwrap(), vec![0, 0, 0]);
        assert!(!store.has_responded(session, "c1").await.unwrap());
        assert_eq!(
            store.session_mode(session).await.unwrap(),
            Some(SessionMode::SingleQuestion)
        );
    }

    #[tokio::test]
    async fn question_list_mode_drops_active_question() {
        let store = store();
        let session = Uuid::new_v4();
        store.set_active_question(session, active("q1", 1)).await.unwrap();
        store
            .set_question_list(session, vec![active("q1", 1).question])
            .await
            .unwrap();

        assert!(store.active_question(session).await.unwrap().is_none());
        assert!(store.counts(session).await.unwrap().is_empty());
        assert_eq!(
            store.session_mode(session).await.unwrap(),
            Some(SessionMode::QuestionList)
        );
    }

    #[tokio::test]
    async fn respondent_is_recorded_once_and_counts_never_go_negative() {
        let store = store();
        let session = Uuid::new_v4();
        store.init_counts(session, 2).await.unwrap();
        assert!(store.record_respondent(session, "c1", 1).await.unwrap());
        assert!(!store.record_respondent(session, "c1", 0).await.unwrap());
        assert_eq!(store.increment_count(session, 1).await.unwrap(), vec![0, 1]);

        assert_eq!(store.remove_respondent(session, "c1").await.unwrap(), Some(1));
        assert_eq!(store.decrement_count(session, 1).await.unwrap(), vec![0, 0]);
        assert_eq!(store.decrement_count(session, 1).await.unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn scores_are_monotonic_and_ranks_dense() {
        let store = store();
        let session = Uuid::new_v4();
        store.update_score(session, "id:a", 20, 1_000, "Ada").await.unwrap();
        store.update_score(session, "id:b", 20, 2_000, "Bob").await.unwrap();
        store.update_score(session, "id:c", 10, 500, "Cy").await.unwrap();
        store.update_score(session, "id:a", 10, 800, "Ada L.").await.unwrap();

        let top = store.top_scores(session, 10).await.unwrap();
        let ranks: Vec<u32> = top.iter().map(|entry| entry.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(top[0].participant_key, "id:a");
        assert_eq!(top[0].score, 20);
        assert_eq!(top[0].display_name, "Ada L.");
        assert_eq!(store.rank(session, "id:c").await.unwrap().map(|e| e.rank), Some(3));
        assert_eq!(store.top_scores(session, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn equal_scores_rank_the_faster_participant_first_whatever_the_write_order() {
        let store = store();
        let session = Uuid::new_v4();
        // The slower participant's score lands first.
        store.update_score(session, "id:p2", 10, 5_000, "P2").await.unwrap();
        store.update_score(session, "id:p1", 10, 1_000, "P1").await.unwrap();
        store.update_score(session, "id:p3", 10, 1_000, "P3").await.unwrap();

        let keys: Vec<String> = store
            .top_scores(session, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.participant_key)
            .collect();
        assert_eq!(keys, ["id:p1", "id:p3", "id:p2"]);
        assert_eq!(store.rank(session, "id:p2").await.unwrap().map(|e| e.rank), Some(3));
    }

    #[tokio::test]
    async fn expiry_marker_is_set_once_per_opening() {
        let store = store();
        let session = Uuid::new_v4();
        assert!(store.mark_question_expired(session, "q1", 5).await.unwrap());
        assert!(!store.mark_question_expired(session, "q1", 5).await.unwrap());
        assert!(store.mark_question_expired(session, "q1", 6).await.unwrap());
    }

    #[tokio::test]
    async fn purging_twice_is_a_no_op() {
        let store = store();
        let session = Uuid::new_v4();
        store
            .set_room_meta(
                session,
                RoomMeta {
                    status: Some(SessionStatus::Live),
                    ..RoomMeta::default()
                },
            )
            .await
            .unwrap();
        store
            .upsert_participant(
                session,
                "c1",
                ParticipantInfo {
                    role: Role::Participant,
                    display_name: Some("Ada".into()),
                    participant_id: None,
                    joined_at: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.purge_session(session).await.unwrap(), 2);
        assert_eq!(store.purge_session(session).await.unwrap(), 0);
        assert!(store.participants(session).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn state_expires_after_ttl_without_writes() {
        let store = MemoryLiveStore::new(Duration::from_secs(10));
        let session = Uuid::new_v4();
        store.set_active_question(session, active("q1", 1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.active_question(session).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.active_question(session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn room_meta_merges_fields() {
        let store = store();
        let session = Uuid::new_v4();
        store
            .set_room_meta(
                session,
                RoomMeta {
                    join_code: Some("ABC234".into()),
                    ..RoomMeta::default()
                },
            )
            .await
            .unwrap();
        store
            .set_room_meta(
                session,
                RoomMeta {
                    status: Some(SessionStatus::Live),
                    started_at: Some(7),
                    ..RoomMeta::default()
                },
            )
            .await
            .unwrap();

        let meta = store.room_meta(session).await.unwrap().expect("meta stored");
        assert_eq!(meta.join_code.as_deref(), Some("ABC234"));
        assert_eq!(meta.status, Some(SessionStatus::Live));
        assert_eq!(meta.started_at, Some(7));
    }
}
