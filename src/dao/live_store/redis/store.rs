use std::{collections::HashMap, time::Duration};

use futures::future::{BoxFuture, FutureExt};
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;
use uuid::Uuid;

use super::{
    error::{RedisResult, RedisStoreError, command_error},
    keys::{COUNTS_LEN_FIELD, SessionKeys},
};
use crate::dao::{
    job_journal::redis::RedisJobJournal,
    live_store::{
        ActiveQuestion, LiveStore, ParticipantInfo, RoomMeta, ScoreEntry, ScoreRecord, SessionMode,
        rank_scores,
    },
    models::{PublicQuestion, SessionStatus, now_millis},
    storage::{StorageError, StorageResult},
};

/// Decrement a tally slot without going below zero, then return the whole tally hash.
const DECREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '0')
if current > 0 then
  redis.call('HINCRBY', KEYS[1], ARGV[1], -1)
end
redis.call('EXPIRE', KEYS[1], ARGV[2])
return redis.call('HGETALL', KEYS[1])
"#;

/// [`LiveStore`] backed by Redis hashes, strings and sorted sets under `quiz:{session}:*`.
///
/// Compound updates run as `MULTI`/`EXEC` pipelines so each contract operation is atomic.
#[derive(Clone)]
pub struct RedisLiveStore {
    connection: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisLiveStore {
    /// Open a managed connection; the manager reconnects on its own after failures.
    pub async fn connect(url: &str, ttl: Duration) -> RedisResult<Self> {
        let client = Client::open(url).map_err(|source| RedisStoreError::InvalidUrl { source })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|source| RedisStoreError::Connect { source })?;
        Ok(Self {
            connection,
            ttl_seconds: ttl.as_secs().max(1),
        })
    }

    /// Journal of pending jobs sharing this store's connection.
    pub fn job_journal(&self) -> RedisJobJournal {
        RedisJobJournal::new(self.connection.clone())
    }

    fn expire_seconds(&self) -> i64 {
        self.ttl_seconds as i64
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|err| StorageError::corrupt(key, err.to_string()))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|err| StorageError::corrupt(key, err.to_string()))
}

/// Read the whole score ranking and order it like the final results.
///
/// Sorted-set order alone breaks score ties by member, so the elapsed times are read alongside
/// and the ordering happens here.
async fn load_ranking(
    con: &mut ConnectionManager,
    session: Uuid,
    operation: &'static str,
) -> StorageResult<Vec<ScoreEntry>> {
    let keys = SessionKeys::new(session);
    let (scores, elapsed, names): (Vec<(String, f64)>, HashMap<String, f64>, HashMap<String, String>) =
        redis::pipe()
            .zrange_withscores(&keys.leaderboard, 0, -1)
            .zrange_withscores(&keys.elapsed, 0, -1)
            .hgetall(&keys.names)
            .query_async(con)
            .await
            .map_err(command_error(operation, session))?;
    Ok(rank_scores(
        scores
            .into_iter()
            .map(|(member, score)| ScoreRecord {
                display_name: names.get(&member).cloned().unwrap_or_else(|| member.clone()),
                elapsed_ms: elapsed.get(&member).map_or(0, |value| *value as i64),
                score: score_from(score),
                participant_key: member,
            })
            .collect(),
    ))
}

fn count_fields(counts: &[u32]) -> Vec<(String, i64)> {
    let mut fields = Vec::with_capacity(counts.len() + 1);
    fields.push((COUNTS_LEN_FIELD.to_owned(), counts.len() as i64));
    fields.extend(
        counts
            .iter()
            .enumerate()
            .map(|(index, count)| (index.to_string(), i64::from(*count))),
    );
    fields
}

fn decode_counts(raw: &HashMap<String, i64>) -> Vec<u32> {
    let len = raw
        .get(COUNTS_LEN_FIELD)
        .and_then(|len| usize::try_from(*len).ok())
        .unwrap_or(0);
    let mut counts = vec![0u32; len];
    for (field, value) in raw {
        let Ok(index) = field.parse::<usize>() else {
            continue;
        };
        if let Some(slot) = counts.get_mut(index) {
            *slot = u32::try_from(*value).unwrap_or(0);
        }
    }
    counts
}

fn room_fields(meta: &RoomMeta) -> Vec<(&'static str, String)> {
    let mut fields = Vec::new();
    if let Some(status) = meta.status {
        fields.push(("status", status.as_str().to_owned()));
    }
    if let Some(started_at) = meta.started_at {
        fields.push(("started_at", started_at.to_string()));
    }
    if let Some(duration) = meta.duration_seconds {
        fields.push(("duration_seconds", duration.to_string()));
    }
    if let Some(join_code) = meta.join_code.as_ref() {
        fields.push(("join_code", join_code.clone()));
    }
    fields
}

fn decode_room(raw: HashMap<String, String>) -> Option<RoomMeta> {
    if raw.is_empty() {
        return None;
    }
    Some(RoomMeta {
        status: raw.get("status").and_then(|value| SessionStatus::parse(value)),
        started_at: raw.get("started_at").and_then(|value| value.parse().ok()),
        duration_seconds: raw.get("duration_seconds").and_then(|value| value.parse().ok()),
        join_code: raw.get("join_code").cloned(),
    })
}

fn score_from(raw: f64) -> u32 {
    if raw.is_finite() && raw > 0.0 {
        raw as u32
    } else {
        0
    }
}

impl LiveStore for RedisLiveStore {
    fn set_room_meta(&self, session: Uuid, meta: RoomMeta) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        async move {
            let keys = SessionKeys::new(session);
            let fields = room_fields(&meta);
            let mut pipe = redis::pipe();
            pipe.atomic();
            if !fields.is_empty() {
                pipe.hset_multiple(&keys.room, &fields).ignore();
            }
            pipe.expire(&keys.room, ttl).ignore();
            pipe.query_async::<()>(&mut con)
                .await
                .map_err(command_error("set_room_meta", session))?;
            Ok(())
        }
        .boxed()
    }

    fn room_meta(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomMeta>>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            let raw: HashMap<String, String> = con
                .hgetall(&keys.room)
                .await
                .map_err(command_error("room_meta", session))?;
            Ok(decode_room(raw))
        }
        .boxed()
    }

    fn set_active_question(
        &self,
        session: Uuid,
        question: ActiveQuestion,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let ttl = self.ttl_seconds;
        async move {
            let keys = SessionKeys::new(session);
            let payload = encode(&keys.question, &question)?;
            let zeros = vec![0u32; question.question.options.len()];
            redis::pipe()
                .atomic()
                .del(keys.round())
                .ignore()
                .del(&keys.questions)
                .ignore()
                .set_ex(&keys.question, payload, ttl)
                .ignore()
                .set_ex(&keys.mode, SessionMode::SingleQuestion.as_str(), ttl)
                .ignore()
                .hset_multiple(&keys.counts, &count_fields(&zeros))
                .ignore()
                .expire(&keys.counts, ttl as i64)
                .ignore()
                .query_async::<()>(&mut con)
                .await
                .map_err(command_error("set_active_question", session))?;
            Ok(())
        }
        .boxed()
    }

    fn active_question(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveQuestion>>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            let raw: Option<String> = con
                .get(&keys.question)
                .await
                .map_err(command_error("active_question", session))?;
            raw.map(|raw| decode(&keys.question, &raw)).transpose()
        }
        .boxed()
    }

    fn clear_active_question(&self, session: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            con.del::<_, ()>(keys.round())
                .await
                .map_err(command_error("clear_active_question", session))?;
            Ok(())
        }
        .boxed()
    }

    fn set_question_list(
        &self,
        session: Uuid,
        questions: Vec<PublicQuestion>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let ttl = self.ttl_seconds;
        async move {
            let keys = SessionKeys::new(session);
            let payload = encode(&keys.questions, &questions)?;
            redis::pipe()
                .atomic()
                .del(keys.round())
                .ignore()
                .set_ex(&keys.questions, payload, ttl)
                .ignore()
                .set_ex(&keys.mode, SessionMode::QuestionList.as_str(), ttl)
                .ignore()
                .query_async::<()>(&mut con)
                .await
                .map_err(command_error("set_question_list", session))?;
            Ok(())
        }
        .boxed()
    }

    fn question_list(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Vec<PublicQuestion>>>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            let raw: Option<String> = con
                .get(&keys.questions)
                .await
                .map_err(command_error("question_list", session))?;
            raw.map(|raw| decode(&keys.questions, &raw)).transpose()
        }
        .boxed()
    }

    fn session_mode(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionMode>>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            let raw: Option<String> = con
                .get(&keys.mode)
                .await
                .map_err(command_error("session_mode", session))?;
            Ok(raw.as_deref().and_then(SessionMode::parse))
        }
        .boxed()
    }

    fn init_counts(&self, session: Uuid, options: usize) -> BoxFuture<'static, StorageResult<()>> {
        self.set_counts(session, vec![0; options])
    }

    fn counts(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Vec<u32>>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            let raw: HashMap<String, i64> = con
                .hgetall(&keys.counts)
                .await
                .map_err(command_error("counts", session))?;
            Ok(decode_counts(&raw))
        }
        .boxed()
    }

    fn set_counts(&self, session: Uuid, counts: Vec<u32>) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        async move {
            let keys = SessionKeys::new(session);
            redis::pipe()
                .atomic()
                .del(&keys.counts)
                .ignore()
                .hset_multiple(&keys.counts, &count_fields(&counts))
                .ignore()
                .expire(&keys.counts, ttl)
                .ignore()
                .query_async::<()>(&mut con)
                .await
                .map_err(command_error("set_counts", session))?;
            Ok(())
        }
        .boxed()
    }

    fn increment_count(
        &self,
        session: Uuid,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<u32>>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        async move {
            let keys = SessionKeys::new(session);
            let (raw,): (HashMap<String, i64>,) = redis::pipe()
                .atomic()
                .hincr(&keys.counts, index.to_string(), 1)
                .ignore()
                .expire(&keys.counts, ttl)
                .ignore()
                .hgetall(&keys.counts)
                .query_async(&mut con)
                .await
                .map_err(command_error("increment_count", session))?;
            Ok(decode_counts(&raw))
        }
        .boxed()
    }

    fn decrement_count(
        &self,
        session: Uuid,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<u32>>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        async move {
            let keys = SessionKeys::new(session);
            let raw: HashMap<String, i64> = Script::new(DECREMENT_SCRIPT)
                .key(&keys.counts)
                .arg(index.to_string())
                .arg(ttl)
                .invoke_async(&mut con)
                .await
                .map_err(command_error("decrement_count", session))?;
            Ok(decode_counts(&raw))
        }
        .boxed()
    }

    fn record_respondent(
        &self,
        session: Uuid,
        connection: &str,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        let connection = connection.to_owned();
        async move {
            let keys = SessionKeys::new(session);
            let (recorded,): (bool,) = redis::pipe()
                .atomic()
                .hset_nx(&keys.respondents, &connection, index)
                .expire(&keys.respondents, ttl)
                .ignore()
                .query_async(&mut con)
                .await
                .map_err(command_error("record_respondent", session))?;
            Ok(recorded)
        }
        .boxed()
    }

    fn has_responded(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut con = self.connection.clone();
        let connection = connection.to_owned();
        async move {
            let keys = SessionKeys::new(session);
            let exists: bool = con
                .hexists(&keys.respondents, &connection)
                .await
                .map_err(command_error("has_responded", session))?;
            Ok(exists)
        }
        .boxed()
    }

    fn remove_respondent(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<Option<u32>>> {
        let mut con = self.connection.clone();
        let connection = connection.to_owned();
        async move {
            let keys = SessionKeys::new(session);
            let (previous,): (Option<u32>,) = redis::pipe()
                .atomic()
                .hget(&keys.respondents, &connection)
                .hdel(&keys.respondents, &connection)
                .ignore()
                .query_async(&mut con)
                .await
                .map_err(command_error("remove_respondent", session))?;
            Ok(previous)
        }
        .boxed()
    }

    fn clear_respondents(&self, session: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            con.del::<_, ()>(&keys.respondents)
                .await
                .map_err(command_error("clear_respondents", session))?;
            Ok(())
        }
        .boxed()
    }

    fn mark_question_expired(
        &self,
        session: Uuid,
        question_id: &str,
        sent_at: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        let field = format!("{question_id}:{sent_at}");
        async move {
            let keys = SessionKeys::new(session);
            let (first,): (bool,) = redis::pipe()
                .atomic()
                .hset_nx(&keys.expired, &field, now_millis())
                .expire(&keys.expired, ttl)
                .ignore()
                .query_async(&mut con)
                .await
                .map_err(command_error("mark_question_expired", session))?;
            Ok(first)
        }
        .boxed()
    }

    fn upsert_participant(
        &self,
        session: Uuid,
        connection: &str,
        info: ParticipantInfo,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        let connection = connection.to_owned();
        async move {
            let keys = SessionKeys::new(session);
            let payload = encode(&keys.participants, &info)?;
            redis::pipe()
                .atomic()
                .hset(&keys.participants, &connection, payload)
                .ignore()
                .expire(&keys.participants, ttl)
                .ignore()
                .query_async::<()>(&mut con)
                .await
                .map_err(command_error("upsert_participant", session))?;
            Ok(())
        }
        .boxed()
    }

    fn remove_participant(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let connection = connection.to_owned();
        async move {
            let keys = SessionKeys::new(session);
            con.hdel::<_, _, ()>(&keys.participants, &connection)
                .await
                .map_err(command_error("remove_participant", session))?;
            Ok(())
        }
        .boxed()
    }

    fn participants(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<(String, ParticipantInfo)>>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            let raw: HashMap<String, String> = con
                .hgetall(&keys.participants)
                .await
                .map_err(command_error("participants", session))?;
            let mut participants: Vec<(String, ParticipantInfo)> = raw
                .into_iter()
                .filter_map(|(connection, payload)| {
                    match decode::<ParticipantInfo>(&keys.participants, &payload) {
                        Ok(info) => Some((connection, info)),
                        Err(err) => {
                            warn!(%session, %connection, error = %err, "skipping unreadable participant entry");
                            None
                        }
                    }
                })
                .collect();
            participants.sort_by_key(|(_, info)| info.joined_at);
            Ok(participants)
        }
        .boxed()
    }

    fn update_score(
        &self,
        session: Uuid,
        participant_key: &str,
        score: u32,
        elapsed_ms: i64,
        display_name: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let ttl = self.expire_seconds();
        let member = participant_key.to_owned();
        let display_name = display_name.to_owned();
        async move {
            let keys = SessionKeys::new(session);
            redis::pipe()
                .atomic()
                .cmd("ZADD")
                .arg(&keys.leaderboard)
                .arg("GT")
                .arg(score)
                .arg(&member)
                .ignore()
                .cmd("ZADD")
                .arg(&keys.elapsed)
                .arg("GT")
                .arg(elapsed_ms.max(0))
                .arg(&member)
                .ignore()
                .hset(&keys.names, &member, &display_name)
                .ignore()
                .expire(&keys.leaderboard, ttl)
                .ignore()
                .expire(&keys.elapsed, ttl)
                .ignore()
                .expire(&keys.names, ttl)
                .ignore()
                .query_async::<()>(&mut con)
                .await
                .map_err(command_error("update_score", session))?;
            Ok(())
        }
        .boxed()
    }

    fn top_scores(
        &self,
        session: Uuid,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEntry>>> {
        let mut con = self.connection.clone();
        async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let mut ranking = load_ranking(&mut con, session, "top_scores").await?;
            ranking.truncate(limit);
            Ok(ranking)
        }
        .boxed()
    }

    fn rank(
        &self,
        session: Uuid,
        participant_key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ScoreEntry>>> {
        let mut con = self.connection.clone();
        let member = participant_key.to_owned();
        async move {
            let ranking = load_ranking(&mut con, session, "rank").await?;
            Ok(ranking
                .into_iter()
                .find(|entry| entry.participant_key == member))
        }
        .boxed()
    }

    fn purge_session(&self, session: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        let mut con = self.connection.clone();
        async move {
            let keys = SessionKeys::new(session);
            let removed: u64 = con
                .del(keys.all())
                .await
                .map_err(command_error("purge_session", session))?;
            Ok(removed)
        }
        .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        async move {
            redis::cmd("PING")
                .query_async::<String>(&mut con)
                .await
                .map_err(|source| RedisStoreError::HealthPing { source })?;
            Ok(())
        }
        .boxed()
    }
}
