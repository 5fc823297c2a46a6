use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::{AnswerAcceptedEvent, AnswerReceivedEvent},
        session::SubmitAnswerResponse,
    },
    error::ServiceError,
    jobs::workers::{LeaderboardJob, ScoreJob},
    services::{
        reconciler::{AnswerInput, ReconciledAnswer, reconcile_answer},
        room_events::{self, SessionTarget},
    },
    state::SharedState,
};

/// Store an answer durably, then fan out its side effects.
///
/// `connection` is the submitting socket; HTTP submissions have none and therefore never
/// touch the live tally. Side effects after the durable write are best-effort: their failures
/// are logged and never turn an accepted answer into an error.
pub async fn submit_answer(
    state: &SharedState,
    input: AnswerInput,
    connection: Option<Uuid>,
) -> Result<SubmitAnswerResponse, ServiceError> {
    state.ensure_writable()?;
    let stored = reconcile_answer(state.sessions().as_ref(), input).await?;
    let session_id = stored.session.id;
    let target = SessionTarget::new(session_id, Some(stored.session.join_code.as_str()));

    if let Some(connection) = connection {
        update_tally(state, &stored, connection, target).await;
    }

    let score_job = ScoreJob {
        session_id,
        question_id: stored.question.id.clone(),
        participant_key: stored.participant_key.clone(),
        display_name: stored.display_name.clone(),
        selected_index: stored.selected_index,
    };
    if let Err(err) = state.jobs().score().enqueue(score_job).await {
        warn!(session_id = %session_id, error = %err, "failed to enqueue score job");
    }

    let config = state.config();
    let leaderboard_job = LeaderboardJob {
        session_id,
        limit: config.leaderboard_limit,
    };
    if let Err(err) = state
        .jobs()
        .leaderboard()
        .debounce(
            leaderboard_job.debounce_key(),
            config.leaderboard_debounce,
            leaderboard_job,
        )
        .await
    {
        warn!(session_id = %session_id, error = %err, "failed to schedule leaderboard broadcast");
    }

    room_events::broadcast_answer_received(
        state.rooms(),
        target,
        &AnswerReceivedEvent {
            session_id,
            question_id: stored.question.id.clone(),
            participant_key: stored.participant_key.storage_key(),
            display_name: stored.display_name.clone(),
            selected_index: stored.selected_index,
            correct: stored.correct,
        },
    );

    if let Some(connection) = connection {
        room_events::send_to_connection(
            state.rooms(),
            connection,
            room_events::EVENT_ANSWER_ACCEPTED,
            &AnswerAcceptedEvent {
                question_id: stored.question.id.clone(),
                selected_index: stored.selected_index,
            },
        );
    }

    Ok(SubmitAnswerResponse {
        question_id: stored.question.id,
        participant_key: stored.participant_key.storage_key(),
        selected_index: stored.selected_index,
        correct: stored.correct,
        submitted_at: stored.submitted_at,
    })
}

/// Count the answer in the live tally if it targets the active question and this connection
/// has not been counted for the current round yet.
async fn update_tally(
    state: &SharedState,
    stored: &ReconciledAnswer,
    connection: Uuid,
    target: SessionTarget<'_>,
) {
    let live = state.live();
    let session_id = stored.session.id;
    match live.active_question(session_id).await {
        Ok(Some(active)) if active.question.id == stored.question.id => {}
        Ok(_) => return,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "active question unavailable; tally skipped");
            return;
        }
    }

    match live
        .record_respondent(session_id, &connection.to_string(), stored.selected_index)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!(session_id = %session_id, connection = %connection, "connection already counted this round");
            return;
        }
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "failed to record respondent");
            return;
        }
    }

    match live.increment_count(session_id, stored.selected_index).await {
        Ok(counts) => room_events::broadcast_answer_update(
            state.rooms(),
            target,
            &stored.question.id,
            counts,
            Some(stored.selected_index),
        ),
        Err(err) => warn!(session_id = %session_id, error = %err, "failed to update tally"),
    }
}
