use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        live_store::{ParticipantInfo, RoomMeta, SessionMode},
        models::{Role, SessionEntity, now_millis},
        storage::StorageResult,
    },
    dto::{
        events::{
            AnswerUpdateEvent, JoinedEvent, LeaderboardUpdateEvent, QuestionEvent,
            QuestionListEvent, ServerEvent,
        },
        ws::{ClientMessage, JoinRequest, SubmitAnswerMessage},
    },
    error::ServiceError,
    services::{
        answer_service,
        reconciler::AnswerInput,
        room_events::{self, SessionTarget},
        session_service,
    },
    state::{
        SharedState,
        rooms::{code_room, session_room},
    },
};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity a connection acquired with its join request.
#[derive(Debug, Clone)]
pub struct JoinedConnection {
    pub connection: Uuid,
    pub session_id: Uuid,
    pub join_code: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub participant_id: Option<String>,
}

impl JoinedConnection {
    fn target(&self) -> SessionTarget<'_> {
        SessionTarget::new(self.session_id, Some(self.join_code.as_str()))
    }
}

/// Handle the full lifecycle of a quiz socket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        let mut outbound = UnboundedReceiverStream::new(outbound_rx);
        while let Some(event) = outbound.next().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(event = %event.event, error = %err, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    state.rooms().connect(connection, outbound_tx.clone());

    let initial_message = match tokio::time::timeout(JOIN_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) => {
            debug!(connection = %connection, "first frame was not a join request");
            finalize(&state, connection, writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(&state, connection, writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!(connection = %connection, "websocket join timed out");
            finalize(&state, connection, writer_task, outbound_tx).await;
            return;
        }
    };

    let joined = match ClientMessage::from_json_str(&initial_message) {
        Ok(ClientMessage::Join(request)) => match handle_join(&state, connection, request).await {
            Ok(joined) => joined,
            Err(err) => {
                warn!(connection = %connection, error = %err, "join rejected");
                room_events::send_error(state.rooms(), connection, &err);
                finalize(&state, connection, writer_task, outbound_tx).await;
                return;
            }
        },
        Ok(_) => {
            let err = ServiceError::InvalidInput("the first message must be a join request".into());
            room_events::send_error(state.rooms(), connection, &err);
            finalize(&state, connection, writer_task, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(connection = %connection, error = %err, "failed to parse join request");
            let err = ServiceError::InvalidInput(format!("malformed message: {err}"));
            room_events::send_error(state.rooms(), connection, &err);
            finalize(&state, connection, writer_task, outbound_tx).await;
            return;
        }
    };

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let result = match ClientMessage::from_json_str(&text) {
                    Ok(message) => handle_message(&state, &joined, message).await,
                    Err(err) => Err(ServiceError::InvalidInput(format!(
                        "malformed message: {err}"
                    ))),
                };
                if let Err(err) = result {
                    debug!(connection = %connection, error = %err, "client request failed");
                    room_events::send_error(state.rooms(), connection, &err);
                }
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %connection, "client closed the socket");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Err(err) => {
                warn!(connection = %connection, error = %err, "websocket error");
                break;
            }
        }
    }

    cleanup_connection(&state, &joined).await;
    info!(connection = %connection, session_id = %joined.session_id, "connection left");
    finalize(&state, connection, writer_task, outbound_tx).await;
}

/// Resolve the session, check the presenter token, join the room and replay current state.
pub async fn handle_join(
    state: &SharedState,
    connection: Uuid,
    request: JoinRequest,
) -> Result<JoinedConnection, ServiceError> {
    let (session, room) = match (request.session_id, request.join_code.as_deref()) {
        (Some(id), _) => (
            session_service::find_session(state, id).await?,
            session_room(id),
        ),
        (None, Some(code)) => {
            let session = session_service::find_by_join_code(state, code).await?;
            let room = code_room(&session.join_code);
            (session, room)
        }
        (None, None) => {
            return Err(ServiceError::InvalidInput(
                "session_id or join_code is required".into(),
            ));
        }
    };
    if request.role == Role::Presenter {
        session_service::ensure_presenter(&session, request.presenter_token.as_deref())?;
    }
    state.rooms().join(connection, &room);

    let joined = JoinedConnection {
        connection,
        session_id: session.id,
        join_code: session.join_code.clone(),
        role: request.role,
        display_name: clean(request.display_name),
        participant_id: clean(request.participant_id),
    };

    let live = state.live();
    let registered = live
        .upsert_participant(
            session.id,
            &connection.to_string(),
            ParticipantInfo {
                role: joined.role,
                display_name: joined.display_name.clone(),
                participant_id: joined.participant_id.clone(),
                joined_at: now_millis(),
            },
        )
        .await;
    if let Err(err) = registered {
        warn!(session_id = %session.id, error = %err, "participant registry unavailable");
    }
    let meta = RoomMeta {
        join_code: Some(session.join_code.clone()),
        ..RoomMeta::default()
    };
    if let Err(err) = live.set_room_meta(session.id, meta).await {
        warn!(session_id = %session.id, error = %err, "failed to record room meta");
    }

    room_events::send_to_connection(
        state.rooms(),
        connection,
        room_events::EVENT_JOINED,
        &JoinedEvent {
            session_id: session.id,
            join_code: session.join_code.clone(),
            role: joined.role,
            connection_id: connection,
            status: session.status,
        },
    );
    send_catch_up(state, connection, &session).await;
    info!(connection = %connection, session_id = %session.id, role = ?joined.role, "connection joined");
    Ok(joined)
}

/// Replay status, the current question state and the leaderboard to a late joiner.
///
/// Reads degrade to "nothing cached" when the ephemeral store is unavailable.
async fn send_catch_up(state: &SharedState, connection: Uuid, session: &SessionEntity) {
    let rooms = state.rooms();
    let live = state.live();
    room_events::send_to_connection(
        rooms,
        connection,
        room_events::EVENT_STATUS_UPDATE,
        &session_service::status_event(session),
    );

    match cached(session.id, "session mode", live.session_mode(session.id).await) {
        Some(SessionMode::SingleQuestion) => {
            let active = cached(
                session.id,
                "active question",
                live.active_question(session.id).await,
            );
            if let Some(active) = active {
                let question_id = active.question.id.clone();
                room_events::send_to_connection(
                    rooms,
                    connection,
                    room_events::EVENT_QUESTION,
                    &QuestionEvent {
                        session_id: session.id,
                        question: active.question,
                        sent_at: active.sent_at,
                        duration_seconds: active.duration_seconds,
                        mode: SessionMode::SingleQuestion,
                    },
                );
                let counts = cached(session.id, "counts", live.counts(session.id).await.map(Some))
                    .unwrap_or_default();
                room_events::send_to_connection(
                    rooms,
                    connection,
                    room_events::EVENT_ANSWER_UPDATE,
                    &AnswerUpdateEvent {
                        question_id,
                        counts,
                        last: None,
                    },
                );
            }
        }
        Some(SessionMode::QuestionList) => {
            let questions = cached(
                session.id,
                "question list",
                live.question_list(session.id).await,
            );
            if let Some(questions) = questions {
                room_events::send_to_connection(
                    rooms,
                    connection,
                    room_events::EVENT_QUESTION_LIST,
                    &QuestionListEvent {
                        session_id: session.id,
                        questions,
                        mode: SessionMode::QuestionList,
                    },
                );
            }
        }
        None => {}
    }

    let limit = state.config().leaderboard_limit;
    let leaderboard = cached(
        session.id,
        "leaderboard",
        live.top_scores(session.id, limit).await.map(Some),
    )
    .unwrap_or_default();
    if !leaderboard.is_empty() {
        room_events::send_to_connection(
            rooms,
            connection,
            room_events::EVENT_LEADERBOARD_UPDATE,
            &LeaderboardUpdateEvent {
                session_id: session.id,
                leaderboard,
                updated_at: now_millis(),
            },
        );
    }
}

pub async fn handle_message(
    state: &SharedState,
    joined: &JoinedConnection,
    message: ClientMessage,
) -> Result<(), ServiceError> {
    match message {
        ClientMessage::Join(_) => {
            warn!(connection = %joined.connection, "ignoring duplicate join request");
            Ok(())
        }
        ClientMessage::OpenQuestion {
            question_id,
            duration_seconds,
        } => {
            let session = presenter_session(state, joined).await?;
            session_service::open_question(state, &session, &question_id, duration_seconds)
                .await
                .map(|_| ())
        }
        ClientMessage::PublishQuestionList => {
            let session = presenter_session(state, joined).await?;
            session_service::publish_question_list(state, &session)
                .await
                .map(|_| ())
        }
        ClientMessage::ChangeStatus { status } => {
            let session = presenter_session(state, joined).await?;
            session_service::change_status(state, &session, status)
                .await
                .map(|_| ())
        }
        ClientMessage::SubmitAnswer(answer) => submit_answer(state, joined, answer).await,
    }
}

async fn submit_answer(
    state: &SharedState,
    joined: &JoinedConnection,
    answer: SubmitAnswerMessage,
) -> Result<(), ServiceError> {
    let question_id = match answer.question_id {
        Some(question_id) => question_id,
        None => state
            .live()
            .active_question(joined.session_id)
            .await?
            .map(|active| active.question.id)
            .ok_or_else(|| ServiceError::InvalidState("no question is open".into()))?,
    };
    let input = AnswerInput {
        session_id: joined.session_id,
        question_id,
        participant_id: clean(answer.participant_id).or_else(|| joined.participant_id.clone()),
        display_name: clean(answer.display_name).or_else(|| joined.display_name.clone()),
        selected_index: answer.selected_index,
    };
    answer_service::submit_answer(state, input, Some(joined.connection))
        .await
        .map(|_| ())
}

async fn presenter_session(
    state: &SharedState,
    joined: &JoinedConnection,
) -> Result<SessionEntity, ServiceError> {
    if joined.role != Role::Presenter {
        return Err(ServiceError::Unauthorized(
            "only the presenter can do this".into(),
        ));
    }
    session_service::find_session(state, joined.session_id).await
}

/// Forget the connection in the registry and withdraw its vote from the current round.
pub async fn cleanup_connection(state: &SharedState, joined: &JoinedConnection) {
    let live = state.live();
    let key = joined.connection.to_string();
    if let Err(err) = live.remove_participant(joined.session_id, &key).await {
        warn!(session_id = %joined.session_id, error = %err, "failed to remove participant");
    }

    let active = match live.active_question(joined.session_id).await {
        Ok(Some(active)) => active,
        Ok(None) => return,
        Err(err) => {
            warn!(session_id = %joined.session_id, error = %err, "active question unavailable");
            return;
        }
    };
    let index = match live.remove_respondent(joined.session_id, &key).await {
        Ok(Some(index)) => index,
        Ok(None) => return,
        Err(err) => {
            warn!(session_id = %joined.session_id, error = %err, "failed to remove respondent");
            return;
        }
    };
    // The vote belongs to the round read above; a newer round starts from zeroed tallies.
    let same_round = match live.active_question(joined.session_id).await {
        Ok(current) => current.is_some_and(|current| {
            current.is_round(&active.question.id, active.sent_at)
        }),
        Err(err) => {
            warn!(session_id = %joined.session_id, error = %err, "active question unavailable");
            false
        }
    };
    if !same_round {
        debug!(session_id = %joined.session_id, "round changed during disconnect; tally untouched");
        return;
    }
    match live.decrement_count(joined.session_id, index).await {
        Ok(counts) => room_events::broadcast_answer_update(
            state.rooms(),
            joined.target(),
            &active.question.id,
            counts,
            None,
        ),
        Err(err) => warn!(session_id = %joined.session_id, error = %err, "failed to adjust tally"),
    }
}

fn cached<T>(session_id: Uuid, what: &str, result: StorageResult<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "{what} unavailable; skipping catch-up");
            None
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(
    state: &SharedState,
    connection: Uuid,
    writer_task: JoinHandle<()>,
    outbound_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    state.rooms().disconnect(connection);
    drop(outbound_tx);
    let _ = writer_task.await;
}
