use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, patch, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        events::StatusUpdateEvent,
        session::{
            ChangeStatusRequest, CreateSessionRequest, CreateSessionResponse,
            LiveLeaderboardResponse, QuestionInput, SessionSummary, SubmitAnswerRequest,
            SubmitAnswerResponse,
        },
    },
    error::AppError,
    services::{answer_service, reconciler::AnswerInput, session_service, stats::SessionStats},
    state::SharedState,
};

/// Header carrying the secret returned by session creation.
pub const PRESENTER_TOKEN_HEADER: &str = "x-presenter-token";

/// Routes for session authoring, answers over HTTP and results.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/code/{code}", get(find_by_code))
        .route("/sessions/{id}", delete(delete_session))
        .route("/sessions/{id}/results", get(results))
        .route("/sessions/{id}/leaderboard", get(leaderboard))
        .route("/sessions/{id}/answers", post(submit_answer))
        .route("/sessions/{id}/status", patch(change_status))
        .route("/sessions/{id}/questions", post(add_question))
}

fn presenter_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(PRESENTER_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Create a session and hand its credentials to the owner.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid session definition")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let created = session_service::create_session(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Look a session up by join code, ignoring case and surrounding blanks.
#[utoipa::path(
    get,
    path = "/sessions/code/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Join code shown to participants")),
    responses(
        (status = 200, description = "Public view of the session", body = SessionSummary),
        (status = 404, description = "No session uses this code")
    )
)]
pub async fn find_by_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    let summary = session_service::lookup_by_code(&state, &code).await?;
    Ok(Json(summary))
}

/// Aggregate the final results over every stored submission.
#[utoipa::path(
    get,
    path = "/sessions/{id}/results",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Per-question counts and final ranking", body = SessionStats),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn results(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStats>, AppError> {
    let stats = session_service::results(&state, id).await?;
    Ok(Json(stats))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/leaderboard",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Live ranking", body = LiveLeaderboardResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LiveLeaderboardResponse>, AppError> {
    let leaderboard = session_service::live_leaderboard(&state, id).await?;
    Ok(Json(leaderboard))
}

/// Submit an answer outside of a socket. The live tally is left untouched.
#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    tag = "answers",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 201, description = "Answer stored", body = SubmitAnswerResponse),
        (status = 404, description = "Unknown session or question"),
        (status = 409, description = "Participant already answered this question")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<(StatusCode, Json<SubmitAnswerResponse>), AppError> {
    let input = AnswerInput {
        session_id: id,
        question_id: payload.question_id,
        participant_id: payload.participant_id,
        display_name: payload.display_name,
        selected_index: payload.selected_index,
    };
    let accepted = answer_service::submit_answer(&state, input, None).await?;
    Ok((StatusCode::CREATED, Json(accepted)))
}

/// Move the session to a new status. Presenter only.
#[utoipa::path(
    patch,
    path = "/sessions/{id}/status",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-presenter-token" = String, Header, description = "Presenter token")
    ),
    request_body = ChangeStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = StatusUpdateEvent),
        (status = 401, description = "Missing or invalid presenter token")
    )
)]
pub async fn change_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ChangeStatusRequest>,
) -> Result<Json<StatusUpdateEvent>, AppError> {
    let session = session_service::authorize_presenter(&state, id, presenter_token(&headers)).await?;
    let event = session_service::change_status(&state, &session, payload.status).await?;
    Ok(Json(event))
}

/// Append a question to the session. Presenter only.
#[utoipa::path(
    post,
    path = "/sessions/{id}/questions",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-presenter-token" = String, Header, description = "Presenter token")
    ),
    request_body = QuestionInput,
    responses(
        (status = 200, description = "Question added", body = SessionSummary),
        (status = 400, description = "Invalid question"),
        (status = 401, description = "Missing or invalid presenter token")
    )
)]
pub async fn add_question(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<QuestionInput>>,
) -> Result<Json<SessionSummary>, AppError> {
    let session = session_service::authorize_presenter(&state, id, presenter_token(&headers)).await?;
    let summary = session_service::add_question(&state, &session, payload).await?;
    Ok(Json(summary))
}

/// Delete the session and its ephemeral state. Presenter only.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-presenter-token" = String, Header, description = "Presenter token")
    ),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 401, description = "Missing or invalid presenter token"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let session = session_service::authorize_presenter(&state, id, presenter_token(&headers)).await?;
    session_service::delete_session(&state, &session).await?;
    Ok(StatusCode::NO_CONTENT)
}
