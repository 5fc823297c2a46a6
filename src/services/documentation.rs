use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the live quiz backend.
#[openapi(
    paths(
        crate::routes::health::quiz_health,
        crate::routes::jobs::failed_jobs,
        crate::routes::sessions::create_session,
        crate::routes::sessions::find_by_code,
        crate::routes::sessions::results,
        crate::routes::sessions::leaderboard,
        crate::routes::sessions::submit_answer,
        crate::routes::sessions::change_status,
        crate::routes::sessions::add_question,
        crate::routes::sessions::delete_session,
        crate::routes::websocket::live_socket,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::CreateSessionResponse,
            crate::dto::session::QuestionInput,
            crate::dto::session::SessionSummary,
            crate::dto::session::SubmitAnswerRequest,
            crate::dto::session::SubmitAnswerResponse,
            crate::dto::session::ChangeStatusRequest,
            crate::dto::session::LiveLeaderboardResponse,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::JoinRequest,
            crate::dto::ws::SubmitAnswerMessage,
            crate::dto::events::JoinedEvent,
            crate::dto::events::StatusUpdateEvent,
            crate::dto::events::QuestionEvent,
            crate::dto::events::QuestionListEvent,
            crate::dto::events::AnswerUpdateEvent,
            crate::dto::events::AnswerReceivedEvent,
            crate::dto::events::AnswerAcceptedEvent,
            crate::dto::events::LeaderboardUpdateEvent,
            crate::dto::events::ResultUpdateEvent,
            crate::dto::events::StudentResultEvent,
            crate::dto::events::StudentAnswer,
            crate::dto::events::QuestionExpiredEvent,
            crate::dto::events::FinishedEvent,
            crate::dto::events::DeletedEvent,
            crate::dto::events::ErrorEvent,
            crate::services::stats::SessionStats,
            crate::services::stats::QuestionStats,
            crate::services::stats::LeaderboardRow,
            crate::jobs::FailedJob,
            crate::dao::models::SessionStatus,
            crate::dao::models::PublicQuestion,
            crate::dao::models::Role,
            crate::dao::live_store::ScoreEntry,
            crate::dao::live_store::SessionMode,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session authoring, lifecycle and results"),
        (name = "answers", description = "Answer submission over HTTP"),
        (name = "jobs", description = "Background job inspection"),
        (name = "live", description = "WebSocket protocol for presenters and participants"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_session_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/jobs/failed",
            "/sessions",
            "/sessions/code/{code}",
            "/sessions/{id}",
            "/sessions/{id}/results",
            "/sessions/{id}/answers",
            "/sessions/{id}/status",
            "/ws",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
