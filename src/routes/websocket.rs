use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{services::websocket_service, state::SharedState};

/// Largest frame a presenter or participant may send. Question lists travel
/// over HTTP, so socket frames stay small.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[utoipa::path(
    get,
    path = "/ws",
    tag = "live",
    responses(
        (status = 101, description = "Upgraded to the live quiz socket; the first frame must be a `join`"),
        (status = 400, description = "Request was not a WebSocket upgrade")
    )
)]
/// Open a live quiz socket for a presenter or a participant.
pub async fn live_socket(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| websocket_service::handle_socket(state, socket))
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(live_socket))
}
