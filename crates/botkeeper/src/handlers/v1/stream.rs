//! Live status stream.

use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt;

use crate::server::AppState;

/// SSE event name carrying a status snapshot.
pub const UPDATE_EVENT: &str = "bots:update";

/// GET /api/v1/processes/stream
///
/// Server-Sent Events endpoint. Emits the current snapshot on connect and
/// then one `bots:update` event per reconciliation tick:
/// `{"tick": n, "taken_at": "...", "processes": [...]}`.
///
/// The connection counts as an observer until the client goes away.
pub async fn stream_processes(State(state): State<AppState>) -> Response {
    let events = state
        .broadcaster
        .subscribe()
        .into_stream()
        .map(|snapshot| Event::default().event(UPDATE_EVENT).json_data(&*snapshot));

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(events).keep_alive(keep_alive).into_response()
}
