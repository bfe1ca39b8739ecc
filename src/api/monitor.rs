//! Live monitoring stream: accepted webhook events as server-sent events.
//! Subscribers that fall behind simply lose messages; the hub never pushes
//! back on the webhook path.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;

pub async fn stream_webhooks(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.hub.subscribe()).filter_map(|msg| async move {
        // Lagged receivers skip ahead; dropped messages are by design.
        let event = msg.ok()?;
        let json = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().data(json)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
