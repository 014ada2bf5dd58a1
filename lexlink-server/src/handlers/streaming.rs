use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Extension, Path, Query, State},
    http::header,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use serde::Deserialize;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{info, instrument};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{app_state::AppState, middleware::request_context::RequestContext};

#[derive(Debug, Deserialize, IntoParams)]
pub struct StreamParams {
    /// Reply id returned by the send endpoint. A fresh id is generated when
    /// the caller does not supply one.
    pub message_id: Option<Uuid>,
}

/// Opens the SSE reply stream for a conversation. Every frame is a JSON
/// payload carrying the reply id; the final frame has a `status` field.
#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages/stream",
    params(
        ("conversation_id" = Uuid, Path, description = "Conversation to stream a reply for"),
        StreamParams
    ),
    responses(
        (status = 200, description = "SSE stream of reply frames", content_type = "text/event-stream")
    ),
    tag = "Chat"
)]
#[instrument(skip(state, context, params))]
pub async fn stream_reply(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<StreamParams>,
) -> (
    [(header::HeaderName, &'static str); 2],
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
) {
    let message_id = params.message_id.unwrap_or_else(Uuid::new_v4);
    info!(%conversation_id, %message_id, "opening reply stream");

    let receiver = state
        .relay
        .open_reply_stream(context.user_id, conversation_id, message_id)
        .await;

    let stream = ReceiverStream::new(receiver)
        .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));

    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(
            state.config.stream.keepalive_seconds.max(5),
        ))
        .text("keep-alive");

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream).keep_alive(keepalive),
    )
}
