use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    app_state::AppState,
    handlers::{
        conversation::{
            create_conversation, get_conversation_messages, list_conversations, send_message,
        },
        streaming::stream_reply,
    },
};

pub fn create_chat_router() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(send_message).get(get_conversation_messages),
        )
        .route(
            "/conversations/{conversation_id}/messages/stream",
            get(stream_reply),
        )
}
