use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use shared::models::{
    Conversation, ConversationSummary, CreateConversationRequest, ErrorResponse, Message,
    SendMessageRequest, SendMessageResponse,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

const HISTORY_LIMIT: usize = 200;

fn require_user(context: &RequestContext) -> AppResult<Uuid> {
    context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("authentication required"))
}

#[utoipa::path(
    post,
    path = "/api/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = Conversation),
        (status = 401, description = "Authentication required", body = ErrorResponse)
    ),
    tag = "Chat"
)]
#[instrument(skip(state, context, request))]
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let user_id = require_user(&context)?;
    let title = request
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty());

    let conversation = state.store.create_conversation(user_id, title).await?;
    info!(conversation_id = %conversation.id, "conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    responses(
        (status = 200, description = "Conversations for the caller, most recent first", body = Vec<ConversationSummary>),
        (status = 401, description = "Authentication required", body = ErrorResponse)
    ),
    tag = "Chat"
)]
#[instrument(skip(state, context))]
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let user_id = require_user(&context)?;
    let conversations = state.store.list_conversations(user_id).await?;

    let mut summaries = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let preview = match state.store.recent_messages(conversation.id, 1).await {
            Ok(messages) => messages.into_iter().next().map(|message| message.content),
            Err(err) => {
                warn!(conversation_id = %conversation.id, %err, "failed to load preview");
                None
            }
        };
        summaries.push(ConversationSummary {
            id: conversation.id,
            title: conversation.title,
            preview,
            updated_at: conversation.updated_at,
        });
    }

    Ok(Json(summaries))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages",
    params(("conversation_id" = Uuid, Path, description = "Conversation to read")),
    responses(
        (status = 200, description = "Messages in chronological order", body = Vec<Message>),
        (status = 403, description = "Conversation owned by another user", body = ErrorResponse),
        (status = 404, description = "Conversation not found", body = ErrorResponse)
    ),
    tag = "Chat"
)]
#[instrument(skip(state, context))]
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    let messages = state
        .relay
        .history(context.user_id, conversation_id, HISTORY_LIMIT)
        .await?;
    Ok(Json(messages))
}

/// Accepts a user message and returns the id the assistant reply will
/// stream under. The reply itself is delivered by the stream endpoint.
#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/messages",
    params(("conversation_id" = Uuid, Path, description = "Target conversation")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Message accepted", body = SendMessageResponse),
        (status = 400, description = "Empty message", body = ErrorResponse),
        (status = 403, description = "Conversation owned by another user", body = ErrorResponse),
        (status = 404, description = "Conversation not found", body = ErrorResponse)
    ),
    tag = "Chat"
)]
#[instrument(skip(state, context, request))]
pub async fn send_message(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<Json<SendMessageResponse>> {
    let message_id = state
        .relay
        .send(context.user_id, conversation_id, &request.message)
        .await?;
    Ok(Json(SendMessageResponse::received(message_id)))
}
