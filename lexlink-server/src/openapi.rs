use shared::models::{
    Conversation, ConversationSummary, CreateConversationRequest, ErrorResponse, Message,
    MessageRole, SendMessageRequest, SendMessageResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "LexLink Relay API",
        version = "1.0.0",
        description = "Streaming chat relay for the LexLink legal assistant"
    ),
    paths(
        crate::handlers::conversation::create_conversation,
        crate::handlers::conversation::list_conversations,
        crate::handlers::conversation::get_conversation_messages,
        crate::handlers::conversation::send_message,
        crate::handlers::streaming::stream_reply,
    ),
    components(
        schemas(
            Conversation,
            ConversationSummary,
            CreateConversationRequest,
            Message,
            MessageRole,
            SendMessageRequest,
            SendMessageResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Chat", description = "Conversation and streaming endpoints")
    )
)]
pub struct ApiDoc;
