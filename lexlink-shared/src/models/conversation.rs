use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Timestamp;

/// A conversation between a client and the AI legal assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Conversation {
    /// Unique identifier for the conversation.
    pub id: Uuid,

    /// The user who owns this conversation.
    pub user_id: Uuid,

    /// Title, derived from the first message when not set explicitly.
    pub title: Option<String>,

    /// Timestamp when the conversation was created.
    pub created_at: Timestamp,

    /// Timestamp of the last activity in the conversation.
    pub updated_at: Timestamp,
}

/// Listing entry for a conversation, carrying the preview text taken from
/// the most recent message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: Option<String>,
    pub preview: Option<String>,
    pub updated_at: Timestamp,
}

/// Request body for creating a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CreateConversationRequest {
    /// Optional explicit title. When absent, the title is derived from the
    /// first message sent into the conversation.
    pub title: Option<String>,
}

/// Request body for sending a message into a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageRequest {
    pub message: String,
}

/// Response returned by the send endpoint. The `message_id` keys the
/// assistant reply that the stream endpoint will eventually persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageResponse {
    pub status: String,
    pub message_id: Uuid,
}

impl SendMessageResponse {
    pub fn received(message_id: Uuid) -> Self {
        Self {
            status: "message_received".to_string(),
            message_id,
        }
    }
}
