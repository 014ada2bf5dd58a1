use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Timestamp;

/// The author of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the client.
    User,
    /// Message from the AI legal assistant.
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl Display for MessageRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MessageRole {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role '{other}'")),
        }
    }
}

/// A single message in a conversation.
///
/// Messages within a conversation are totally ordered by `created_at`; the
/// most recent one determines the conversation preview text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Message {
    /// Unique identifier for the message.
    pub id: Uuid,

    /// ID of the conversation this message belongs to.
    pub conversation_id: Uuid,

    /// Who authored the message.
    pub role: MessageRole,

    /// The message content.
    pub content: String,

    /// Timestamp when the message was created.
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!(MessageRole::try_from("user").unwrap(), MessageRole::User);
        assert_eq!(
            MessageRole::try_from("assistant").unwrap(),
            MessageRole::Assistant
        );
        assert!(MessageRole::try_from("system").is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn message_serializes_with_role_and_content() {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role: MessageRole::User,
            content: "What is a non-disclosure agreement?".to_string(),
            created_at: Timestamp::now(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "What is a non-disclosure agreement?");
    }
}
