pub mod conversation;
pub mod errors;
pub mod message;
pub mod streaming;
pub mod timestamp;

pub use conversation::{
    Conversation, ConversationSummary, CreateConversationRequest, SendMessageRequest,
    SendMessageResponse,
};
pub use errors::ErrorResponse;
pub use message::{Message, MessageRole};
pub use streaming::StreamEvent;
pub use timestamp::Timestamp;
