use serde_json::{Value, json};
use uuid::Uuid;

/// One transient event on a reply stream.
///
/// Every stream carries zero or more `Chunk` events followed by exactly one
/// terminal event, either `Complete` or `Error`. Events are never persisted;
/// only the final assembled text is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A partial piece of the reply together with the cumulative text so far.
    Chunk {
        chunk: String,
        full_response: String,
    },
    /// Terminal event carrying the full reply text.
    Complete { full_response: String },
    /// Terminal event carrying a user-facing failure message.
    Error { error: String, message: String },
}

impl StreamEvent {
    /// Renders the wire payload for this event, keyed by the reply message id.
    /// The payload is the JSON carried in one `data: <JSON>\n\n` frame.
    pub fn payload(&self, message_id: Uuid) -> Value {
        match self {
            StreamEvent::Chunk {
                chunk,
                full_response,
            } => json!({
                "id": message_id,
                "chunk": chunk,
                "full_response": full_response,
            }),
            StreamEvent::Complete { full_response } => json!({
                "id": message_id,
                "status": "complete",
                "full_response": full_response,
            }),
            StreamEvent::Error { error, message } => json!({
                "id": message_id,
                "status": "error",
                "error": error,
                "message": message,
            }),
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_payload_shape() {
        let id = Uuid::new_v4();
        let event = StreamEvent::Chunk {
            chunk: "partial".to_string(),
            full_response: "partial".to_string(),
        };

        let payload = event.payload(id);
        assert_eq!(payload["id"], json!(id));
        assert_eq!(payload["chunk"], "partial");
        assert_eq!(payload["full_response"], "partial");
        assert!(payload.get("status").is_none());
        assert!(!event.is_terminal());
    }

    #[test]
    fn complete_payload_shape() {
        let id = Uuid::new_v4();
        let event = StreamEvent::Complete {
            full_response: "the whole reply".to_string(),
        };

        let payload = event.payload(id);
        assert_eq!(payload["status"], "complete");
        assert_eq!(payload["full_response"], "the whole reply");
        assert!(event.is_terminal());
    }

    #[test]
    fn error_payload_shape() {
        let id = Uuid::new_v4();
        let event = StreamEvent::Error {
            error: "upstream_unavailable".to_string(),
            message: "Sorry, something went wrong.".to_string(),
        };

        let payload = event.payload(id);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error"], "upstream_unavailable");
        assert_eq!(payload["message"], "Sorry, something went wrong.");
        assert!(event.is_terminal());
    }
}
