//! Stream relay core.
//!
//! Given `(conversation, user message)` the relay persists the user turn,
//! tries the upstream inference service, proxies its SSE token stream back
//! to the caller, and guarantees a durable assistant message for every send
//! that reaches the streaming step. Upstream failure is never surfaced as a
//! hard error; it switches the stream to the local fallback generator.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use metrics::counter;
use serde_json::Value;
use shared::models::{Conversation, Message, MessageRole, StreamEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::{
    fallback::FallbackGenerator,
    sse::{FrameAssembler, data_payload},
    store::{ConversationStore, StoreError},
    upstream::UpstreamClient,
};

/// Maximum derived-title length before the ellipsis is appended.
const TITLE_MAX_CHARS: usize = 30;

/// User-facing text emitted and persisted when a live stream breaks.
const STREAM_APOLOGY: &str = "I'm sorry, but something went wrong while generating this reply. \
     Please try sending your message again.";

/// Persisted when the upstream stream ends without reporting any text.
const NO_RESPONSE_TEXT: &str =
    "The assistant did not return a response. Please try sending your message again.";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Derives a conversation title from its first message: the first 30
/// characters, with `...` appended when the message is longer.
pub fn derive_title(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

#[derive(Clone)]
pub struct StreamRelay {
    store: Arc<dyn ConversationStore>,
    upstream: UpstreamClient,
    fallback: FallbackGenerator,
    channel_capacity: usize,
}

impl StreamRelay {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        upstream: UpstreamClient,
        fallback_delay: Duration,
        channel_capacity: usize,
    ) -> Self {
        let fallback = FallbackGenerator::new(store.clone(), fallback_delay);
        Self {
            store,
            upstream,
            fallback,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Ownership gate shared by every operation. Unauthenticated callers and
    /// non-owners are rejected before anything is persisted.
    async fn authorize(
        &self,
        user_id: Option<Uuid>,
        conversation_id: Uuid,
    ) -> RelayResult<Conversation> {
        let user_id = user_id.ok_or(RelayError::Unauthenticated)?;
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                RelayError::NotFound(format!("conversation {conversation_id} not found"))
            })?;
        if conversation.user_id != user_id {
            return Err(RelayError::Forbidden(
                "conversation is owned by another user".to_string(),
            ));
        }
        Ok(conversation)
    }

    /// Send operation: persists the user message and returns the id that
    /// will key the assistant reply. Upstream failure degrades, never fails;
    /// the caller always gets a usable id to open a stream against.
    #[instrument(name = "relay.send", skip(self, text), err)]
    pub async fn send(
        &self,
        user_id: Option<Uuid>,
        conversation_id: Uuid,
        text: &str,
    ) -> RelayResult<Uuid> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RelayError::Validation(
                "message must not be empty".to_string(),
            ));
        }

        let conversation = self.authorize(user_id, conversation_id).await?;

        self.store
            .create_message(conversation_id, MessageRole::User, text, None)
            .await?;
        if conversation.title.is_none() {
            self.store
                .set_title(conversation_id, &derive_title(text))
                .await?;
        }
        self.store.touch_conversation(conversation_id).await?;

        // Reply id generated ahead of time; the upstream may supersede it.
        let reply_id = Uuid::new_v4();
        match self.upstream.send_message(conversation_id, text).await {
            Ok(Some(upstream_id)) => Ok(upstream_id),
            Ok(None) => Ok(reply_id),
            Err(err) => {
                warn!(%conversation_id, %err, "upstream send failed; deferring reply to stream");
                counter!("lexlink_upstream_failures_total", "operation" => "send").increment(1);
                Ok(reply_id)
            }
        }
    }

    /// Message history for a conversation, oldest first.
    #[instrument(name = "relay.history", skip(self), err)]
    pub async fn history(
        &self,
        user_id: Option<Uuid>,
        conversation_id: Uuid,
        limit: usize,
    ) -> RelayResult<Vec<Message>> {
        self.authorize(user_id, conversation_id).await?;
        let mut messages = self.store.recent_messages(conversation_id, limit).await?;
        messages.reverse();
        Ok(messages)
    }

    /// Stream operation: returns the consumer end of a bounded channel of
    /// JSON payload strings, one per SSE frame. Authorization failures yield
    /// an immediate terminal error frame rather than a silent stream, and
    /// persist nothing.
    pub async fn open_reply_stream(
        &self,
        user_id: Option<Uuid>,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        if let Err(err) = self.authorize(user_id, conversation_id).await {
            let event = StreamEvent::Error {
                error: error_code(&err).to_string(),
                message: err.to_string(),
            };
            let _ = tx.try_send(event.payload(message_id).to_string());
            return rx;
        }

        let relay = self.clone();
        tokio::spawn(async move {
            relay.run_stream(tx, conversation_id, message_id).await;
        });

        rx
    }

    #[instrument(name = "relay.stream", skip(self, tx))]
    async fn run_stream(&self, tx: mpsc::Sender<String>, conversation_id: Uuid, message_id: Uuid) {
        match self.upstream.open_stream(conversation_id).await {
            Ok(response) => {
                self.relay_upstream(tx, conversation_id, message_id, response)
                    .await;
            }
            Err(err) => {
                warn!(%conversation_id, %err, "upstream stream unavailable; using local fallback");
                counter!("lexlink_upstream_failures_total", "operation" => "stream").increment(1);
                self.fallback.run(&tx, conversation_id, message_id).await;
            }
        }
    }

    /// Pass-through over the upstream byte stream. Complete frames are
    /// forwarded as soon as they reassemble; every parseable payload is
    /// inspected for the cumulative `full_response` field, last write wins.
    async fn relay_upstream(
        &self,
        tx: mpsc::Sender<String>,
        conversation_id: Uuid,
        message_id: Uuid,
        response: reqwest::Response,
    ) {
        let mut assembler = FrameAssembler::new();
        let mut full_response: Option<String> = None;
        let mut stream = response.bytes_stream();
        let mut interrupted = false;

        'read: while let Some(next) = stream.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%conversation_id, %err, "upstream stream interrupted");
                    counter!("lexlink_stream_interruptions_total").increment(1);
                    interrupted = true;
                    break;
                }
            };

            for frame in assembler.push(&bytes) {
                let Some(payload) = data_payload(&frame) else {
                    continue; // comment or event-only frame
                };

                match serde_json::from_str::<Value>(&payload) {
                    Ok(value) => {
                        if let Some(text) = value.get("full_response").and_then(Value::as_str) {
                            full_response = Some(text.to_string());
                        }
                    }
                    Err(err) => {
                        // Malformed payloads are skipped, never fatal.
                        debug!(%conversation_id, %err, "skipping unparseable frame payload");
                    }
                }

                if tx.send(payload).await.is_err() {
                    debug!(%conversation_id, "client disconnected; aborting upstream read");
                    break 'read;
                }
            }
        }

        if tx.is_closed() && !interrupted {
            // Dropping the response aborts the upstream read; nothing to
            // persist for a stream the client walked away from.
            return;
        }

        if interrupted {
            let event = StreamEvent::Error {
                error: "upstream_stream_interrupted".to_string(),
                message: STREAM_APOLOGY.to_string(),
            };
            let _ = tx.send(event.payload(message_id).to_string()).await;
            self.persist_reply(conversation_id, message_id, STREAM_APOLOGY)
                .await;
            return;
        }

        match full_response {
            Some(text) => {
                self.persist_reply(conversation_id, message_id, &text).await;
            }
            None => {
                // Upstream ended without ever reporting text. Rather than
                // leave the conversation without an assistant turn, record a
                // placeholder and close the stream with a terminal frame.
                warn!(%conversation_id, "upstream stream ended without content");
                let event = StreamEvent::Complete {
                    full_response: NO_RESPONSE_TEXT.to_string(),
                };
                let _ = tx.send(event.payload(message_id).to_string()).await;
                self.persist_reply(conversation_id, message_id, NO_RESPONSE_TEXT)
                    .await;
            }
        }
    }

    /// Attempted at most once per stream invocation. Failures are logged and
    /// swallowed so the stream always closes cleanly for the client.
    async fn persist_reply(&self, conversation_id: Uuid, message_id: Uuid, content: &str) {
        if let Err(err) = self
            .store
            .create_message(
                conversation_id,
                MessageRole::Assistant,
                content,
                Some(message_id),
            )
            .await
        {
            error!(%conversation_id, %message_id, %err, "failed to persist assistant reply");
            counter!("lexlink_persist_failures_total").increment(1);
            return;
        }
        if let Err(err) = self.store.touch_conversation(conversation_id).await {
            warn!(%conversation_id, %err, "failed to touch conversation after reply");
        }
    }
}

fn error_code(err: &RelayError) -> &'static str {
    match err {
        RelayError::Validation(_) => "validation_failed",
        RelayError::NotFound(_) => "not_found",
        RelayError::Forbidden(_) => "forbidden",
        RelayError::Unauthenticated => "unauthorized",
        RelayError::Storage(_) => "storage_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryConversationStore;
    use shared::config::server::UpstreamConfig;
    use tokio::time::timeout;

    fn unreachable_upstream() -> UpstreamClient {
        // TEST-NET-1 address with a short connect timeout.
        UpstreamClient::new(&UpstreamConfig {
            base_url: "http://192.0.2.1:9".to_string(),
            connect_timeout_ms: 100,
            request_timeout_ms: 200,
        })
        .unwrap()
    }

    fn relay_with(store: Arc<MemoryConversationStore>) -> StreamRelay {
        StreamRelay::new(store, unreachable_upstream(), Duration::ZERO, 16)
    }

    async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<Value> {
        let mut payloads = Vec::new();
        while let Ok(Some(payload)) = timeout(Duration::from_secs(2), rx.recv()).await {
            payloads.push(serde_json::from_str(&payload).unwrap());
        }
        payloads
    }

    #[test]
    fn title_shorter_than_limit_is_verbatim() {
        assert_eq!(derive_title("Short question"), "Short question");
    }

    #[test]
    fn title_at_limit_has_no_ellipsis() {
        let text = "a".repeat(30);
        assert_eq!(derive_title(&text), text);
    }

    #[test]
    fn title_longer_than_limit_is_truncated_with_ellipsis() {
        let text = "What is a non-disclosure agreement used for?";
        let title = derive_title(text);
        assert_eq!(title, format!("{}...", &text[..30]));
        assert_eq!(title.chars().count(), 33);
    }

    #[tokio::test]
    async fn send_persists_user_message_and_derives_title() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();
        let relay = relay_with(store.clone());

        let text = "What is a non-disclosure agreement used for?";
        let message_id = relay.send(Some(user), conversation.id, text).await.unwrap();
        assert!(!message_id.is_nil());

        let messages = store.recent_messages(conversation.id, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, text);

        let reloaded = store
            .find_conversation(conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.title.unwrap(), derive_title(text));
    }

    #[tokio::test]
    async fn send_keeps_existing_title() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store
            .create_conversation(user, Some("My NDA review".to_string()))
            .await
            .unwrap();
        let relay = relay_with(store.clone());

        relay
            .send(Some(user), conversation.id, "follow-up question")
            .await
            .unwrap();

        let reloaded = store
            .find_conversation(conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.title.as_deref(), Some("My NDA review"));
    }

    #[tokio::test]
    async fn send_rejects_empty_message() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();
        let relay = relay_with(store.clone());

        let result = relay.send(Some(user), conversation.id, "   ").await;
        assert!(matches!(result, Err(RelayError::Validation(_))));
    }

    #[tokio::test]
    async fn send_rejects_foreign_conversation_without_persisting() {
        let store = Arc::new(MemoryConversationStore::new());
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let conversation = store.create_conversation(owner, None).await.unwrap();
        let relay = relay_with(store.clone());

        let result = relay.send(Some(intruder), conversation.id, "hello").await;
        assert!(matches!(result, Err(RelayError::Forbidden(_))));

        let messages = store.recent_messages(conversation.id, 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn send_rejects_unknown_conversation() {
        let store = Arc::new(MemoryConversationStore::new());
        let relay = relay_with(store);

        let result = relay
            .send(Some(Uuid::new_v4()), Uuid::new_v4(), "hello")
            .await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn send_rejects_unauthenticated_caller() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();
        let relay = relay_with(store);

        let result = relay.send(None, conversation.id, "hello").await;
        assert!(matches!(result, Err(RelayError::Unauthenticated)));
    }

    #[tokio::test]
    async fn stream_with_unreachable_upstream_falls_back_and_persists() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();
        let relay = relay_with(store.clone());

        let message_id = relay
            .send(Some(user), conversation.id, "What does indemnity mean?")
            .await
            .unwrap();
        let rx = relay
            .open_reply_stream(Some(user), conversation.id, message_id)
            .await;
        let payloads = drain(rx).await;

        assert!(payloads.len() >= 2);
        let terminal = payloads.last().unwrap();
        assert_eq!(terminal["status"], "complete");

        let chunk_count = payloads
            .iter()
            .filter(|payload| payload.get("chunk").is_some())
            .count();
        assert!(chunk_count >= 1);

        // Persisted reply equals the final cumulative text, keyed by the id
        // that Send returned.
        let persisted = store.recent_messages(conversation.id, 1).await.unwrap();
        assert_eq!(persisted[0].id, message_id);
        assert_eq!(persisted[0].role, MessageRole::Assistant);
        assert_eq!(
            persisted[0].content,
            terminal["full_response"].as_str().unwrap()
        );
    }

    #[tokio::test]
    async fn stream_emits_exactly_one_terminal_event() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();
        let relay = relay_with(store.clone());

        let message_id = relay
            .send(Some(user), conversation.id, "hello")
            .await
            .unwrap();
        let rx = relay
            .open_reply_stream(Some(user), conversation.id, message_id)
            .await;
        let payloads = drain(rx).await;

        let terminal_count = payloads
            .iter()
            .filter(|payload| payload.get("status").is_some())
            .count();
        assert_eq!(terminal_count, 1);
        assert!(payloads.last().unwrap().get("status").is_some());
    }

    #[tokio::test]
    async fn stream_for_foreign_conversation_is_one_error_frame() {
        let store = Arc::new(MemoryConversationStore::new());
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let conversation = store.create_conversation(owner, None).await.unwrap();
        let relay = relay_with(store.clone());

        let rx = relay
            .open_reply_stream(Some(intruder), conversation.id, Uuid::new_v4())
            .await;
        let payloads = drain(rx).await;

        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["status"], "error");
        assert_eq!(payloads[0]["error"], "forbidden");

        let messages = store.recent_messages(conversation.id, 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn stream_for_unauthenticated_caller_is_one_error_frame() {
        let store = Arc::new(MemoryConversationStore::new());
        let conversation = store
            .create_conversation(Uuid::new_v4(), None)
            .await
            .unwrap();
        let relay = relay_with(store);

        let rx = relay
            .open_reply_stream(None, conversation.id, Uuid::new_v4())
            .await;
        let payloads = drain(rx).await;

        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["error"], "unauthorized");
    }

    #[tokio::test]
    async fn stream_survives_persistence_failure() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();
        let relay = relay_with(store.clone());

        let message_id = relay
            .send(Some(user), conversation.id, "hello")
            .await
            .unwrap();
        store.set_fail_writes(true);

        let rx = relay
            .open_reply_stream(Some(user), conversation.id, message_id)
            .await;
        let payloads = drain(rx).await;

        // The stream still closes with a terminal event for the client.
        assert_eq!(payloads.last().unwrap()["status"], "complete");
    }

    #[tokio::test]
    async fn history_returns_messages_oldest_first() {
        let store = Arc::new(MemoryConversationStore::new());
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();
        let relay = relay_with(store.clone());

        for content in ["one", "two", "three"] {
            store
                .create_message(conversation.id, MessageRole::User, content, None)
                .await
                .unwrap();
        }

        let history = relay
            .history(Some(user), conversation.id, 10)
            .await
            .unwrap();
        let contents: Vec<&str> = history
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }
}
