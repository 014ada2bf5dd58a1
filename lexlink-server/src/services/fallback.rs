//! Local fallback reply generator.
//!
//! When the upstream inference service is unreachable the relay still owes
//! the client a streamed reply. This generator synthesizes an apology that
//! echoes the client's question, delivers it paragraph by paragraph with a
//! short pacing delay, and persists the final text like any other reply.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use shared::models::{MessageRole, StreamEvent};
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use super::store::ConversationStore;

/// Substituted into the template when the conversation holds no prior
/// user message to echo.
const GENERIC_QUESTION: &str = "your recent question";

#[derive(Clone)]
pub struct FallbackGenerator {
    store: Arc<dyn ConversationStore>,
    paragraph_delay: Duration,
}

impl FallbackGenerator {
    pub fn new(store: Arc<dyn ConversationStore>, paragraph_delay: Duration) -> Self {
        Self {
            store,
            paragraph_delay,
        }
    }

    /// Streams the synthetic reply into `tx` as JSON payload strings and
    /// persists the final text keyed by `message_id`. The pacing delay is a
    /// UX device only; a closed channel (client gone) stops emission early
    /// but the reply is still persisted.
    pub async fn run(&self, tx: &mpsc::Sender<String>, conversation_id: Uuid, message_id: Uuid) {
        counter!("lexlink_fallback_streams_total").increment(1);

        let question = self.latest_user_question(conversation_id).await;
        let paragraphs = Self::compose(&question);

        let mut full_response = String::new();
        let mut client_gone = false;
        for (index, paragraph) in paragraphs.iter().enumerate() {
            if index > 0 {
                if !self.paragraph_delay.is_zero() {
                    tokio::time::sleep(self.paragraph_delay).await;
                }
                full_response.push_str("\n\n");
            }
            full_response.push_str(paragraph);

            if client_gone {
                continue;
            }
            let event = StreamEvent::Chunk {
                chunk: paragraph.clone(),
                full_response: full_response.clone(),
            };
            if tx
                .send(event.payload(message_id).to_string())
                .await
                .is_err()
            {
                warn!(%conversation_id, "client disconnected during fallback stream");
                client_gone = true;
            }
        }

        if !client_gone {
            let complete = StreamEvent::Complete {
                full_response: full_response.clone(),
            };
            let _ = tx.send(complete.payload(message_id).to_string()).await;
        }

        // Best-effort durability: the stream already succeeded from the
        // client's viewpoint, so a persistence failure is only logged.
        if let Err(err) = self
            .store
            .create_message(
                conversation_id,
                MessageRole::Assistant,
                &full_response,
                Some(message_id),
            )
            .await
        {
            error!(%conversation_id, %message_id, %err, "failed to persist fallback reply");
            counter!("lexlink_persist_failures_total").increment(1);
            return;
        }
        if let Err(err) = self.store.touch_conversation(conversation_id).await {
            warn!(%conversation_id, %err, "failed to touch conversation after fallback");
        }
    }

    async fn latest_user_question(&self, conversation_id: Uuid) -> String {
        match self.store.recent_messages(conversation_id, 20).await {
            Ok(messages) => messages
                .into_iter()
                .find(|message| message.role == MessageRole::User)
                .map_or_else(|| GENERIC_QUESTION.to_string(), |message| message.content),
            Err(err) => {
                warn!(%conversation_id, %err, "failed to load prior messages for fallback");
                GENERIC_QUESTION.to_string()
            }
        }
    }

    fn compose(question: &str) -> Vec<String> {
        vec![
            "I'm sorry, but I wasn't able to reach the legal research service \
             to answer you right away."
                .to_string(),
            format!(
                "Your question was: \"{question}\". I have kept it in this \
                 conversation so nothing is lost."
            ),
            "Please try sending your message again in a few moments. If the \
             problem persists, LexLink support can connect you with a lawyer \
             directly."
                .to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryConversationStore;
    use serde_json::Value;
    use tokio::time::timeout;

    async fn collect_payloads(mut rx: mpsc::Receiver<String>) -> Vec<Value> {
        let mut payloads = Vec::new();
        while let Ok(Some(payload)) = timeout(Duration::from_secs(1), rx.recv()).await {
            payloads.push(serde_json::from_str(&payload).unwrap());
        }
        payloads
    }

    #[tokio::test]
    async fn emits_chunks_then_complete_and_persists() {
        let store = Arc::new(MemoryConversationStore::new());
        let conversation = store
            .create_conversation(Uuid::new_v4(), None)
            .await
            .unwrap();
        store
            .create_message(
                conversation.id,
                MessageRole::User,
                "Can my landlord raise rent mid-lease?",
                None,
            )
            .await
            .unwrap();

        let generator = FallbackGenerator::new(store.clone(), Duration::ZERO);
        let message_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(16);
        generator.run(&tx, conversation.id, message_id).await;
        drop(tx);

        let payloads = collect_payloads(rx).await;
        assert!(payloads.len() >= 2, "expected chunks plus a terminal event");

        let chunks = &payloads[..payloads.len() - 1];
        for chunk in chunks {
            assert!(chunk.get("chunk").is_some());
            assert!(chunk.get("status").is_none());
        }
        let terminal = payloads.last().unwrap();
        assert_eq!(terminal["status"], "complete");
        assert!(
            terminal["full_response"]
                .as_str()
                .unwrap()
                .contains("Can my landlord raise rent mid-lease?")
        );

        let persisted = store.recent_messages(conversation.id, 1).await.unwrap();
        assert_eq!(persisted[0].id, message_id);
        assert_eq!(persisted[0].role, MessageRole::Assistant);
        assert_eq!(
            persisted[0].content,
            terminal["full_response"].as_str().unwrap()
        );
    }

    #[tokio::test]
    async fn cumulative_text_grows_monotonically() {
        let store = Arc::new(MemoryConversationStore::new());
        let conversation = store
            .create_conversation(Uuid::new_v4(), None)
            .await
            .unwrap();

        let generator = FallbackGenerator::new(store.clone(), Duration::ZERO);
        let (tx, rx) = mpsc::channel(16);
        generator.run(&tx, conversation.id, Uuid::new_v4()).await;
        drop(tx);

        let payloads = collect_payloads(rx).await;
        let mut previous_len = 0;
        for payload in &payloads {
            let full = payload["full_response"].as_str().unwrap();
            assert!(full.len() >= previous_len);
            previous_len = full.len();
        }
    }

    #[tokio::test]
    async fn uses_generic_placeholder_without_prior_question() {
        let store = Arc::new(MemoryConversationStore::new());
        let conversation = store
            .create_conversation(Uuid::new_v4(), None)
            .await
            .unwrap();

        let generator = FallbackGenerator::new(store.clone(), Duration::ZERO);
        let (tx, rx) = mpsc::channel(16);
        generator.run(&tx, conversation.id, Uuid::new_v4()).await;
        drop(tx);

        let payloads = collect_payloads(rx).await;
        let terminal = payloads.last().unwrap();
        assert!(
            terminal["full_response"]
                .as_str()
                .unwrap()
                .contains(GENERIC_QUESTION)
        );
    }

    #[tokio::test]
    async fn persistence_failure_does_not_break_the_stream() {
        let store = Arc::new(MemoryConversationStore::new());
        let conversation = store
            .create_conversation(Uuid::new_v4(), None)
            .await
            .unwrap();
        store.set_fail_writes(true);

        let generator = FallbackGenerator::new(store.clone(), Duration::ZERO);
        let (tx, rx) = mpsc::channel(16);
        generator.run(&tx, conversation.id, Uuid::new_v4()).await;
        drop(tx);

        let payloads = collect_payloads(rx).await;
        assert_eq!(payloads.last().unwrap()["status"], "complete");
    }
}
