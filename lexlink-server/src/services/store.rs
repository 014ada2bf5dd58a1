//! Persistence gateway for conversations and messages.
//!
//! The relay core only talks to the [`ConversationStore`] trait; it never
//! performs joins or business queries beyond these primitives. The Postgres
//! implementation is constructed once at startup and injected, the in-memory
//! implementation backs tests and database-less development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Conversation, Message, MessageRole, Timestamp};
use sqlx::PgPool;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations the relay core depends on.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
    ) -> StoreResult<Conversation>;

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    async fn list_conversations(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>>;

    /// Persists a message. `id` lets the caller key the row with a
    /// pre-allocated identifier; a fresh one is generated when absent.
    async fn create_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        id: Option<Uuid>,
    ) -> StoreResult<Message>;

    /// Most recent messages first, at most `limit` of them.
    async fn recent_messages(&self, conversation_id: Uuid, limit: usize)
    -> StoreResult<Vec<Message>>;

    async fn set_title(&self, conversation_id: Uuid, title: &str) -> StoreResult<()>;

    /// Bumps the conversation's `updated_at` to now.
    async fn touch_conversation(&self, conversation_id: Uuid) -> StoreResult<()>;

    async fn healthcheck(&self) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    user_id: Uuid,
    title: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            created_at: Timestamp(row.created_at),
            updated_at: Timestamp(row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let role = MessageRole::try_from(row.role.as_str()).unwrap_or(MessageRole::User);
        Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            created_at: Timestamp(row.created_at),
        }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
    ) -> StoreResult<Conversation> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "INSERT INTO lexlink.conversations (id, user_id, title) \
             VALUES ($1, $2, $3) \
             RETURNING id, user_id, title, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM lexlink.conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Conversation::from))
    }

    async fn list_conversations(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM lexlink.conversations WHERE user_id = $1 \
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        id: Option<Uuid>,
    ) -> StoreResult<Message> {
        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO lexlink.messages (id, conversation_id, role, content) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, conversation_id, role, content, created_at",
        )
        .bind(id.unwrap_or_else(Uuid::new_v4))
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation_id, role, content, created_at \
             FROM lexlink.messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn set_title(&self, conversation_id: Uuid, title: &str) -> StoreResult<()> {
        sqlx::query("UPDATE lexlink.conversations SET title = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE lexlink.conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn healthcheck(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Conversation store backed by process memory. Used by tests and when the
/// server runs without a configured database.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    messages: RwLock<Vec<Message>>,
    fail_writes: AtomicBool,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, to exercise the swallowed
    /// persistence-error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("write failure injected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
    ) -> StoreResult<Conversation> {
        self.check_writable()?;
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id,
            title,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        };
        self.conversations
            .write()
            .await
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn list_conversations(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .read()
            .await
            .values()
            .filter(|conversation| conversation.user_id == user_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        id: Option<Uuid>,
    ) -> StoreResult<Message> {
        self.check_writable()?;
        if !self
            .conversations
            .read()
            .await
            .contains_key(&conversation_id)
        {
            return Err(StoreError::NotFound(format!(
                "conversation {conversation_id} not found"
            )));
        }

        let message = Message {
            id: id.unwrap_or_else(Uuid::new_v4),
            conversation_id,
            role,
            content: content.to_string(),
            created_at: Timestamp::now(),
        };
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|message| message.conversation_id == conversation_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_title(&self, conversation_id: Uuid, title: &str) -> StoreResult<()> {
        self.check_writable()?;
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(&conversation_id).ok_or_else(|| {
            StoreError::NotFound(format!("conversation {conversation_id} not found"))
        })?;
        conversation.title = Some(title.to_string());
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> StoreResult<()> {
        self.check_writable()?;
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(&conversation_id).ok_or_else(|| {
            StoreError::NotFound(format!("conversation {conversation_id} not found"))
        })?;
        conversation.updated_at = Timestamp::now();
        Ok(())
    }

    async fn healthcheck(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_orders_recent_messages_newest_first() {
        let store = MemoryConversationStore::new();
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();

        for content in ["first", "second", "third"] {
            store
                .create_message(conversation.id, MessageRole::User, content, None)
                .await
                .unwrap();
        }

        let recent = store.recent_messages(conversation.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "third");
        assert_eq!(recent[1].content, "second");
    }

    #[tokio::test]
    async fn memory_store_rejects_messages_for_unknown_conversation() {
        let store = MemoryConversationStore::new();
        let result = store
            .create_message(Uuid::new_v4(), MessageRole::User, "hello", None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn memory_store_set_title_and_touch() {
        let store = MemoryConversationStore::new();
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();

        store
            .set_title(conversation.id, "Employment question")
            .await
            .unwrap();
        store.touch_conversation(conversation.id).await.unwrap();

        let reloaded = store
            .find_conversation(conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.title.as_deref(), Some("Employment question"));
        assert!(reloaded.updated_at >= conversation.updated_at);
    }

    #[tokio::test]
    async fn memory_store_write_failure_injection() {
        let store = MemoryConversationStore::new();
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();

        store.set_fail_writes(true);
        let result = store
            .create_message(conversation.id, MessageRole::User, "hello", None)
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        store.set_fail_writes(false);
        assert!(
            store
                .create_message(conversation.id, MessageRole::User, "hello", None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn memory_store_preallocated_message_id_is_kept() {
        let store = MemoryConversationStore::new();
        let user = Uuid::new_v4();
        let conversation = store.create_conversation(user, None).await.unwrap();

        let id = Uuid::new_v4();
        let message = store
            .create_message(conversation.id, MessageRole::Assistant, "reply", Some(id))
            .await
            .unwrap();
        assert_eq!(message.id, id);
    }
}
