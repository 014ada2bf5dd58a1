//! Schema bootstrap executed at startup.
//!
//! The DDL is idempotent; running it against an already bootstrapped
//! database is a no-op.

use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[(&str, &str)] = &[
    ("schema", "CREATE SCHEMA IF NOT EXISTS lexlink"),
    (
        "conversations",
        r#"
        CREATE TABLE IF NOT EXISTS lexlink.conversations (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            title TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "messages",
        r#"
        CREATE TABLE IF NOT EXISTS lexlink.messages (
            id UUID PRIMARY KEY,
            conversation_id UUID NOT NULL
                REFERENCES lexlink.conversations (id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "messages_by_conversation",
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
            ON lexlink.messages (conversation_id, created_at)
        "#,
    ),
    (
        "conversations_by_user",
        r#"
        CREATE INDEX IF NOT EXISTS idx_conversations_user_updated
            ON lexlink.conversations (user_id, updated_at DESC)
        "#,
    ),
];

/// Apply the schema, one statement per transaction.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (label, sql) in STATEMENTS {
        info!(statement = label, "applying schema bootstrap");
        let mut transaction = pool.begin().await?;
        sqlx::query(sql).execute(&mut *transaction).await?;
        transaction.commit().await?;
    }
    Ok(())
}

/// Simple liveness check used during startup.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Readiness probe that expects the bootstrapped tables to exist.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), sqlx::Error> {
    let exists: Option<String> =
        sqlx::query_scalar("SELECT to_regclass('lexlink.messages')::text")
            .fetch_one(pool)
            .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(sqlx::Error::RowNotFound),
    }
}
