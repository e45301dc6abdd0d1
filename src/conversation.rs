//! Per-conversation transcript persistence.
//!
//! A conversation is keyed by a 64-bit integer id. A conversation with no
//! stored row reads as an empty transcript, and writes are upserts, so
//! there is never more than one row per id.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Storage backend for conversation transcripts.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Stored transcript, or `""` if the conversation has none.
    async fn get_transcript(&self, conversation_id: i64) -> Result<String>;

    /// Replace the transcript, creating the conversation if needed.
    async fn set_transcript(&self, conversation_id: i64, transcript: &str) -> Result<()>;

    /// Reset the transcript to empty. Idempotent.
    async fn clear_transcript(&self, conversation_id: i64) -> Result<()> {
        self.set_transcript(conversation_id, "").await
    }
}

/// SQLite-backed store. Survives restarts.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Connect to the configured database and ensure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get_transcript(&self, conversation_id: i64) -> Result<String> {
        let transcript: Option<String> =
            sqlx::query_scalar("SELECT transcript FROM conversations WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(transcript.unwrap_or_default())
    }

    async fn set_transcript(&self, conversation_id: i64, transcript: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, transcript, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                transcript = excluded.transcript,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(transcript)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Process-local store for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryConversationStore {
    transcripts: RwLock<HashMap<i64, String>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_transcript(&self, conversation_id: i64) -> Result<String> {
        let transcripts = self
            .transcripts
            .read()
            .map_err(|_| anyhow!("conversation store lock poisoned"))?;
        Ok(transcripts
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_transcript(&self, conversation_id: i64, transcript: &str) -> Result<()> {
        let mut transcripts = self
            .transcripts
            .write()
            .map_err(|_| anyhow!("conversation store lock poisoned"))?;
        transcripts.insert(conversation_id, transcript.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite_store(tmp: &TempDir) -> SqliteConversationStore {
        let mut config = Config::default();
        config.db.url = format!("sqlite://{}", tmp.path().join("conv.sqlite").display());
        SqliteConversationStore::open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        assert_eq!(store.get_transcript(42).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_set_then_get_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        store.set_transcript(7, "User: a\nAssistant: b").await.unwrap();
        store.set_transcript(7, "User: c\nAssistant: d").await.unwrap();
        assert_eq!(
            store.get_transcript(7).await.unwrap(),
            "User: c\nAssistant: d"
        );

        let rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE conversation_id = 7")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent_and_isolated() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        store.set_transcript(1, "User: one").await.unwrap();
        store.set_transcript(2, "User: two").await.unwrap();

        store.clear_transcript(1).await.unwrap();
        store.clear_transcript(1).await.unwrap();
        store.clear_transcript(99).await.unwrap();

        assert_eq!(store.get_transcript(1).await.unwrap(), "");
        assert_eq!(store.get_transcript(2).await.unwrap(), "User: two");
        assert_eq!(store.get_transcript(99).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_transcript_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = sqlite_store(&tmp).await;
            store.set_transcript(-5, "User: hi\nAssistant: hello").await.unwrap();
            store.pool().close().await;
        }
        let store = sqlite_store(&tmp).await;
        assert_eq!(
            store.get_transcript(-5).await.unwrap(),
            "User: hi\nAssistant: hello"
        );
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryConversationStore::new();
        assert_eq!(store.get_transcript(1).await.unwrap(), "");
        store.set_transcript(1, "User: x").await.unwrap();
        assert_eq!(store.get_transcript(1).await.unwrap(), "User: x");
        store.clear_transcript(1).await.unwrap();
        assert_eq!(store.get_transcript(1).await.unwrap(), "");
    }
}
