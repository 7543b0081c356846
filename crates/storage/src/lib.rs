use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tmpa_core::ConversationState;

/// Slots of one conversation plus bookkeeping the store needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConversation {
    pub conversation_id: String,
    pub state: ConversationState,
    pub updated_at: DateTime<Utc>,
}

impl StoredConversation {
    pub fn fresh(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            state: ConversationState::default(),
            updated_at: Utc::now(),
        }
    }
}

pub trait SlotRepository: Send + Sync {
    async fn load_state(&self, conversation_id: &str) -> Result<Option<StoredConversation>>;
    async fn save_state(&self, conversation: &StoredConversation) -> Result<()>;
    /// Drops conversations untouched since `before`; returns how many.
    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    conversations: Arc<RwLock<HashMap<String, StoredConversation>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }
}

impl SlotRepository for MemoryStore {
    async fn load_state(&self, conversation_id: &str) -> Result<Option<StoredConversation>> {
        Ok(self.conversations.read().get(conversation_id).cloned())
    }

    async fn save_state(&self, conversation: &StoredConversation) -> Result<()> {
        self.conversations
            .write()
            .insert(conversation.conversation_id.clone(), conversation.clone());
        Ok(())
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0_u64;
        self.conversations.write().retain(|_, value| {
            let keep = value.updated_at >= before;
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_slots (
              conversation_id TEXT PRIMARY KEY,
              lang TEXT NOT NULL,
              active_flow TEXT,
              step_index INTEGER NOT NULL DEFAULT 0,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed creating conversation_slots table")?;

        Ok(())
    }
}

impl SlotRepository for SqliteStore {
    async fn load_state(&self, conversation_id: &str) -> Result<Option<StoredConversation>> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, lang, active_flow, step_index, updated_at
            FROM conversation_slots
            WHERE conversation_id = ?1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let step_index: i64 = row.get("step_index");
        let conversation = StoredConversation {
            conversation_id: row.get("conversation_id"),
            state: ConversationState {
                active_flow: row.get("active_flow"),
                step_index: usize::try_from(step_index).unwrap_or_default(),
                lang: row.get("lang"),
            },
            updated_at: row
                .get::<String, _>("updated_at")
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        };

        Ok(Some(conversation))
    }

    async fn save_state(&self, conversation: &StoredConversation) -> Result<()> {
        let step_index = i64::try_from(conversation.state.step_index)
            .context("step index does not fit in sqlite integer")?;

        sqlx::query(
            r#"
            INSERT INTO conversation_slots (conversation_id, lang, active_flow, step_index, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(conversation_id) DO UPDATE SET
              lang=excluded.lang,
              active_flow=excluded.active_flow,
              step_index=excluded.step_index,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(&conversation.conversation_id)
        .bind(&conversation.state.lang)
        .bind(&conversation.state.active_flow)
        .bind(step_index)
        .bind(timestamp(conversation.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_slots WHERE updated_at < ?1")
            .bind(timestamp(before))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Fixed-width UTC timestamps so the text column sorts chronologically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl SlotRepository for Store {
    async fn load_state(&self, conversation_id: &str) -> Result<Option<StoredConversation>> {
        match self {
            Store::Memory(store) => store.load_state(conversation_id).await,
            Store::Sqlite(store) => store.load_state(conversation_id).await,
        }
    }

    async fn save_state(&self, conversation: &StoredConversation) -> Result<()> {
        match self {
            Store::Memory(store) => store.save_state(conversation).await,
            Store::Sqlite(store) => store.save_state(conversation).await,
        }
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64> {
        match self {
            Store::Memory(store) => store.purge_idle(before).await,
            Store::Sqlite(store) => store.purge_idle(before).await,
        }
    }
}
