//! Message Store: the external collaborator the core treats as a black box
//! transactional store of chats, messages, and their timestamps.
//!
//! Grounded on the teacher's `db/connection.rs` (pool management,
//! migrations, health check) and `db/repositories/session_repo.rs`
//! (static-method repository shape, `query_as` row mapping). The core only
//! calls the four operations spec.md §1 names: append user message, append
//! assistant message, update chat last-activity, load conversation history
//! — plus the supplemented chat-meta-info and MCP-server reads from
//! SPEC_FULL.md §B.

pub mod chat_repository;
pub mod mcp_repository;
pub mod message_repository;
pub mod models;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::StoreResult;
use chat_repository::ChatRepository;
use mcp_repository::McpRepository;
use message_repository::MessageRepository;
use models::{Chat, McpServer, Message};

/// Type alias for the connection pool, matching the teacher's
/// `DatabasePool` alias.
pub type DatabasePool = SqlitePool;

/// Handle to the persisted chats/messages/mcp_servers tables.
#[derive(Clone)]
pub struct MessageStore {
    pool: DatabasePool,
}

impl MessageStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn get_chat(&self, chat_id: &str) -> StoreResult<Option<Chat>> {
        ChatRepository::get(&self.pool, chat_id).await
    }

    /// Append a user turn. Sets the chat's title to the first 50 characters
    /// of `content` (plus an ellipsis if truncated) when this is the first
    /// message in the chat (SPEC_FULL.md §B.3).
    pub async fn append_user_message(&self, chat_id: &str, content: &str) -> StoreResult<Message> {
        let is_first = MessageRepository::count_for_chat(&self.pool, chat_id).await? == 0;
        if is_first {
            ChatRepository::set_title(&self.pool, chat_id, &truncate_title(content)).await?;
        }
        MessageRepository::insert(&self.pool, chat_id, "user", content).await
    }

    /// Append the assistant's turn — called on both normal completion and
    /// on user-initiated cancellation (the partial-content case), never
    /// distinguished at the row level (spec.md §9, Open Questions).
    pub async fn append_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> StoreResult<Message> {
        MessageRepository::insert(&self.pool, chat_id, "assistant", content).await
    }

    pub async fn touch_chat_activity(&self, chat_id: &str) -> StoreResult<()> {
        ChatRepository::touch_updated_at(&self.pool, chat_id).await
    }

    /// Append to the chat's meta_info string with a "\n\n" separator, or
    /// overwrite it if currently empty (§4.3 step 4).
    pub async fn append_chat_meta_info(&self, chat_id: &str, info: &str) -> StoreResult<()> {
        ChatRepository::append_meta_info(&self.pool, chat_id, info).await
    }

    pub async fn load_history(&self, chat_id: &str) -> StoreResult<Vec<Message>> {
        MessageRepository::list_for_chat(&self.pool, chat_id).await
    }

    pub async fn list_enabled_mcp_servers(&self, user_id: &str) -> StoreResult<Vec<McpServer>> {
        McpRepository::list_enabled_for_user(&self.pool, user_id).await
    }
}

fn truncate_title(content: &str) -> String {
    const MAX: usize = 50;
    let char_count = content.chars().count();
    if char_count <= MAX {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(MAX).collect();
        format!("{truncated}...")
    }
}
