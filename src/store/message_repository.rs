//! Message row access: insert and load conversation history.

use chrono::Utc;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::store::models::Message;
use crate::store::DatabasePool;

pub struct MessageRepository;

impl MessageRepository {
    pub async fn insert(
        pool: &DatabasePool,
        chat_id: &str,
        role: &str,
        content: &str,
    ) -> StoreResult<Message> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, chat_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(chat_id)
        .bind(role)
        .bind(content)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(message)
    }

    pub async fn list_for_chat(pool: &DatabasePool, chat_id: &str) -> StoreResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE chat_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(chat_id)
        .fetch_all(pool)
        .await?;
        Ok(messages)
    }

    pub async fn count_for_chat(pool: &DatabasePool, chat_id: &str) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePool;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        sqlx::query("INSERT INTO users (id, email, created_at) VALUES ('u1', 'u1@example.com', '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO chats (id, user_id, title, meta_info, created_at, updated_at) VALUES ('c1', 'u1', '', '', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn insert_and_list_roundtrip() {
        let pool = setup().await;
        MessageRepository::insert(&pool, "c1", "user", "hi").await.unwrap();
        MessageRepository::insert(&pool, "c1", "assistant", "hello").await.unwrap();
        let messages = MessageRepository::list_for_chat(&pool, "c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].content, "hello");
    }

    #[tokio::test]
    async fn count_reflects_inserts() {
        let pool = setup().await;
        assert_eq!(MessageRepository::count_for_chat(&pool, "c1").await.unwrap(), 0);
        MessageRepository::insert(&pool, "c1", "user", "hi").await.unwrap();
        assert_eq!(MessageRepository::count_for_chat(&pool, "c1").await.unwrap(), 1);
    }
}
