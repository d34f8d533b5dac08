//! Chat row access: lookup, title, meta_info, and last-activity mutation.
//!
//! Static-method repository shape grounded on `db/repositories/session_repo.rs`.

use chrono::Utc;

use crate::error::StoreResult;
use crate::store::models::Chat;
use crate::store::DatabasePool;

pub struct ChatRepository;

impl ChatRepository {
    pub async fn get(pool: &DatabasePool, chat_id: &str) -> StoreResult<Option<Chat>> {
        let chat = sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(pool)
            .await?;
        Ok(chat)
    }

    pub async fn set_title(pool: &DatabasePool, chat_id: &str, title: &str) -> StoreResult<()> {
        sqlx::query("UPDATE chats SET title = ? WHERE id = ?")
            .bind(title)
            .bind(chat_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn touch_updated_at(pool: &DatabasePool, chat_id: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(chat_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Append to `meta_info` with a "\n\n" separator, or overwrite if it is
    /// currently empty.
    pub async fn append_meta_info(pool: &DatabasePool, chat_id: &str, info: &str) -> StoreResult<()> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT meta_info FROM chats WHERE id = ?")
                .bind(chat_id)
                .fetch_optional(pool)
                .await?;
        let updated = match existing {
            Some((current,)) if !current.is_empty() => format!("{current}\n\n{info}"),
            _ => info.to_string(),
        };
        sqlx::query("UPDATE chats SET meta_info = ? WHERE id = ?")
            .bind(&updated)
            .bind(chat_id)
            .execute(pool)
            .await?;
        Ok(())
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
    async fn get_missing_chat_is_none() {
        let pool = setup().await;
        assert!(ChatRepository::get(&pool, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn meta_info_overwrites_when_empty() {
        let pool = setup().await;
        ChatRepository::append_meta_info(&pool, "c1", "first").await.unwrap();
        let chat = ChatRepository::get(&pool, "c1").await.unwrap().unwrap();
        assert_eq!(chat.meta_info, "first");
    }

    #[tokio::test]
    async fn touch_updated_at_changes_timestamp() {
        let pool = setup().await;
        let before = ChatRepository::get(&pool, "c1").await.unwrap().unwrap().updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        ChatRepository::touch_updated_at(&pool, "c1").await.unwrap();
        let after = ChatRepository::get(&pool, "c1").await.unwrap().unwrap().updated_at;
        assert_ne!(before, after);
    }
}
