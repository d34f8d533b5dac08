//! MCP server row access — read-only list of a user's enabled servers,
//! passed through to the upstream agent request (SPEC_FULL.md §B.2). Wiring
//! the tool itself is out of scope.

use crate::error::StoreResult;
use crate::store::models::McpServer;
use crate::store::DatabasePool;

pub struct McpRepository;

impl McpRepository {
    pub async fn list_enabled_for_user(
        pool: &DatabasePool,
        user_id: &str,
    ) -> StoreResult<Vec<McpServer>> {
        let servers = sqlx::query_as::<_, McpServer>(
            "SELECT * FROM mcp_servers WHERE user_id = ? AND enabled = 1 ORDER BY name ASC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(servers)
    }
}
