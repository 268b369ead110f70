//! 在线状态注册表的 PostgreSQL 实现。
//!
//! register 是对用户行的无条件 upsert；clear 是以句柄为条件的
//! 更新（`WHERE socket_id = $1`）：过期句柄的迟到断开匹配不到
//! 任何行，天然不会清掉新句柄下的在线状态。

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use application::{PresenceRegistry, RepositoryError};
use domain::{ConnectionId, UserId, UserPresence};

use crate::repository::map_sqlx_err;

#[derive(Clone)]
pub struct PgPresenceRegistry {
    pool: PgPool,
}

impl PgPresenceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PresenceRegistry for PgPresenceRegistry {
    async fn register_connection(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET socket_id = $2, is_online = TRUE
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(Uuid::from(connection))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(format!("user {user_id}")));
        }
        tracing::debug!(user_id = %user_id, connection = %connection, "用户上线登记");
        Ok(())
    }

    async fn clear_connection(&self, connection: ConnectionId) -> Result<(), RepositoryError> {
        // 条件更新：只命中仍绑定在该句柄上的行，无匹配即无操作
        let result = sqlx::query(
            r#"
            UPDATE users
            SET socket_id = NULL, is_online = FALSE, last_online_at = NOW()
            WHERE socket_id = $1
            "#,
        )
        .bind(Uuid::from(connection))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() > 0 {
            tracing::debug!(connection = %connection, "用户离线");
        }
        Ok(())
    }

    async fn lookup(&self, user_id: UserId) -> Result<Option<UserPresence>, RepositoryError> {
        let record = sqlx::query_as::<_, PresenceRecord>(
            r#"
            SELECT id, socket_id, is_online, last_online_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(UserPresence::from))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PresenceRecord {
    id: Uuid,
    socket_id: Option<Uuid>,
    is_online: bool,
    last_online_at: Option<domain::Timestamp>,
}

impl From<PresenceRecord> for UserPresence {
    fn from(value: PresenceRecord) -> Self {
        UserPresence {
            user_id: UserId::from(value.id),
            connection: value.socket_id.map(ConnectionId::from),
            is_online: value.is_online,
            last_online_at: value.last_online_at,
        }
    }
}
