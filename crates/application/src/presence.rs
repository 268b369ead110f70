//! 在线状态注册表
//!
//! 用户身份到当前连接句柄的映射。register 与 clear 必须互为原子：
//! 针对过期句柄的 clear 绝不能清掉同一用户已在新句柄下重新注册的
//! 在线状态——靠「当前句柄等于待清除句柄」的条件更新保证，
//! 而不是粗粒度锁。

use async_trait::async_trait;

use crate::repository::RepositoryError;
use domain::{ConnectionId, UserId, UserPresence};

#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 上线登记：幂等 upsert。同一用户带新句柄重复登记时，
    /// 旧句柄被直接取代（last-writer-wins），不触发任何事件。
    async fn register_connection(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<(), RepositoryError>;

    /// 清除连接：将绑定该句柄的在线状态置为离线并记录最后在线时间。
    /// 无匹配记录时是无操作——断开可能与新句柄下的重连竞争。
    async fn clear_connection(&self, connection: ConnectionId) -> Result<(), RepositoryError>;

    async fn lookup(&self, user_id: UserId) -> Result<Option<UserPresence>, RepositoryError>;
}

/// 内存实现（用于测试与单进程部署）
pub mod memory {
    use super::*;
    use crate::clock::Clock;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// 单把写锁覆盖整张表，使 register 与 clear 相互原子。
    pub struct MemoryPresenceRegistry {
        records: RwLock<HashMap<UserId, UserPresence>>,
        clock: Arc<dyn Clock>,
    }

    impl MemoryPresenceRegistry {
        pub fn new(clock: Arc<dyn Clock>) -> Self {
            Self {
                records: RwLock::new(HashMap::new()),
                clock,
            }
        }
    }

    #[async_trait]
    impl PresenceRegistry for MemoryPresenceRegistry {
        async fn register_connection(
            &self,
            user_id: UserId,
            connection: ConnectionId,
        ) -> Result<(), RepositoryError> {
            let mut records = self.records.write().await;
            let presence = records
                .entry(user_id)
                .or_insert_with(|| UserPresence::offline(user_id));
            presence.connect(connection);
            tracing::debug!(user_id = %user_id, connection = %connection, "用户上线登记");
            Ok(())
        }

        async fn clear_connection(&self, connection: ConnectionId) -> Result<(), RepositoryError> {
            let now = self.clock.now();
            let mut records = self.records.write().await;
            for presence in records.values_mut() {
                // 条件更新：只清除仍绑定在该句柄上的记录
                if presence.disconnect_if_current(connection, now) {
                    tracing::debug!(
                        user_id = %presence.user_id,
                        connection = %connection,
                        "用户离线"
                    );
                }
            }
            Ok(())
        }

        async fn lookup(&self, user_id: UserId) -> Result<Option<UserPresence>, RepositoryError> {
            let records = self.records.read().await;
            Ok(records.get(&user_id).cloned())
        }
    }
}
