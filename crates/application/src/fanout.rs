//! 广播引擎
//!
//! 把「会话 + 事件」解析为一组活跃连接并做尽力而为的投递。
//! 领域服务只产出广播意图；真正的套接字发送由唯一实现
//! [`Broadcaster`] 的传输适配器完成，依赖关系是单向的。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ApplicationError;
use crate::repository::MembershipStore;
use domain::{ConnectionId, ConversationId, ServerEvent};

/// 单个接收者的投递错误
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 连接已被拆除。广播路径上按无操作处理
    #[error("连接已关闭")]
    Closed,
    #[error("投递失败: {0}")]
    Failed(String),
}

/// 窄投递能力接口。
///
/// 传输层有且只有一个实现（socket 注册表），按需注入到各服务，
/// 取代在构造函数间穿透的具体传输对象。
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// 向单个连接投递一个事件。同一连接上的投递保持调用顺序。
    async fn deliver(
        &self,
        connection: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), DeliveryError>;
}

/// 一次广播的逐接收者结果汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// 完整收到全部事件的接收者数
    pub delivered: usize,
    /// 投递中途失败的接收者数（彼此隔离，不向调用方传播）
    pub failed: usize,
    /// 离线被跳过的成员数（不排队、不重试，靠单独的读路径补齐）
    pub offline: usize,
}

/// 广播引擎
pub struct FanoutEngine {
    membership: Arc<dyn MembershipStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl FanoutEngine {
    pub fn new(membership: Arc<dyn MembershipStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            membership,
            broadcaster,
        }
    }

    /// 向会话的全部在线成员投递一批事件。
    ///
    /// 同一接收者按事件的排列顺序收到它们；跨接收者不保证顺序。
    /// 单个接收者的失败只记入报告，不影响其余接收者，也不作为
    /// 错误抛给调用方。成员解析失败则整个操作在任何投递前中止。
    pub async fn broadcast(
        &self,
        conversation_id: ConversationId,
        events: &[ServerEvent],
    ) -> Result<FanoutReport, ApplicationError> {
        let members = self.membership.get_members(conversation_id).await?;

        let mut report = FanoutReport::default();
        for member in &members {
            let connection = match member.connection {
                Some(connection) if member.is_online => connection,
                _ => {
                    report.offline += 1;
                    continue;
                }
            };

            let mut ok = true;
            for event in events {
                if let Err(err) = self.broadcaster.deliver(connection, event).await {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        user_id = %member.user_id,
                        connection = %connection,
                        event = event.event_name(),
                        error = %err,
                        "广播投递失败，跳过该接收者"
                    );
                    ok = false;
                    break;
                }
            }
            if ok {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            delivered = report.delivered,
            failed = report.failed,
            offline = report.offline,
            "广播完成"
        );
        Ok(report)
    }

    /// 广播一次会话变更：在事件之后追加列表变更信号，
    /// 客户端据此重新拉取会话摘要。
    pub async fn broadcast_mutation(
        &self,
        conversation_id: ConversationId,
        mut events: Vec<ServerEvent>,
    ) -> Result<FanoutReport, ApplicationError> {
        events.push(ServerEvent::ReloadConversationList);
        self.broadcast(conversation_id, &events).await
    }

    /// 向单个连接投递（请求方反馈、房间内定向发送）。
    /// 尽力而为：连接失效只留日志。
    pub async fn deliver_to(&self, connection: ConnectionId, event: &ServerEvent) {
        if let Err(err) = self.broadcaster.deliver(connection, event).await {
            tracing::warn!(
                connection = %connection,
                event = event.event_name(),
                error = %err,
                "定向投递失败"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::RecordingBroadcaster;
    use domain::{MemberPresence, UserId};
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct StaticMembership {
        members: RwLock<HashMap<ConversationId, Vec<MemberPresence>>>,
    }

    #[async_trait]
    impl MembershipStore for StaticMembership {
        async fn get_members(
            &self,
            conversation_id: ConversationId,
        ) -> Result<Vec<MemberPresence>, crate::repository::RepositoryError> {
            Ok(self
                .members
                .read()
                .await
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn online(user_id: UserId, connection: ConnectionId) -> MemberPresence {
        MemberPresence {
            user_id,
            is_online: true,
            connection: Some(connection),
        }
    }

    fn offline(user_id: UserId) -> MemberPresence {
        MemberPresence {
            user_id,
            is_online: false,
            connection: None,
        }
    }

    #[tokio::test]
    async fn broadcast_skips_offline_members() {
        let conversation = ConversationId::generate();
        let conn_a = ConnectionId::generate();
        let conn_b = ConnectionId::generate();

        let membership = Arc::new(StaticMembership {
            members: RwLock::new(HashMap::from([(
                conversation,
                vec![
                    online(UserId::generate(), conn_a),
                    online(UserId::generate(), conn_b),
                    offline(UserId::generate()),
                ],
            )])),
        });
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let engine = FanoutEngine::new(membership, broadcaster.clone());

        let report = engine
            .broadcast(conversation, &[ServerEvent::ReloadConversationList])
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.offline, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(broadcaster.sent_to(conn_a).await.len(), 1);
        assert_eq!(broadcaster.sent_to(conn_b).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_recipient_is_isolated() {
        let conversation = ConversationId::generate();
        let dead = ConnectionId::generate();
        let alive = ConnectionId::generate();

        let membership = Arc::new(StaticMembership {
            members: RwLock::new(HashMap::from([(
                conversation,
                vec![
                    online(UserId::generate(), dead),
                    online(UserId::generate(), alive),
                ],
            )])),
        });
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        broadcaster.close(dead).await;
        let engine = FanoutEngine::new(membership, broadcaster.clone());

        let report = engine
            .broadcast(conversation, &[ServerEvent::ReloadConversationList])
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(broadcaster.sent_to(alive).await.len(), 1);
    }

    #[tokio::test]
    async fn mutation_appends_reload_signal() {
        let conversation = ConversationId::generate();
        let conn = ConnectionId::generate();
        let membership = Arc::new(StaticMembership {
            members: RwLock::new(HashMap::from([(
                conversation,
                vec![online(UserId::generate(), conn)],
            )])),
        });
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let engine = FanoutEngine::new(membership, broadcaster.clone());

        engine
            .broadcast_mutation(conversation, vec![ServerEvent::error("x")])
            .await
            .unwrap();

        let events = broadcaster.sent_to(conn).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], ServerEvent::ReloadConversationList);
    }
}
