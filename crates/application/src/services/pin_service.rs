//! 置顶状态协调器
//!
//! 维护会话的有界置顶计数不变式：任何可观察的静止点上，
//! `number_of_pins` 等于 `is_pin=true` 的消息数且不超过 `pin_limit`。
//! 条件置顶/撤回由存储层以原子复合操作实现，这里负责编排
//! 通知消息的创建与广播。广播只在状态变更提交之后发生。

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::fanout::FanoutEngine;
use crate::repository::{MessageStore, PinOutcome, UnpinOutcome};
use domain::{MessageId, NotificationAction, ServerEvent, UserId};

pub struct PinServiceDependencies {
    pub message_store: Arc<dyn MessageStore>,
    pub fanout: Arc<FanoutEngine>,
    pub clock: Arc<dyn Clock>,
}

pub struct PinService {
    message_store: Arc<dyn MessageStore>,
    fanout: Arc<FanoutEngine>,
    clock: Arc<dyn Clock>,
}

impl PinService {
    pub fn new(deps: PinServiceDependencies) -> Self {
        Self {
            message_store: deps.message_store,
            fanout: deps.fanout,
            clock: deps.clock,
        }
    }

    /// 置顶一条消息。
    ///
    /// 计数达到上限时返回 [`ApplicationError::PinLimitExceeded`]，
    /// 无任何状态变更；错误只反馈给请求方，不广播。
    /// 成功后创建系统通知消息，并把通知与置顶事件一起
    /// 广播给会话的在线成员。
    pub async fn pin(&self, message_id: MessageId, sender: UserId) -> Result<(), ApplicationError> {
        match self
            .message_store
            .pin_message(message_id, self.clock.now())
            .await?
        {
            PinOutcome::LimitReached { limit } => {
                tracing::info!(message_id = %message_id, limit, "置顶数量已达上限");
                Err(ApplicationError::PinLimitExceeded { limit })
            }
            PinOutcome::AlreadyPinned(_) => {
                // 重复置顶是幂等无操作，不再广播
                tracing::debug!(message_id = %message_id, "消息已处于置顶状态");
                Ok(())
            }
            PinOutcome::Pinned(message) => {
                let conversation_id = message.conversation_id;
                let notification = self
                    .message_store
                    .create_notification(
                        conversation_id,
                        sender,
                        NotificationAction::Pin,
                        self.clock.now(),
                    )
                    .await?;

                let report = self
                    .fanout
                    .broadcast_mutation(
                        conversation_id,
                        vec![
                            ServerEvent::NewMessage {
                                message: notification,
                            },
                            ServerEvent::PinMessage { message },
                        ],
                    )
                    .await?;
                tracing::info!(
                    message_id = %message_id,
                    conversation_id = %conversation_id,
                    delivered = report.delivered,
                    "消息已置顶"
                );
                Ok(())
            }
        }
    }

    /// 取消置顶。对未置顶的消息是无操作，计数不会降到 0 以下。
    pub async fn unpin(
        &self,
        message_id: MessageId,
        sender: UserId,
    ) -> Result<(), ApplicationError> {
        match self.message_store.unpin_message(message_id).await? {
            UnpinOutcome::NotPinned(_) => {
                tracing::debug!(message_id = %message_id, "消息本就未置顶");
                Ok(())
            }
            UnpinOutcome::Unpinned(message) => {
                let conversation_id = message.conversation_id;
                let notification = self
                    .message_store
                    .create_notification(
                        conversation_id,
                        sender,
                        NotificationAction::UnPin,
                        self.clock.now(),
                    )
                    .await?;

                self.fanout
                    .broadcast_mutation(
                        conversation_id,
                        vec![
                            ServerEvent::NewMessage {
                                message: notification,
                            },
                            ServerEvent::UnPinMessage { message },
                        ],
                    )
                    .await?;
                tracing::info!(message_id = %message_id, "消息已取消置顶");
                Ok(())
            }
        }
    }

    /// 撤回一条消息。
    ///
    /// 若消息处于置顶状态，存储层先走取消置顶路径（含计数递减）
    /// 再置撤回标记，两步在同一事务内——撤回的消息绝不能仍被
    /// 计为置顶，也不允许半途失败留下不变式破坏。
    pub async fn recall(&self, message_id: MessageId) -> Result<(), ApplicationError> {
        let outcome = self.message_store.recall_message(message_id).await?;
        if outcome.was_pinned {
            tracing::debug!(message_id = %message_id, "撤回连带取消置顶");
        }

        self.fanout
            .broadcast_mutation(
                outcome.message.conversation_id,
                vec![ServerEvent::RecallMessage {
                    message: outcome.message.clone(),
                }],
            )
            .await?;
        tracing::info!(message_id = %message_id, "消息已撤回");
        Ok(())
    }
}
