//! 消息实体（置顶相关投影）

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 消息类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    /// 系统通知消息：记录置顶/取消置顶等动作，展示在会话时间线上
    Notification,
}

/// 通知消息对应的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationAction {
    Pin,
    UnPin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub notification_action: Option<NotificationAction>,
    pub is_pin: bool,
    pub pinned_at: Option<Timestamp>,
    pub recalled: bool,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new_text(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            kind: MessageKind::Text,
            content: Some(content.into()),
            notification_action: None,
            is_pin: false,
            pinned_at: None,
            recalled: false,
            created_at,
        }
    }

    /// 构造系统通知消息
    pub fn notification(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        action: NotificationAction,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            kind: MessageKind::Notification,
            content: None,
            notification_action: Some(action),
            is_pin: false,
            pinned_at: None,
            recalled: false,
            created_at,
        }
    }

    /// 置顶。不变式：已撤回的消息不能置顶。
    pub fn pin(&mut self, at: Timestamp) -> Result<(), DomainError> {
        if self.recalled {
            return Err(DomainError::business_rule_violation(
                "recalled message cannot be pinned",
            ));
        }
        self.is_pin = true;
        self.pinned_at = Some(at);
        Ok(())
    }

    /// 取消置顶。对未置顶的消息是无操作。
    pub fn unpin(&mut self) {
        self.is_pin = false;
        self.pinned_at = None;
    }

    /// 撤回。撤回的消息必须先脱离置顶状态，由调用方保证顺序。
    pub fn recall(&mut self) {
        debug_assert!(!self.is_pin, "recall must run after unpin");
        self.recalled = true;
    }
}
