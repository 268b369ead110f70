//! 会话成员与置顶计数
//!
//! 会话成员关系的事实来源在外部存储，核心只读取它来解析广播目标。

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConnectionId, ConversationId, UserId};

/// 成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Admin,
}

/// 会话成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMember {
    pub user_id: UserId,
    pub role: MemberRole,
}

/// 广播目标解析视图：成员及其当前在线状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPresence {
    pub user_id: UserId,
    pub is_online: bool,
    pub connection: Option<ConnectionId>,
}

/// 会话置顶计数器。
///
/// 不变式：`number_of_pins` 等于该会话中 `is_pin=true` 的消息数，
/// 且 `0 <= number_of_pins <= pin_limit`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCounter {
    pub conversation_id: ConversationId,
    pub number_of_pins: u32,
    pub pin_limit: u32,
}

impl PinCounter {
    pub fn new(conversation_id: ConversationId, pin_limit: u32) -> Self {
        Self {
            conversation_id,
            number_of_pins: 0,
            pin_limit,
        }
    }

    pub fn can_pin(&self) -> bool {
        self.number_of_pins < self.pin_limit
    }

    /// 记录一次置顶。调用方必须先通过 `can_pin` 检查。
    pub fn record_pin(&mut self) {
        self.number_of_pins += 1;
    }

    /// 记录一次取消置顶，下界为 0。
    pub fn record_unpin(&mut self) {
        self.number_of_pins = self.number_of_pins.saturating_sub(1);
    }
}
