//! 通话房间与参与者
//!
//! 房间是临时的信令会话：`start_call` 创建，最后一个参与者离开时删除。
//! 状态机：Created → Active → Empty → Deleted（记录被移除）。

use serde::{Deserialize, Serialize};

use crate::value_objects::{CallRoomId, ConnectionId, ConversationId, Timestamp, UserId};

/// 通话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Video,
    Voice,
}

/// 通话房间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRoom {
    pub id: CallRoomId,
    pub conversation_id: ConversationId,
    pub host_id: UserId,
    pub call_type: CallType,
    pub created_at: Timestamp,
}

impl CallRoom {
    pub fn new(
        id: CallRoomId,
        conversation_id: ConversationId,
        host_id: UserId,
        call_type: CallType,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            host_id,
            call_type,
            created_at,
        }
    }
}

/// 通话参与者，以连接句柄为唯一键：
/// 一条连接同一时刻至多属于一个房间。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParticipant {
    pub connection: ConnectionId,
    pub room_id: CallRoomId,
    pub user_id: UserId,
    pub joined_at: Timestamp,
}

/// 房间生命周期状态，由实时参与者数推导。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRoomState {
    /// 房间刚创建，仅主持人在场
    Created,
    /// 至少两名参与者
    Active,
    /// 参与者数归零，等待删除
    Empty,
}

impl CallRoomState {
    pub fn from_participant_count(count: u64) -> Self {
        match count {
            0 => CallRoomState::Empty,
            1 => CallRoomState::Created,
            _ => CallRoomState::Active,
        }
    }
}
