//! 实时事件目录
//!
//! 核心组件产出抽象的广播意图（会话 + 事件），由唯一的传输适配器
//! 负责真正的套接字发送，领域层不反向依赖传输层。
//!
//! 线格式与客户端约定保持一致：`{"event": "...", "data": {...}}`，
//! 事件名沿用 socket.io 目录的驼峰命名。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::CallType;
use crate::message::Message;
use crate::user::UserProfile;
use crate::value_objects::{CallRoomId, ConnectionId};

/// 服务端出站事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// 房间创建成功，发给发起通话的连接
    RoomCreated {
        room_id: CallRoomId,
        call_type: CallType,
    },
    /// 通话邀请，发给会话中其他在线成员
    InviteCall {
        room_id: CallRoomId,
        from: UserProfile,
        call_type: CallType,
    },
    /// 参与者加入房间，发给房间内其他参与者
    UserJoined {
        connection: ConnectionId,
        user: UserProfile,
    },
    /// 参与者离开房间，发给剩余参与者
    UserLeft { user: UserProfile },
    /// WebRTC offer 信令转发。payload 对本系统不透明，原样传递
    Offer {
        signal: Value,
        connection: ConnectionId,
        sender: UserProfile,
    },
    /// WebRTC answer 信令转发
    Answer {
        signal: Value,
        connection: ConnectionId,
        sender: UserProfile,
    },
    /// 新消息（含系统通知消息）
    NewMessage { message: Message },
    /// 消息被置顶
    PinMessage { message: Message },
    /// 消息被取消置顶
    UnPinMessage { message: Message },
    /// 消息被撤回
    RecallMessage { message: Message },
    /// 会话列表变更信号：客户端据此重新拉取摘要，
    /// 避免为每个可能变化的字段定义增量事件
    ReloadConversationList,
    /// 仅发给请求方的错误反馈
    Error { message: String },
}

impl ServerEvent {
    /// 事件的线名称
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::RoomCreated { .. } => "roomCreated",
            ServerEvent::InviteCall { .. } => "inviteCall",
            ServerEvent::UserJoined { .. } => "userJoined",
            ServerEvent::UserLeft { .. } => "userLeft",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::NewMessage { .. } => "newMessage",
            ServerEvent::PinMessage { .. } => "pinMessage",
            ServerEvent::UnPinMessage { .. } => "unPinMessage",
            ServerEvent::RecallMessage { .. } => "recallMessage",
            ServerEvent::ReloadConversationList => "reloadConversationList",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}
