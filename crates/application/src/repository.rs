//! 存储端口
//!
//! 核心的每一次变更都必须表达为后端存储上的原子条件操作
//! （条件更新、唯一键插入、条件删除），而不是先读后写：
//! 并发的连接处理器可能在读与写之间交错。复合操作
//! （置顶 + 计数、撤回 + 取消置顶）由实现方保证事务性。

use async_trait::async_trait;
use thiserror::Error;

use domain::{
    CallParticipant, CallRoom, CallRoomId, ConnectionId, ConversationId, MemberPresence, Message,
    MessageId, NotificationAction, PinCounter, Timestamp, UserId, UserProfile,
};

/// 存储层错误
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("资源不存在: {resource}")]
    NotFound { resource: String },
    /// 违反状态约束（例如置顶一条已撤回的消息）
    #[error("状态冲突: {message}")]
    Conflict { message: String },
    /// 后端存储访问失败。操作在任何广播之前中止，记录日志但不自动重试
    #[error("存储访问失败: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        RepositoryError::Conflict {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        RepositoryError::Storage {
            message: message.into(),
        }
    }
}

/// 会话成员存储（外部协作方，核心只读）。
///
/// 返回成员及其当前在线状态，供广播引擎解析投递目标。
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn get_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MemberPresence>, RepositoryError>;
}

/// 置顶操作结果
#[derive(Debug, Clone)]
pub enum PinOutcome {
    /// 置顶成功：标记与计数在一个事务中完成
    Pinned(Message),
    /// 消息已处于置顶状态，幂等无操作
    AlreadyPinned(Message),
    /// 会话计数已达上限，无任何状态变更
    LimitReached { limit: u32 },
}

/// 取消置顶操作结果
#[derive(Debug, Clone)]
pub enum UnpinOutcome {
    Unpinned(Message),
    /// 消息本就未置顶：无操作，计数不会被减到负数
    NotPinned(Message),
}

/// 撤回操作结果
#[derive(Debug, Clone)]
pub struct RecallOutcome {
    pub message: Message,
    /// 撤回前处于置顶状态（撤回已连带取消置顶并递减计数）
    pub was_pinned: bool,
}

/// 消息存储。置顶/撤回是复合原子操作：
/// 实现方必须保证标记位与会话计数要么都变、要么都不变。
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_message(&self, id: MessageId) -> Result<Message, RepositoryError>;

    /// 条件置顶：计数未达上限时置位并递增，否则返回 `LimitReached`
    async fn pin_message(&self, id: MessageId, at: Timestamp)
        -> Result<PinOutcome, RepositoryError>;

    /// 条件取消置顶：仅当标记位确实翻转时递减计数
    async fn unpin_message(&self, id: MessageId) -> Result<UnpinOutcome, RepositoryError>;

    /// 撤回：若处于置顶状态，先取消置顶（含递减），再置撤回标记，
    /// 两步在同一事务内完成——撤回的消息绝不能仍被计为置顶
    async fn recall_message(&self, id: MessageId) -> Result<RecallOutcome, RepositoryError>;

    /// 创建系统通知消息（记录置顶/取消置顶动作）
    async fn create_notification(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        action: NotificationAction,
        at: Timestamp,
    ) -> Result<Message, RepositoryError>;

    async fn pin_counter(
        &self,
        conversation_id: ConversationId,
    ) -> Result<PinCounter, RepositoryError>;
}

/// 加入房间结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// 该连接已登记在某个房间中（唯一键冲突），幂等无操作
    AlreadyJoined,
}

/// 通话房间存储。参与者以连接句柄为唯一键。
#[async_trait]
pub trait CallRoomStore: Send + Sync {
    async fn create_room(&self, room: CallRoom) -> Result<(), RepositoryError>;

    async fn find_room(&self, id: CallRoomId) -> Result<Option<CallRoom>, RepositoryError>;

    /// 唯一键插入：同一连接重复加入返回 `AlreadyJoined`
    async fn insert_participant(
        &self,
        participant: CallParticipant,
    ) -> Result<JoinOutcome, RepositoryError>;

    async fn find_participant(
        &self,
        connection: ConnectionId,
    ) -> Result<Option<CallParticipant>, RepositoryError>;

    async fn room_participants(
        &self,
        room_id: CallRoomId,
    ) -> Result<Vec<CallParticipant>, RepositoryError>;

    /// 条件删除：参与者不存在时返回 `None`（清理路径可安全重放）
    async fn remove_participant(
        &self,
        connection: ConnectionId,
    ) -> Result<Option<CallParticipant>, RepositoryError>;

    /// 实时参与者数，不走缓存计数
    async fn participant_count(&self, room_id: CallRoomId) -> Result<u64, RepositoryError>;

    /// 条件删除房间：仅当参与者集合为空时删除，返回是否删除。
    /// 并发的最后两次离开可以同时调用，只有一方观察到删除。
    async fn delete_room_if_empty(&self, room_id: CallRoomId) -> Result<bool, RepositoryError>;
}

/// 用户档案目录（外部协作方，只读）
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_profile(&self, user_id: UserId) -> Result<UserProfile, RepositoryError>;
}
