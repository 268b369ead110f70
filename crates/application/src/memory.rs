//! 存储端口的内存实现
//!
//! 用于测试和单进程部署。复合操作（置顶 + 计数、撤回 + 取消置顶）
//! 把全部状态放在同一把锁下，天然满足事务性要求。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::presence::PresenceRegistry;
use crate::repository::{
    CallRoomStore, JoinOutcome, MembershipStore, MessageStore, PinOutcome, RecallOutcome,
    RepositoryError, UnpinOutcome, UserDirectory,
};
use domain::{
    CallParticipant, CallRoom, CallRoomId, ConnectionId, ConversationId, ConversationMember,
    MemberPresence, Message, MessageId, NotificationAction, PinCounter, Timestamp, UserId,
    UserProfile,
};

/// 成员名单 + 在线状态注册表的组合视图。
///
/// 名单本身由外部维护（这里用 seed 注入）；在线状态逐成员
/// 查询注册表，与持久化实现里的表连接等价。
pub struct MemoryMembershipStore {
    members: RwLock<HashMap<ConversationId, Vec<ConversationMember>>>,
    presence: Arc<dyn PresenceRegistry>,
}

impl MemoryMembershipStore {
    pub fn new(presence: Arc<dyn PresenceRegistry>) -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            presence,
        }
    }

    pub async fn seed_conversation(
        &self,
        conversation_id: ConversationId,
        members: Vec<ConversationMember>,
    ) {
        self.members.write().await.insert(conversation_id, members);
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn get_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MemberPresence>, RepositoryError> {
        let members = self
            .members
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();

        let mut resolved = Vec::with_capacity(members.len());
        for member in members {
            let presence = self.presence.lookup(member.user_id).await?;
            let (is_online, connection) = presence
                .map(|p| (p.is_online, p.connection))
                .unwrap_or((false, None));
            resolved.push(MemberPresence {
                user_id: member.user_id,
                is_online,
                connection,
            });
        }
        Ok(resolved)
    }
}

struct MessageState {
    messages: HashMap<MessageId, Message>,
    counters: HashMap<ConversationId, PinCounter>,
}

/// 消息与置顶计数存储
pub struct MemoryMessageStore {
    state: Mutex<MessageState>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MessageState {
                messages: HashMap::new(),
                counters: HashMap::new(),
            }),
        }
    }

    pub async fn seed_counter(&self, counter: PinCounter) {
        self.state
            .lock()
            .await
            .counters
            .insert(counter.conversation_id, counter);
    }

    pub async fn seed_message(&self, message: Message) {
        self.state.lock().await.messages.insert(message.id, message);
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_message(&self, id: MessageId) -> Result<Message, RepositoryError> {
        self.state
            .lock()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("message {id}")))
    }

    async fn pin_message(
        &self,
        id: MessageId,
        at: Timestamp,
    ) -> Result<PinOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        let MessageState {
            messages, counters, ..
        } = &mut *state;

        let message = messages
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(format!("message {id}")))?;
        if message.is_pin {
            return Ok(PinOutcome::AlreadyPinned(message.clone()));
        }

        let counter = counters
            .get_mut(&message.conversation_id)
            .ok_or_else(|| {
                RepositoryError::storage(format!(
                    "missing pin counter for conversation {}",
                    message.conversation_id
                ))
            })?;
        if !counter.can_pin() {
            return Ok(PinOutcome::LimitReached {
                limit: counter.pin_limit,
            });
        }

        message
            .pin(at)
            .map_err(|err| RepositoryError::conflict(err.to_string()))?;
        counter.record_pin();
        Ok(PinOutcome::Pinned(message.clone()))
    }

    async fn unpin_message(&self, id: MessageId) -> Result<UnpinOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        let MessageState {
            messages, counters, ..
        } = &mut *state;

        let message = messages
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(format!("message {id}")))?;
        if !message.is_pin {
            return Ok(UnpinOutcome::NotPinned(message.clone()));
        }

        message.unpin();
        if let Some(counter) = counters.get_mut(&message.conversation_id) {
            counter.record_unpin();
        }
        Ok(UnpinOutcome::Unpinned(message.clone()))
    }

    async fn recall_message(&self, id: MessageId) -> Result<RecallOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        let MessageState {
            messages, counters, ..
        } = &mut *state;

        let message = messages
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(format!("message {id}")))?;

        // 先取消置顶再置撤回标记，两步都在同一把锁下
        let was_pinned = message.is_pin;
        if was_pinned {
            message.unpin();
            if let Some(counter) = counters.get_mut(&message.conversation_id) {
                counter.record_unpin();
            }
        }
        message.recall();
        Ok(RecallOutcome {
            message: message.clone(),
            was_pinned,
        })
    }

    async fn create_notification(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        action: NotificationAction,
        at: Timestamp,
    ) -> Result<Message, RepositoryError> {
        let message =
            Message::notification(MessageId::generate(), conversation_id, sender_id, action, at);
        self.state
            .lock()
            .await
            .messages
            .insert(message.id, message.clone());
        Ok(message)
    }

    async fn pin_counter(
        &self,
        conversation_id: ConversationId,
    ) -> Result<PinCounter, RepositoryError> {
        self.state
            .lock()
            .await
            .counters
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("conversation {conversation_id}")))
    }
}

struct CallState {
    rooms: HashMap<CallRoomId, CallRoom>,
    participants: HashMap<ConnectionId, CallParticipant>,
}

/// 通话房间存储
pub struct MemoryCallRoomStore {
    state: Mutex<CallState>,
}

impl Default for MemoryCallRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCallRoomStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CallState {
                rooms: HashMap::new(),
                participants: HashMap::new(),
            }),
        }
    }

    pub async fn room_exists(&self, room_id: CallRoomId) -> bool {
        self.state.lock().await.rooms.contains_key(&room_id)
    }
}

#[async_trait]
impl CallRoomStore for MemoryCallRoomStore {
    async fn create_room(&self, room: CallRoom) -> Result<(), RepositoryError> {
        self.state.lock().await.rooms.insert(room.id, room);
        Ok(())
    }

    async fn find_room(&self, id: CallRoomId) -> Result<Option<CallRoom>, RepositoryError> {
        Ok(self.state.lock().await.rooms.get(&id).cloned())
    }

    async fn insert_participant(
        &self,
        participant: CallParticipant,
    ) -> Result<JoinOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.participants.contains_key(&participant.connection) {
            return Ok(JoinOutcome::AlreadyJoined);
        }
        if !state.rooms.contains_key(&participant.room_id) {
            return Err(RepositoryError::not_found(format!(
                "call room {}",
                participant.room_id
            )));
        }
        state
            .participants
            .insert(participant.connection, participant);
        Ok(JoinOutcome::Joined)
    }

    async fn find_participant(
        &self,
        connection: ConnectionId,
    ) -> Result<Option<CallParticipant>, RepositoryError> {
        Ok(self.state.lock().await.participants.get(&connection).cloned())
    }

    async fn room_participants(
        &self,
        room_id: CallRoomId,
    ) -> Result<Vec<CallParticipant>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .participants
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn remove_participant(
        &self,
        connection: ConnectionId,
    ) -> Result<Option<CallParticipant>, RepositoryError> {
        Ok(self.state.lock().await.participants.remove(&connection))
    }

    async fn participant_count(&self, room_id: CallRoomId) -> Result<u64, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .participants
            .values()
            .filter(|p| p.room_id == room_id)
            .count() as u64)
    }

    async fn delete_room_if_empty(&self, room_id: CallRoomId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let empty = !state.participants.values().any(|p| p.room_id == room_id);
        if empty {
            return Ok(state.rooms.remove(&room_id).is_some());
        }
        Ok(false)
    }
}

/// 用户档案目录
#[derive(Default)]
pub struct MemoryUserDirectory {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_profile(&self, profile: UserProfile) {
        self.profiles.write().await.insert(profile.id, profile);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_profile(&self, user_id: UserId) -> Result<UserProfile, RepositoryError> {
        self.profiles
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("user {user_id}")))
    }
}

/// 测试辅助
pub mod testing {
    use super::*;
    use crate::fanout::{Broadcaster, DeliveryError};
    use domain::ServerEvent;
    use std::collections::HashSet;

    /// 记录投递的广播器测试替身。
    /// `close` 过的连接返回 [`DeliveryError::Closed`]，模拟被拆除的连接。
    #[derive(Default)]
    pub struct RecordingBroadcaster {
        sent: Mutex<Vec<(ConnectionId, ServerEvent)>>,
        closed: Mutex<HashSet<ConnectionId>>,
    }

    impl RecordingBroadcaster {
        pub async fn close(&self, connection: ConnectionId) {
            self.closed.lock().await.insert(connection);
        }

        /// 投往指定连接的事件，按投递顺序
        pub async fn sent_to(&self, connection: ConnectionId) -> Vec<ServerEvent> {
            self.sent
                .lock()
                .await
                .iter()
                .filter(|(conn, _)| *conn == connection)
                .map(|(_, event)| event.clone())
                .collect()
        }

        pub async fn total_deliveries(&self) -> usize {
            self.sent.lock().await.len()
        }
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn deliver(
            &self,
            connection: ConnectionId,
            event: &ServerEvent,
        ) -> Result<(), DeliveryError> {
            if self.closed.lock().await.contains(&connection) {
                return Err(DeliveryError::Closed);
            }
            self.sent.lock().await.push((connection, event.clone()));
            Ok(())
        }
    }
}
