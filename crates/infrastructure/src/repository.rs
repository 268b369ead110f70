//! 存储端口的 PostgreSQL 实现。
//!
//! 复合操作（置顶 + 计数、撤回 + 取消置顶）映射为单个事务内的
//! 条件 UPDATE；加入房间映射为唯一键插入（`ON CONFLICT DO NOTHING`）；
//! 删除空房间映射为带 `NOT EXISTS` 谓词的条件 DELETE。
//! 并发正确性由数据库保证，代码里没有先读后写的窗口。

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use application::{
    CallRoomStore, JoinOutcome, MembershipStore, MessageStore, PinOutcome, RecallOutcome,
    RepositoryError, UnpinOutcome, UserDirectory,
};
use domain::{
    CallParticipant, CallRoom, CallRoomId, CallType, ConnectionId, ConversationId, MemberPresence,
    Message, MessageId, MessageKind, NotificationAction, PinCounter, Timestamp, UserId,
    UserProfile,
};

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

/// 全部 Pg 适配器的聚合，按连接池一次性构建。
pub struct PgStorage {
    pub membership: PgMembershipStore,
    pub messages: PgMessageStore,
    pub rooms: PgCallRoomStore,
    pub users: PgUserDirectory,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            membership: PgMembershipStore::new(pool.clone()),
            messages: PgMessageStore::new(pool.clone()),
            rooms: PgCallRoomStore::new(pool.clone()),
            users: PgUserDirectory::new(pool),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    kind: String,
    content: Option<String>,
    notification_action: Option<String>,
    is_pin: bool,
    pinned_at: Option<Timestamp>,
    recalled: bool,
    created_at: Timestamp,
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, kind, content, \
     notification_action, is_pin, pinned_at, recalled, created_at";

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let kind = match value.kind.as_str() {
            "text" => MessageKind::Text,
            "notification" => MessageKind::Notification,
            other => return Err(invalid_data(format!("unknown message kind: {other}"))),
        };
        let notification_action = match value.notification_action.as_deref() {
            None => None,
            Some("pin") => Some(NotificationAction::Pin),
            Some("unPin") => Some(NotificationAction::UnPin),
            Some(other) => {
                return Err(invalid_data(format!("unknown notification action: {other}")))
            }
        };

        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            kind,
            content: value.content,
            notification_action,
            is_pin: value.is_pin,
            pinned_at: value.pinned_at,
            recalled: value.recalled,
            created_at: value.created_at,
        })
    }
}

fn notification_action_str(action: NotificationAction) -> &'static str {
    match action {
        NotificationAction::Pin => "pin",
        NotificationAction::UnPin => "unPin",
    }
}

/// 会话成员 + 在线状态的连接查询。
#[derive(Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRecord {
    user_id: Uuid,
    is_online: bool,
    socket_id: Option<Uuid>,
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn get_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MemberPresence>, RepositoryError> {
        let records = sqlx::query_as::<_, MemberRecord>(
            r#"
            SELECT m.user_id, u.is_online, u.socket_id
            FROM conversation_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.conversation_id = $1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records
            .into_iter()
            .map(|record| MemberPresence {
                user_id: UserId::from(record.user_id),
                is_online: record.is_online,
                connection: record.socket_id.map(ConnectionId::from),
            })
            .collect())
    }
}

/// 消息与置顶计数存储。
///
/// 计数列挂在 conversations 行上，递增走条件 UPDATE：
/// `WHERE id = $1 AND number_of_pins < pin_limit`，0 行命中即达上限。
/// 行锁保证并发置顶串行通过该检查。
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_message(
        tx: &mut Transaction<'_, Postgres>,
        id: MessageId,
    ) -> Result<MessageRecord, RepositoryError> {
        sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 FOR UPDATE"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| RepositoryError::not_found(format!("message {id}")))
    }

    /// 仅当标记位确实翻转时递减计数，下界为 0。
    async fn unpin_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: MessageId,
        conversation_id: ConversationId,
    ) -> Result<Message, RepositoryError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET number_of_pins = GREATEST(number_of_pins - 1, 0)
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET is_pin = FALSE, pinned_at = NULL \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_message(&self, id: MessageId) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| RepositoryError::not_found(format!("message {id}")))?;

        Message::try_from(record)
    }

    async fn pin_message(
        &self,
        id: MessageId,
        at: Timestamp,
    ) -> Result<PinOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = Self::lock_message(&mut tx, id).await?;
        if record.is_pin {
            return Ok(PinOutcome::AlreadyPinned(Message::try_from(record)?));
        }
        if record.recalled {
            return Err(RepositoryError::conflict(format!(
                "recalled message {id} cannot be pinned"
            )));
        }
        let conversation_id = record.conversation_id;

        // 条件递增：0 行命中即计数已达上限，事务随 drop 回滚
        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET number_of_pins = number_of_pins + 1
            WHERE id = $1 AND number_of_pins < pin_limit
            "#,
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if updated.rows_affected() == 0 {
            let limit: i32 = sqlx::query_scalar("SELECT pin_limit FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            return Ok(PinOutcome::LimitReached {
                limit: limit as u32,
            });
        }

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET is_pin = TRUE, pinned_at = $2 \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(PinOutcome::Pinned(Message::try_from(record)?))
    }

    async fn unpin_message(&self, id: MessageId) -> Result<UnpinOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = Self::lock_message(&mut tx, id).await?;
        if !record.is_pin {
            return Ok(UnpinOutcome::NotPinned(Message::try_from(record)?));
        }

        let conversation_id = ConversationId::from(record.conversation_id);
        let message = Self::unpin_in_tx(&mut tx, id, conversation_id).await?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(UnpinOutcome::Unpinned(message))
    }

    async fn recall_message(&self, id: MessageId) -> Result<RecallOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = Self::lock_message(&mut tx, id).await?;
        let was_pinned = record.is_pin;
        let conversation_id = ConversationId::from(record.conversation_id);

        // 先脱离置顶状态（含递减），再置撤回标记，同一事务
        if was_pinned {
            Self::unpin_in_tx(&mut tx, id, conversation_id).await?;
        }

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET recalled = TRUE \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(RecallOutcome {
            message: Message::try_from(record)?,
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
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO messages \
             (id, conversation_id, sender_id, kind, notification_action, created_at) \
             VALUES ($1, $2, $3, 'notification', $4, $5) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(sender_id))
        .bind(notification_action_str(action))
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn pin_counter(
        &self,
        conversation_id: ConversationId,
    ) -> Result<PinCounter, RepositoryError> {
        let record = sqlx::query_as::<_, (i32, i32)>(
            "SELECT number_of_pins, pin_limit FROM conversations WHERE id = $1",
        )
        .bind(Uuid::from(conversation_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| RepositoryError::not_found(format!("conversation {conversation_id}")))?;

        Ok(PinCounter {
            conversation_id,
            number_of_pins: record.0 as u32,
            pin_limit: record.1 as u32,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoomRecord {
    id: Uuid,
    conversation_id: Uuid,
    host_id: Uuid,
    call_type: String,
    created_at: Timestamp,
}

impl TryFrom<RoomRecord> for CallRoom {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let call_type = match value.call_type.as_str() {
            "video" => CallType::Video,
            "voice" => CallType::Voice,
            other => return Err(invalid_data(format!("unknown call type: {other}"))),
        };
        Ok(CallRoom {
            id: CallRoomId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            host_id: UserId::from(value.host_id),
            call_type,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ParticipantRecord {
    socket_id: Uuid,
    room_id: Uuid,
    user_id: Uuid,
    joined_at: Timestamp,
}

impl From<ParticipantRecord> for CallParticipant {
    fn from(value: ParticipantRecord) -> Self {
        CallParticipant {
            connection: ConnectionId::from(value.socket_id),
            room_id: CallRoomId::from(value.room_id),
            user_id: UserId::from(value.user_id),
            joined_at: value.joined_at,
        }
    }
}

/// 通话房间存储。参与者表以 socket_id 为主键。
#[derive(Clone)]
pub struct PgCallRoomStore {
    pool: PgPool,
}

impl PgCallRoomStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallRoomStore for PgCallRoomStore {
    async fn create_room(&self, room: CallRoom) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO call_rooms (id, conversation_id, host_id, call_type, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(room.id))
        .bind(Uuid::from(room.conversation_id))
        .bind(Uuid::from(room.host_id))
        .bind(match room.call_type {
            CallType::Video => "video",
            CallType::Voice => "voice",
        })
        .bind(room.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_room(&self, id: CallRoomId) -> Result<Option<CallRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            "SELECT id, conversation_id, host_id, call_type, created_at \
             FROM call_rooms WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(CallRoom::try_from).transpose()
    }

    async fn insert_participant(
        &self,
        participant: CallParticipant,
    ) -> Result<JoinOutcome, RepositoryError> {
        // 唯一键插入：同一连接重复加入命中 0 行
        let result = sqlx::query(
            r#"
            INSERT INTO call_participants (socket_id, room_id, user_id, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (socket_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(participant.connection))
        .bind(Uuid::from(participant.room_id))
        .bind(Uuid::from(participant.user_id))
        .bind(participant.joined_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            Ok(JoinOutcome::AlreadyJoined)
        } else {
            Ok(JoinOutcome::Joined)
        }
    }

    async fn find_participant(
        &self,
        connection: ConnectionId,
    ) -> Result<Option<CallParticipant>, RepositoryError> {
        let record = sqlx::query_as::<_, ParticipantRecord>(
            "SELECT socket_id, room_id, user_id, joined_at \
             FROM call_participants WHERE socket_id = $1",
        )
        .bind(Uuid::from(connection))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(CallParticipant::from))
    }

    async fn room_participants(
        &self,
        room_id: CallRoomId,
    ) -> Result<Vec<CallParticipant>, RepositoryError> {
        let records = sqlx::query_as::<_, ParticipantRecord>(
            "SELECT socket_id, room_id, user_id, joined_at \
             FROM call_participants WHERE room_id = $1 ORDER BY joined_at",
        )
        .bind(Uuid::from(room_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(CallParticipant::from).collect())
    }

    async fn remove_participant(
        &self,
        connection: ConnectionId,
    ) -> Result<Option<CallParticipant>, RepositoryError> {
        // 条件删除 + RETURNING：不存在即 None，清理路径可安全重放
        let record = sqlx::query_as::<_, ParticipantRecord>(
            "DELETE FROM call_participants WHERE socket_id = $1 \
             RETURNING socket_id, room_id, user_id, joined_at",
        )
        .bind(Uuid::from(connection))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(CallParticipant::from))
    }

    async fn participant_count(&self, room_id: CallRoomId) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM call_participants WHERE room_id = $1")
                .bind(Uuid::from(room_id))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn delete_room_if_empty(&self, room_id: CallRoomId) -> Result<bool, RepositoryError> {
        // 条件删除：并发的最后两次离开只有一方命中
        let result = sqlx::query(
            r#"
            DELETE FROM call_rooms
            WHERE id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM call_participants WHERE room_id = $1
              )
            "#,
        )
        .bind(Uuid::from(room_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }
}

/// 用户档案目录（只读投影）。
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_profile(&self, user_id: UserId) -> Result<UserProfile, RepositoryError> {
        let record = sqlx::query_as::<_, (Uuid, String, Option<String>)>(
            "SELECT id, name, avatar_url FROM users WHERE id = $1",
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| RepositoryError::not_found(format!("user {user_id}")))?;

        Ok(UserProfile {
            id: UserId::from(record.0),
            name: record.1,
            avatar_url: record.2,
        })
    }
}
