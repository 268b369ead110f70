//! 通话会话管理器
//!
//! 独立于消息流的临时信令房间状态机：
//! `Created`（仅主持人）→ `Active`（≥2 人）→ `Empty`（0 人）→
//! `Deleted`（记录删除）。断开与显式离开可能竞争或重复，
//! 因此所有清理操作对已消失的房间/参与者都是无操作。

use std::sync::Arc;

use serde_json::Value;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::fanout::FanoutEngine;
use crate::repository::{CallRoomStore, JoinOutcome, MembershipStore, UserDirectory};
use domain::{
    CallParticipant, CallRoom, CallRoomId, CallRoomState, CallType, ConnectionId, ConversationId,
    ServerEvent, UserId,
};

/// 转发的信令类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
}

pub struct CallServiceDependencies {
    pub rooms: Arc<dyn CallRoomStore>,
    pub membership: Arc<dyn MembershipStore>,
    pub users: Arc<dyn UserDirectory>,
    pub fanout: Arc<FanoutEngine>,
    pub clock: Arc<dyn Clock>,
}

pub struct CallService {
    rooms: Arc<dyn CallRoomStore>,
    membership: Arc<dyn MembershipStore>,
    users: Arc<dyn UserDirectory>,
    fanout: Arc<FanoutEngine>,
    clock: Arc<dyn Clock>,
}

impl CallService {
    pub fn new(deps: CallServiceDependencies) -> Self {
        Self {
            rooms: deps.rooms,
            membership: deps.membership,
            users: deps.users,
            fanout: deps.fanout,
            clock: deps.clock,
        }
    }

    /// 发起通话：创建房间，向发起连接回发 `roomCreated`，
    /// 并向会话中其他**在线**成员逐个发送 `inviteCall`。
    /// 离线成员收不到任何东西——邀请不排队。
    pub async fn start_call(
        &self,
        conversation_id: ConversationId,
        host: UserId,
        call_type: CallType,
        origin: ConnectionId,
    ) -> Result<CallRoom, ApplicationError> {
        let room = CallRoom::new(
            CallRoomId::generate(),
            conversation_id,
            host,
            call_type,
            self.clock.now(),
        );
        self.rooms.create_room(room.clone()).await?;

        self.fanout
            .deliver_to(
                origin,
                &ServerEvent::RoomCreated {
                    room_id: room.id,
                    call_type,
                },
            )
            .await;

        let from = self.users.get_profile(host).await?;
        let members = self.membership.get_members(conversation_id).await?;

        let mut invited = 0usize;
        for member in members {
            if member.user_id == host {
                continue;
            }
            let connection = match member.connection {
                Some(connection) if member.is_online => connection,
                _ => continue,
            };
            self.fanout
                .deliver_to(
                    connection,
                    &ServerEvent::InviteCall {
                        room_id: room.id,
                        from: from.clone(),
                        call_type,
                    },
                )
                .await;
            invited += 1;
        }

        tracing::info!(
            room_id = %room.id,
            conversation_id = %conversation_id,
            host = %host,
            invited,
            "通话房间已创建"
        );
        Ok(room)
    }

    /// 加入房间：以连接句柄为键登记参与者（同一连接重复加入是
    /// 幂等无操作），并向房间内其他参与者广播 `userJoined`
    /// ——只发房间内，不发整个会话。
    pub async fn join_room(
        &self,
        room_id: CallRoomId,
        user: UserId,
        connection: ConnectionId,
    ) -> Result<(), ApplicationError> {
        let Some(room) = self.rooms.find_room(room_id).await? else {
            // 邀请可能与房间拆除竞争，加入已消失的房间按无操作处理
            tracing::warn!(room_id = %room_id, "加入的房间已不存在");
            return Ok(());
        };

        let profile = self.users.get_profile(user).await?;
        let participant = CallParticipant {
            connection,
            room_id: room.id,
            user_id: user,
            joined_at: self.clock.now(),
        };
        if self.rooms.insert_participant(participant).await? == JoinOutcome::AlreadyJoined {
            tracing::debug!(connection = %connection, room_id = %room_id, "重复加入，忽略");
            return Ok(());
        }

        let event = ServerEvent::UserJoined {
            connection,
            user: profile,
        };
        for other in self.rooms.room_participants(room.id).await? {
            if other.connection != connection {
                self.fanout.deliver_to(other.connection, &event).await;
            }
        }

        tracing::info!(room_id = %room_id, user = %user, "参与者加入房间");
        Ok(())
    }

    /// 转发 WebRTC 信令。
    ///
    /// 发送者身份通过其连接句柄在参与者表中解析；未知发送者是
    /// 显式失败（不同于清理路径的无操作）。信令 payload 对本组件
    /// 完全不透明——不检查、不校验、不持久化，原样转发给目标连接。
    pub async fn relay_signal(
        &self,
        kind: SignalKind,
        sender_connection: ConnectionId,
        target: ConnectionId,
        signal: Value,
    ) -> Result<(), ApplicationError> {
        let participant = self
            .rooms
            .find_participant(sender_connection)
            .await?
            .ok_or_else(|| ApplicationError::not_found("发送者不在任何通话房间中"))?;
        let sender = self.users.get_profile(participant.user_id).await?;

        let event = match kind {
            SignalKind::Offer => ServerEvent::Offer {
                signal,
                connection: sender_connection,
                sender,
            },
            SignalKind::Answer => ServerEvent::Answer {
                signal,
                connection: sender_connection,
                sender,
            },
        };
        self.fanout.deliver_to(target, &event).await;
        Ok(())
    }

    /// 离开房间（显式 leftRoom 或连接断开触发）。
    ///
    /// 移除该连接的参与者记录（不存在则无操作），按**实时**参与者数
    /// 判定房间状态：归零即条件删除（Empty → Deleted），然后向剩余
    /// 参与者广播 `userLeft`。删除先于广播：参与者记录一旦移除就不可
    /// 重放，房间清理不能被广播路径上的失败挡住。重复或竞争的离开
    /// 事件始终安全。
    pub async fn leave(&self, connection: ConnectionId) -> Result<(), ApplicationError> {
        let Some(participant) = self.rooms.remove_participant(connection).await? else {
            return Ok(());
        };
        let room_id = participant.room_id;

        let count = self.rooms.participant_count(room_id).await?;
        if CallRoomState::from_participant_count(count) == CallRoomState::Empty
            && self.rooms.delete_room_if_empty(room_id).await?
        {
            tracing::info!(room_id = %room_id, "房间已清空并删除");
        }

        // userLeft 是尽力而为：档案解析失败只跳过广播，不中断清理
        match self.users.get_profile(participant.user_id).await {
            Ok(user) => {
                let event = ServerEvent::UserLeft { user };
                for remaining in self.rooms.room_participants(room_id).await? {
                    self.fanout.deliver_to(remaining.connection, &event).await;
                }
            }
            Err(err) => {
                tracing::warn!(
                    user = %participant.user_id,
                    error = %err,
                    "userLeft 广播的档案解析失败，跳过"
                );
            }
        }

        tracing::info!(room_id = %room_id, user = %participant.user_id, "参与者离开房间");
        Ok(())
    }
}
