//! WebSocket 网关
//!
//! 每条连接：升级后分配新的连接句柄并登记到注册表，拆分套接字，
//! 写任务消费注册表通道并序列化出站事件，读循环按到达顺序解析
//! 并派发入站帧。派发错误只以 `error` 帧反馈给请求方本身。
//! 断开时注销连接、退出通话房间、清除在线状态——清理操作全部
//! 幂等，与显式 `leftRoom` 竞争也安全。

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use application::{ApplicationError, Broadcaster, SignalKind};
use domain::{
    CallRoomId, CallType, ConnectionId, ConversationId, MessageId, ServerEvent, UserId,
};

use crate::state::AppState;

/// 客户端入站事件目录，外部标签帧：`{"event": ..., "data": ...}`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// 把当前连接绑定到用户身份（上线登记）
    SetUserId { user_id: UserId },
    StartCall {
        conversation_id: ConversationId,
        user_id: UserId,
        call_type: CallType,
    },
    JoinRoom { room_id: CallRoomId, user_id: UserId },
    Offer { to: ConnectionId, signal: Value },
    Answer { to: ConnectionId, signal: Value },
    LeftRoom,
    PinMessage { message_id: MessageId },
    UnPinMessage { message_id: MessageId },
    RecallMessage { message_id: MessageId },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::generate();
    let mut events = state.registry.register(connection).await;
    let (mut sink, mut stream) = socket.split();

    // 写任务：独占通道消费端，保证同一连接上的事件顺序
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(frame) => {
                    if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "出站事件序列化失败");
                }
            }
        }
    });

    tracing::info!(connection = %connection, "WebSocket 连接建立");

    // 连接绑定的用户身份，setUserId 之后可用
    let mut bound_user: Option<UserId> = None;
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(connection = %connection, error = %err, "读取帧失败");
                break;
            }
        };
        match message {
            WsMessage::Text(text) => {
                handle_frame(&state, connection, &mut bound_user, text.as_str()).await;
            }
            WsMessage::Close(_) => break,
            // Ping/Pong 由 axum 自动应答
            _ => {}
        }
    }

    // 断开清理：与显式离开/重连竞争也安全（全部幂等）
    state.registry.unregister(connection).await;
    if let Err(err) = state.call_service.leave(connection).await {
        tracing::warn!(connection = %connection, error = %err, "断开时的房间清理失败");
    }
    if let Err(err) = state.presence.clear_connection(connection).await {
        tracing::warn!(connection = %connection, error = %err, "断开时的在线状态清理失败");
    }
    writer.abort();
    tracing::info!(connection = %connection, "WebSocket 连接关闭");
}

async fn handle_frame(
    state: &AppState,
    connection: ConnectionId,
    bound_user: &mut Option<UserId>,
    frame: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(frame) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(connection = %connection, error = %err, "无法解析的入站帧");
            send_error(state, connection, format!("无法解析的事件: {err}")).await;
            return;
        }
    };

    if let Err(err) = dispatch(state, connection, bound_user, event).await {
        // 错误只反馈给请求方，其他成员不受影响
        tracing::debug!(connection = %connection, error = %err, "事件处理失败");
        send_error(state, connection, err.to_string()).await;
    }
}

async fn dispatch(
    state: &AppState,
    connection: ConnectionId,
    bound_user: &mut Option<UserId>,
    event: ClientEvent,
) -> Result<(), ApplicationError> {
    match event {
        ClientEvent::SetUserId { user_id } => {
            state.presence.register_connection(user_id, connection).await?;
            *bound_user = Some(user_id);
            Ok(())
        }
        ClientEvent::StartCall {
            conversation_id,
            user_id,
            call_type,
        } => {
            state
                .call_service
                .start_call(conversation_id, user_id, call_type, connection)
                .await?;
            Ok(())
        }
        ClientEvent::JoinRoom { room_id, user_id } => {
            state.call_service.join_room(room_id, user_id, connection).await
        }
        ClientEvent::Offer { to, signal } => {
            state
                .call_service
                .relay_signal(SignalKind::Offer, connection, to, signal)
                .await
        }
        ClientEvent::Answer { to, signal } => {
            state
                .call_service
                .relay_signal(SignalKind::Answer, connection, to, signal)
                .await
        }
        ClientEvent::LeftRoom => state.call_service.leave(connection).await,
        ClientEvent::PinMessage { message_id } => {
            let sender = require_user(bound_user)?;
            state.pin_service.pin(message_id, sender).await
        }
        ClientEvent::UnPinMessage { message_id } => {
            let sender = require_user(bound_user)?;
            state.pin_service.unpin(message_id, sender).await
        }
        ClientEvent::RecallMessage { message_id } => {
            state.pin_service.recall(message_id).await
        }
    }
}

fn require_user(bound_user: &Option<UserId>) -> Result<UserId, ApplicationError> {
    bound_user
        .as_ref()
        .copied()
        .ok_or_else(|| ApplicationError::validation("连接尚未绑定用户身份"))
}

async fn send_error(state: &AppState, connection: ConnectionId, message: String) {
    if let Err(err) = state
        .registry
        .deliver(connection, &ServerEvent::error(message))
        .await
    {
        tracing::debug!(connection = %connection, error = %err, "错误帧投递失败");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_camel_case_frames() {
        let user_id = UserId::generate();
        let frame = json!({
            "event": "setUserId",
            "data": { "userId": user_id }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert!(matches!(event, ClientEvent::SetUserId { user_id: id } if id == user_id));

        let frame = json!({
            "event": "startCall",
            "data": {
                "conversationId": ConversationId::generate(),
                "userId": UserId::generate(),
                "callType": "video"
            }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert!(matches!(
            event,
            ClientEvent::StartCall {
                call_type: CallType::Video,
                ..
            }
        ));
    }

    #[test]
    fn left_room_needs_no_payload() {
        let event: ClientEvent = serde_json::from_value(json!({ "event": "leftRoom" })).unwrap();
        assert!(matches!(event, ClientEvent::LeftRoom));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result = serde_json::from_value::<ClientEvent>(json!({
            "event": "selfDestruct",
            "data": {}
        }));
        assert!(result.is_err());
    }
}
