//! 网关端到端流程测试：内存存储 + 真实 WebSocket 连接

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use application::memory::{
    MemoryCallRoomStore, MemoryMembershipStore, MemoryMessageStore, MemoryUserDirectory,
};
use application::presence::memory::MemoryPresenceRegistry;
use application::{
    CallService, CallServiceDependencies, FanoutEngine, PinService, PinServiceDependencies,
    SystemClock,
};
use domain::{
    ConversationId, ConversationMember, MemberRole, Message, MessageId, PinCounter, UserId,
    UserProfile,
};
use web_api::{router, AppState, SocketRegistry};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: std::net::SocketAddr,
    membership: Arc<MemoryMembershipStore>,
    messages: Arc<MemoryMessageStore>,
    users: Arc<MemoryUserDirectory>,
}

async fn start_server() -> TestServer {
    let presence = Arc::new(MemoryPresenceRegistry::new(Arc::new(SystemClock)));
    let membership = Arc::new(MemoryMembershipStore::new(presence.clone()));
    let messages = Arc::new(MemoryMessageStore::new());
    let rooms = Arc::new(MemoryCallRoomStore::new());
    let users = Arc::new(MemoryUserDirectory::new());
    let registry = Arc::new(SocketRegistry::new());
    let fanout = Arc::new(FanoutEngine::new(membership.clone(), registry.clone()));

    let pin_service = Arc::new(PinService::new(PinServiceDependencies {
        message_store: messages.clone(),
        fanout: fanout.clone(),
        clock: Arc::new(SystemClock),
    }));
    let call_service = Arc::new(CallService::new(CallServiceDependencies {
        rooms,
        membership: membership.clone(),
        users: users.clone(),
        fanout,
        clock: Arc::new(SystemClock),
    }));

    let state = AppState::new(presence, pin_service, call_service, registry);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state).into_make_service())
            .await
            .ok();
    });

    TestServer {
        addr,
        membership,
        messages,
        users,
    }
}

async fn connect(server: &TestServer) -> WsClient {
    let (client, _) = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .expect("connect");
    client
}

async fn send_event(client: &mut WsClient, frame: Value) {
    client
        .send(TungsteniteMessage::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一条文本帧并解析为 JSON，超时视为失败
async fn next_event(client: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame");
        if let TungsteniteMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("valid json");
        }
    }
}

/// 确认一段时间内没有新帧到达
async fn assert_silent(client: &mut WsClient) {
    let result = timeout(Duration::from_millis(300), client.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pin_flow_broadcasts_to_online_members() {
    let server = start_server().await;

    let alice = UserId::generate();
    let bob = UserId::generate();
    let conversation = ConversationId::generate();
    server
        .membership
        .seed_conversation(
            conversation,
            vec![
                ConversationMember {
                    user_id: alice,
                    role: MemberRole::Member,
                },
                ConversationMember {
                    user_id: bob,
                    role: MemberRole::Member,
                },
            ],
        )
        .await;
    server
        .messages
        .seed_counter(PinCounter::new(conversation, 1))
        .await;
    let first = Message::new_text(
        MessageId::generate(),
        conversation,
        alice,
        "pin me",
        Utc::now(),
    );
    let second = Message::new_text(
        MessageId::generate(),
        conversation,
        alice,
        "over limit",
        Utc::now(),
    );
    let first_id = first.id;
    let second_id = second.id;
    server.messages.seed_message(first).await;
    server.messages.seed_message(second).await;

    let mut client_a = connect(&server).await;
    let mut client_b = connect(&server).await;
    send_event(&mut client_a, json!({ "event": "setUserId", "data": { "userId": alice } })).await;
    send_event(&mut client_b, json!({ "event": "setUserId", "data": { "userId": bob } })).await;
    // 等上线登记生效
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut client_a,
        json!({ "event": "pinMessage", "data": { "messageId": first_id } }),
    )
    .await;

    // 两个在线成员都按顺序收到通知消息、置顶事件和列表变更信号
    for client in [&mut client_a, &mut client_b] {
        assert_eq!(next_event(client).await["event"], "newMessage");
        let pin = next_event(client).await;
        assert_eq!(pin["event"], "pinMessage");
        assert_eq!(pin["data"]["message"]["id"], json!(first_id));
        assert_eq!(next_event(client).await["event"], "reloadConversationList");
    }

    // 超过上限：只有请求方收到错误帧
    send_event(
        &mut client_a,
        json!({ "event": "pinMessage", "data": { "messageId": second_id } }),
    )
    .await;
    let error = next_event(&mut client_a).await;
    assert_eq!(error["event"], "error");
    assert_silent(&mut client_b).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_call_invites_online_member_only() {
    let server = start_server().await;

    let host = UserId::generate();
    let bob = UserId::generate();
    let carol = UserId::generate();
    let conversation = ConversationId::generate();
    server
        .membership
        .seed_conversation(
            conversation,
            vec![
                ConversationMember {
                    user_id: host,
                    role: MemberRole::Member,
                },
                ConversationMember {
                    user_id: bob,
                    role: MemberRole::Member,
                },
                // carol 不建立连接，保持离线
                ConversationMember {
                    user_id: carol,
                    role: MemberRole::Member,
                },
            ],
        )
        .await;
    server
        .users
        .seed_profile(UserProfile::new(host, "host", None))
        .await;
    server
        .users
        .seed_profile(UserProfile::new(bob, "bob", None))
        .await;

    let mut client_host = connect(&server).await;
    let mut client_bob = connect(&server).await;
    send_event(&mut client_host, json!({ "event": "setUserId", "data": { "userId": host } })).await;
    send_event(&mut client_bob, json!({ "event": "setUserId", "data": { "userId": bob } })).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut client_host,
        json!({
            "event": "startCall",
            "data": { "conversationId": conversation, "userId": host, "callType": "video" }
        }),
    )
    .await;

    // 发起方收到 roomCreated，在线成员恰好收到一条 inviteCall
    let created = next_event(&mut client_host).await;
    assert_eq!(created["event"], "roomCreated");
    assert_eq!(created["data"]["callType"], "video");

    let invite = next_event(&mut client_bob).await;
    assert_eq!(invite["event"], "inviteCall");
    assert_eq!(invite["data"]["from"]["name"], "host");
    assert_eq!(invite["data"]["roomId"], created["data"]["roomId"]);
    assert_silent(&mut client_bob).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unbound_connection_gets_error_frame() {
    let server = start_server().await;
    let mut client = connect(&server).await;

    // 未绑定用户身份的置顶请求只收到错误帧
    send_event(
        &mut client,
        json!({ "event": "pinMessage", "data": { "messageId": MessageId::generate() } }),
    )
    .await;
    let error = next_event(&mut client).await;
    assert_eq!(error["event"], "error");
}
