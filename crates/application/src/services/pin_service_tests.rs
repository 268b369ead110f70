//! 置顶状态协调器测试

use std::sync::Arc;

use chrono::Utc;

use crate::clock::{FixedClock, SystemClock};
use crate::error::ApplicationError;
use crate::fanout::FanoutEngine;
use crate::memory::testing::RecordingBroadcaster;
use crate::memory::{MemoryMembershipStore, MemoryMessageStore};
use crate::presence::memory::MemoryPresenceRegistry;
use crate::presence::PresenceRegistry;
use crate::repository::{MembershipStore, MessageStore};
use crate::services::pin_service::{PinService, PinServiceDependencies};
use domain::{
    ConnectionId, ConversationId, ConversationMember, MemberRole, Message, MessageId, PinCounter,
    ServerEvent, Timestamp, UserId,
};

struct PinHarness {
    presence: Arc<MemoryPresenceRegistry>,
    membership: Arc<MemoryMembershipStore>,
    store: Arc<MemoryMessageStore>,
    broadcaster: Arc<RecordingBroadcaster>,
    service: PinService,
    conversation: ConversationId,
    now: Timestamp,
}

impl PinHarness {
    async fn new(pin_limit: u32) -> Self {
        let presence = Arc::new(MemoryPresenceRegistry::new(Arc::new(SystemClock)));
        let membership = Arc::new(MemoryMembershipStore::new(presence.clone()));
        let store = Arc::new(MemoryMessageStore::new());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let fanout = Arc::new(FanoutEngine::new(membership.clone(), broadcaster.clone()));
        // 固定服务时钟，让置顶时间戳可以精确断言
        let now = Utc::now();
        let service = PinService::new(PinServiceDependencies {
            message_store: store.clone(),
            fanout,
            clock: Arc::new(FixedClock(now)),
        });

        let conversation = ConversationId::generate();
        store
            .seed_counter(PinCounter::new(conversation, pin_limit))
            .await;

        Self {
            presence,
            membership,
            store,
            broadcaster,
            service,
            conversation,
            now,
        }
    }

    async fn add_member(&self, user: UserId, online: Option<ConnectionId>) {
        let mut members = vec![ConversationMember {
            user_id: user,
            role: MemberRole::Member,
        }];
        // 追加到已有名单上
        let existing = self
            .membership
            .get_members(self.conversation)
            .await
            .unwrap();
        for member in existing {
            members.push(ConversationMember {
                user_id: member.user_id,
                role: MemberRole::Member,
            });
        }
        self.membership
            .seed_conversation(self.conversation, members)
            .await;

        if let Some(connection) = online {
            self.presence
                .register_connection(user, connection)
                .await
                .unwrap();
        }
    }

    async fn seed_text_message(&self) -> MessageId {
        let message = Message::new_text(
            MessageId::generate(),
            self.conversation,
            UserId::generate(),
            "hello",
            Utc::now(),
        );
        let id = message.id;
        self.store.seed_message(message).await;
        id
    }

    async fn pin_count(&self) -> u32 {
        self.store
            .pin_counter(self.conversation)
            .await
            .unwrap()
            .number_of_pins
    }
}

fn event_names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(|event| event.event_name()).collect()
}

#[tokio::test]
async fn pin_broadcasts_notification_and_pin_event_to_online_members() {
    let harness = PinHarness::new(3).await;
    let alice = UserId::generate();
    let bob = UserId::generate();
    let conn_a = ConnectionId::generate();
    let conn_b = ConnectionId::generate();
    harness.add_member(alice, Some(conn_a)).await;
    harness.add_member(bob, Some(conn_b)).await;

    let message_id = harness.seed_text_message().await;
    harness.service.pin(message_id, alice).await.unwrap();

    assert_eq!(harness.pin_count().await, 1);
    let pinned = harness.store.find_message(message_id).await.unwrap();
    assert!(pinned.is_pin);
    assert_eq!(pinned.pinned_at, Some(harness.now));

    // 两个在线成员都按顺序收到通知消息、置顶事件和列表变更信号
    for conn in [conn_a, conn_b] {
        let events = harness.broadcaster.sent_to(conn).await;
        assert_eq!(
            event_names(&events),
            vec!["newMessage", "pinMessage", "reloadConversationList"]
        );
    }
}

#[tokio::test]
async fn pin_over_limit_fails_without_state_change_or_broadcast() {
    let harness = PinHarness::new(1).await;
    let alice = UserId::generate();
    let bob = UserId::generate();
    let conn_a = ConnectionId::generate();
    let conn_b = ConnectionId::generate();
    harness.add_member(alice, Some(conn_a)).await;
    harness.add_member(bob, Some(conn_b)).await;

    let first = harness.seed_text_message().await;
    let second = harness.seed_text_message().await;

    harness.service.pin(first, alice).await.unwrap();
    let after_first = harness.broadcaster.total_deliveries().await;

    let err = harness.service.pin(second, alice).await.unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::PinLimitExceeded { limit: 1 }
    ));

    // 状态不变，也没有新的广播
    assert_eq!(harness.pin_count().await, 1);
    let untouched = harness.store.find_message(second).await.unwrap();
    assert!(!untouched.is_pin);
    assert_eq!(harness.broadcaster.total_deliveries().await, after_first);
}

#[tokio::test]
async fn pin_is_idempotent_for_already_pinned_message() {
    let harness = PinHarness::new(2).await;
    let alice = UserId::generate();
    harness.add_member(alice, Some(ConnectionId::generate())).await;

    let message_id = harness.seed_text_message().await;
    harness.service.pin(message_id, alice).await.unwrap();
    let after_first = harness.broadcaster.total_deliveries().await;

    harness.service.pin(message_id, alice).await.unwrap();
    assert_eq!(harness.pin_count().await, 1);
    assert_eq!(harness.broadcaster.total_deliveries().await, after_first);
}

#[tokio::test]
async fn unpin_of_unpinned_message_never_goes_below_zero() {
    let harness = PinHarness::new(2).await;
    let alice = UserId::generate();
    harness.add_member(alice, Some(ConnectionId::generate())).await;

    let message_id = harness.seed_text_message().await;
    harness.service.unpin(message_id, alice).await.unwrap();
    harness.service.unpin(message_id, alice).await.unwrap();

    assert_eq!(harness.pin_count().await, 0);
    assert_eq!(harness.broadcaster.total_deliveries().await, 0);
}

#[tokio::test]
async fn unpin_broadcasts_symmetric_notification() {
    let harness = PinHarness::new(2).await;
    let alice = UserId::generate();
    let conn_a = ConnectionId::generate();
    harness.add_member(alice, Some(conn_a)).await;

    let message_id = harness.seed_text_message().await;
    harness.service.pin(message_id, alice).await.unwrap();
    harness.service.unpin(message_id, alice).await.unwrap();

    assert_eq!(harness.pin_count().await, 0);
    let events = harness.broadcaster.sent_to(conn_a).await;
    assert_eq!(
        event_names(&events),
        vec![
            "newMessage",
            "pinMessage",
            "reloadConversationList",
            "newMessage",
            "unPinMessage",
            "reloadConversationList",
        ]
    );
}

#[tokio::test]
async fn recall_of_pinned_message_decrements_exactly_once() {
    let harness = PinHarness::new(2).await;
    let alice = UserId::generate();
    harness.add_member(alice, Some(ConnectionId::generate())).await;

    let message_id = harness.seed_text_message().await;
    harness.service.pin(message_id, alice).await.unwrap();
    assert_eq!(harness.pin_count().await, 1);

    harness.service.recall(message_id).await.unwrap();

    let recalled = harness.store.find_message(message_id).await.unwrap();
    assert!(!recalled.is_pin);
    assert!(recalled.pinned_at.is_none());
    assert!(recalled.recalled);
    assert_eq!(harness.pin_count().await, 0);
}

#[tokio::test]
async fn recall_after_explicit_unpin_does_not_decrement_again() {
    let harness = PinHarness::new(2).await;
    let alice = UserId::generate();
    harness.add_member(alice, Some(ConnectionId::generate())).await;

    let message_id = harness.seed_text_message().await;
    harness.service.pin(message_id, alice).await.unwrap();
    harness.service.unpin(message_id, alice).await.unwrap();
    harness.service.recall(message_id).await.unwrap();

    let recalled = harness.store.find_message(message_id).await.unwrap();
    assert!(recalled.recalled);
    assert_eq!(harness.pin_count().await, 0);
}

#[tokio::test]
async fn broadcast_excludes_member_after_connection_cleared() {
    let harness = PinHarness::new(3).await;
    let alice = UserId::generate();
    let bob = UserId::generate();
    let conn_a = ConnectionId::generate();
    let conn_b = ConnectionId::generate();
    harness.add_member(alice, Some(conn_a)).await;
    harness.add_member(bob, Some(conn_b)).await;

    let first = harness.seed_text_message().await;
    harness.service.pin(first, alice).await.unwrap();
    assert_eq!(harness.broadcaster.sent_to(conn_b).await.len(), 3);

    // Bob 断开后的广播不再包含他
    harness.presence.clear_connection(conn_b).await.unwrap();
    let second = harness.seed_text_message().await;
    harness.service.pin(second, alice).await.unwrap();

    assert_eq!(harness.broadcaster.sent_to(conn_b).await.len(), 3);
    assert_eq!(harness.broadcaster.sent_to(conn_a).await.len(), 6);
}
