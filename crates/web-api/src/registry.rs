//! Socket 注册表
//!
//! 连接句柄到发送端的映射。每条连接一个无界通道，写任务独占
//! 消费端，因此同一连接上的事件保持投递顺序。
//! 这是 [`Broadcaster`] 的唯一实现：服务层只依赖这个窄接口。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use application::{Broadcaster, DeliveryError};
use domain::{ConnectionId, ServerEvent};

#[derive(Default)]
pub struct SocketRegistry {
    senders: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条新连接，返回其事件接收端（交给写任务）。
    pub async fn register(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.write().await.insert(connection, tx);
        rx
    }

    /// 注销连接。之后对该句柄的投递返回 [`DeliveryError::Closed`]。
    pub async fn unregister(&self, connection: ConnectionId) {
        self.senders.write().await.remove(&connection);
    }

    pub async fn connection_count(&self) -> usize {
        self.senders.read().await.len()
    }
}

#[async_trait]
impl Broadcaster for SocketRegistry {
    async fn deliver(
        &self,
        connection: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), DeliveryError> {
        let senders = self.senders.read().await;
        let sender = senders.get(&connection).ok_or(DeliveryError::Closed)?;
        // 写任务退出后通道关闭，按连接拆除处理
        sender.send(event.clone()).map_err(|_| DeliveryError::Closed)
    }
}
