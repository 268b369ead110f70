//! WebSocket 网关层。
//!
//! 传输适配器：把实时帧解析为用例调用，把服务层产出的
//! [`domain::ServerEvent`] 序列化后写回对应连接。
//! socket 注册表是 [`application::Broadcaster`] 的唯一实现。

mod error;
mod gateway;
mod registry;
mod routes;
mod state;

pub use error::ApiError;
pub use gateway::ClientEvent;
pub use registry::SocketRegistry;
pub use routes::router;
pub use state::AppState;
