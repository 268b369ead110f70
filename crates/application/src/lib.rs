//! 应用层实现。
//!
//! 围绕领域模型提供用例服务：广播引擎、置顶状态协调器、
//! 通话会话管理器，以及对外部协作方（成员存储、消息存储、
//! 传输层投递）的端口抽象。

pub mod clock;
pub mod error;
pub mod fanout;
pub mod memory;
pub mod presence;
pub mod repository;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ApplicationError;
pub use fanout::{Broadcaster, DeliveryError, FanoutEngine, FanoutReport};
pub use presence::PresenceRegistry;
pub use repository::{
    CallRoomStore, JoinOutcome, MembershipStore, MessageStore, PinOutcome, RecallOutcome,
    RepositoryError, UnpinOutcome, UserDirectory,
};
pub use services::{
    CallService, CallServiceDependencies, PinService, PinServiceDependencies, SignalKind,
};
