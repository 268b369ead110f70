//! 即时通讯系统核心领域模型
//!
//! 包含在线状态、会话成员、消息置顶、通话房间等核心实体，
//! 以及面向传输层的实时事件目录。

pub mod call;
pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod presence;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use call::*;
pub use conversation::*;
pub use errors::*;
pub use events::*;
pub use message::*;
pub use presence::*;
pub use user::*;
pub use value_objects::*;
