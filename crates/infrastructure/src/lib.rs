//! 基础设施层实现。
//!
//! 提供应用层端口的 PostgreSQL 适配器：在线状态注册表、
//! 成员存储、消息存储（置顶/撤回的事务性复合操作）、
//! 通话房间存储与用户档案目录。

pub mod migrations;
pub mod presence;
pub mod repository;

pub use migrations::MIGRATOR;
pub use presence::PgPresenceRegistry;
pub use repository::{
    create_pg_pool, PgCallRoomStore, PgMembershipStore, PgMessageStore, PgStorage, PgUserDirectory,
};
