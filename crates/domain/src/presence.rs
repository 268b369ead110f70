//! 用户在线状态
//!
//! 每个用户恰好一条在线状态记录，只由 Presence Registry 修改。

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConnectionId, Timestamp, UserId};

/// 用户在线状态记录。
///
/// 不变式：`connection.is_some()` 当且仅当 `is_online` 为真。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: UserId,
    pub connection: Option<ConnectionId>,
    pub is_online: bool,
    pub last_online_at: Option<Timestamp>,
}

impl UserPresence {
    /// 新建离线记录。
    pub fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            connection: None,
            is_online: false,
            last_online_at: None,
        }
    }

    /// 上线：绑定连接句柄。重复绑定同一句柄是幂等的；
    /// 绑定新句柄时旧句柄直接被取代（last-writer-wins）。
    pub fn connect(&mut self, connection: ConnectionId) {
        self.connection = Some(connection);
        self.is_online = true;
    }

    /// 下线：仅当当前句柄与待清除句柄一致时才生效，
    /// 防止迟到的断开事件清掉已重连的新句柄。
    pub fn disconnect_if_current(&mut self, connection: ConnectionId, now: Timestamp) -> bool {
        if self.connection != Some(connection) {
            return false;
        }
        self.connection = None;
        self.is_online = false;
        self.last_online_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn stale_disconnect_does_not_clear_new_connection() {
        let user = UserId::generate();
        let old = ConnectionId::generate();
        let new = ConnectionId::generate();

        let mut presence = UserPresence::offline(user);
        presence.connect(old);
        presence.connect(new);

        // 旧句柄的断开事件不应影响新连接
        assert!(!presence.disconnect_if_current(old, Utc::now()));
        assert!(presence.is_online);
        assert_eq!(presence.connection, Some(new));

        assert!(presence.disconnect_if_current(new, Utc::now()));
        assert!(!presence.is_online);
        assert_eq!(presence.connection, None);
        assert!(presence.last_online_at.is_some());
    }
}
