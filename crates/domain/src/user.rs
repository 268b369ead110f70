use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 用户展示身份。
///
/// 通话邀请和信令转发携带的发送者信息，对应用户档案的最小投影。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: UserId, name: impl Into<String>, avatar_url: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            avatar_url,
        }
    }
}
