use domain::DomainError;
use thiserror::Error;

use crate::repository::RepositoryError;

/// 应用层错误。
///
/// 调用方（传输网关或 REST 层）根据错误种类决定反馈方式：
/// 所有错误只反馈给请求方本身，其他参与者永远只通过广播
/// 观察到成功的状态变更。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    /// 缺少必需的标识符等入参问题，在任何状态变更之前拒绝
    #[error("验证失败: {message}")]
    Validation { message: String },
    /// 置顶数量达到会话上限，无状态变更
    #[error("置顶数量已达上限: {limit}")]
    PinLimitExceeded { limit: u32 },
    /// 直接查询路径上的目标缺失（清理路径上的缺失是无操作，不走这里）
    #[error("资源不存在: {message}")]
    NotFound { message: String },
}

impl ApplicationError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApplicationError::NotFound {
            message: message.into(),
        }
    }
}
