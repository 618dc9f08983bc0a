//! 会话错误类型
//!
//! 按来源划分：凭据、网络、协议、沙箱、持久化、超时与取消；
//! 引导失败单独包装为 SessionFailed，只有它会让会话进入 Failed。

use thiserror::Error;

use crate::core::FailureReason;
use crate::sandbox::SandboxError;

/// 会话运行过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum AssistantError {
    /// 缺少或无效的 API 凭据（启动期致命）
    #[error("Auth error: {0}")]
    Auth(String),

    /// 传输失败或重试耗尽后仍为非 2xx
    #[error("Network error: {0}")]
    Network(String),

    /// 响应结构不符合预期（缺字段、非 JSON）
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// 上下文或长期记忆读写失败
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 实时通道请求超时
    #[error("Timed out: {0}")]
    Timeout(String),

    /// 会话已关闭，进行中的请求被放弃
    #[error("Cancelled")]
    Cancelled,

    /// 引导（创建助手 / 线程）失败，会话需要重建
    #[error("Session failed: {0}")]
    SessionFailed(FailureReason),
}

impl AssistantError {
    /// 转换为可直接展示给用户的文案
    pub fn user_message(&self) -> String {
        match self {
            AssistantError::Auth(msg) => format!("API credential problem: {msg}"),
            AssistantError::Network(_) | AssistantError::Protocol(_) => {
                "Operation failed, please try again.".to_string()
            }
            AssistantError::Sandbox(e) => format!("Code execution failed: {e}"),
            AssistantError::Persistence(_) => {
                "Could not access saved session data.".to_string()
            }
            AssistantError::Timeout(what) => format!("No result for {what} in time."),
            AssistantError::Cancelled => "Session has been closed.".to_string(),
            AssistantError::SessionFailed(reason) => {
                format!("Assistant session could not start ({reason}); please restart.")
            }
        }
    }

    /// 单轮失败后会话是否仍可继续使用
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AssistantError::Auth(_) | AssistantError::Cancelled | AssistantError::SessionFailed(_)
        )
    }
}

impl From<rusqlite::Error> for AssistantError {
    fn from(e: rusqlite::Error) -> Self {
        AssistantError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for AssistantError {
    fn from(e: std::io::Error) -> Self {
        AssistantError::Persistence(e.to_string())
    }
}
