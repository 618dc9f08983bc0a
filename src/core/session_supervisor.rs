//! 会话监管：生命周期与取消
//!
//! 持有会话级 CancellationToken。shutdown 时取消，所有挂在 token 上的请求
//! （包括正在退避等待的重试循环）直接被丢弃，不做等待。

use tokio_util::sync::CancellationToken;

use crate::core::AssistantError;

/// 会话级生命周期管理
#[derive(Debug)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（会话拆除）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 在取消令牌与 future 之间竞速；取消时 future 被直接丢弃
    pub async fn run<T, F>(&self, fut: F) -> Result<T, AssistantError>
    where
        F: std::future::Future<Output = Result<T, AssistantError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AssistantError::Cancelled),
            result = fut => result,
        }
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
