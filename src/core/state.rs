//! 会话状态机
//!
//! Uninitialized → AssistantCreated → ThreadEstablished → Ready；
//! 引导阶段任何一步失败都进入终态 Failed(reason)。单轮对话失败不改变状态。

use serde::Serialize;

/// 会话阶段（通过 watch 通道投影给调用方）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    AssistantCreated,
    ThreadEstablished,
    Ready,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SessionState::Failed(_))
    }

    /// 状态只能前进；Failed 为终态
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Uninitialized, AssistantCreated) => true,
            (AssistantCreated, ThreadEstablished) => true,
            (ThreadEstablished, Ready) => true,
            _ => false,
        }
    }
}

/// 引导失败原因
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// create-assistant 的响应里没有 id
    NoAssistantId,
    /// create-thread 的响应里没有 id
    NoThreadId,
    AssistantUnavailable(String),
    ThreadUnavailable(String),
    /// 凭据问题（理论上在构建阶段已被拦截）
    Unauthorized(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NoAssistantId => write!(f, "assistant id missing"),
            FailureReason::NoThreadId => write!(f, "thread id missing"),
            FailureReason::AssistantUnavailable(e) => write!(f, "assistant creation failed: {e}"),
            FailureReason::ThreadUnavailable(e) => write!(f, "thread creation failed: {e}"),
            FailureReason::Unauthorized(e) => write!(f, "unauthorized: {e}"),
        }
    }
}
