//! Bespoke - 助手会话编排层
//!
//! 模块划分：
//! - **api**: 带重试的 HTTP 客户端与远端助手服务（HTTP / Mock）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态机、编排器、构建器、错误与取消
//! - **memory**: 短期 / 长期记忆与会话上下文持久化
//! - **observability**: 日志初始化
//! - **realtime**: WebSocket 实时分析通道（feature `realtime`）
//! - **sandbox**: 无外部能力的代码沙箱

pub mod api;
pub mod config;
pub mod core;
pub mod memory;
pub mod observability;
#[cfg(feature = "realtime")]
pub mod realtime;
pub mod sandbox;

pub use crate::core::{AssistantError, AssistantOrchestrator, SessionBuilder, SessionState, TurnOutcome};
