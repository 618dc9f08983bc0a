//! 远端助手服务抽象
//!
//! 所有后端（HTTP / Mock）实现 AssistantApi；编排器只依赖该 trait。

use async_trait::async_trait;

use crate::api::{Assistant, RunRequest, RunResult, SentimentAnalysis, Thread};
use crate::core::AssistantError;

#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// POST /v1/assistants
    async fn create_assistant(&self, name: &str, description: &str) -> Result<Assistant, AssistantError>;

    /// POST /v1/assistants/{assistant_id}/threads
    async fn create_thread(&self, assistant_id: &str, title: &str) -> Result<Thread, AssistantError>;

    /// POST /v1/threads/{thread_id}/runs
    async fn create_run(&self, request: &RunRequest) -> Result<RunResult, AssistantError>;

    /// POST /analyze
    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentAnalysis, AssistantError>;
}
