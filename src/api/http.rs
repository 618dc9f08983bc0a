//! HTTP 实现：通过 RetryingRequestClient 调用远端助手服务

use async_trait::async_trait;
use serde_json::json;

use crate::api::types::required_str;
use crate::api::{
    Assistant, AssistantApi, RetryingRequestClient, RunRequest, RunResult, SentimentAnalysis, Thread,
};
use crate::config::ApiSection;
use crate::core::AssistantError;

pub struct HttpAssistantApi {
    client: RetryingRequestClient,
    base_url: String,
    sentiment_url: String,
}

impl HttpAssistantApi {
    pub fn new(client: RetryingRequestClient, base_url: &str, sentiment_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sentiment_url: sentiment_url.to_string(),
        }
    }

    pub fn from_config(client: RetryingRequestClient, cfg: &ApiSection) -> Self {
        Self::new(client, &cfg.base_url, &cfg.sentiment_url)
    }

    /// 在 base_url 后追加路径段；每段单独转义，id 中的 `/`、`?`、`#` 不会改变请求目标
    fn endpoint(&self, segments: &[&str]) -> Result<String, AssistantError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| AssistantError::Protocol(format!("invalid base url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| AssistantError::Protocol(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }
}

#[async_trait]
impl AssistantApi for HttpAssistantApi {
    async fn create_assistant(&self, name: &str, description: &str) -> Result<Assistant, AssistantError> {
        let url = self.endpoint(&["v1", "assistants"])?;
        let payload = self
            .client
            .post(&url, json!({ "name": name, "description": description }))
            .await?;
        let id = required_str(&payload, "id", "create-assistant")?;
        Ok(Assistant {
            id,
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    async fn create_thread(&self, assistant_id: &str, title: &str) -> Result<Thread, AssistantError> {
        let url = self.endpoint(&["v1", "assistants", assistant_id, "threads"])?;
        let payload = self.client.post(&url, json!({ "title": title })).await?;
        Thread::from_payload(payload, assistant_id, title)
    }

    async fn create_run(&self, request: &RunRequest) -> Result<RunResult, AssistantError> {
        let url = self.endpoint(&["v1", "threads", &request.thread_id, "runs"])?;
        let payload = self
            .client
            .post(
                &url,
                json!({ "input": request.input_text, "context": request.attached_context }),
            )
            .await?;
        RunResult::from_payload(payload)
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentAnalysis, AssistantError> {
        let raw = self.client.post(&self.sentiment_url, json!({ "text": text })).await?;
        Ok(SentimentAnalysis { raw })
    }
}
