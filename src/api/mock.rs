//! Mock 助手服务（用于测试与离线运行，无需 API）
//!
//! create_run 回显用户输入；可注入失败次数与延迟，并统计各端点调用次数。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::api::{Assistant, AssistantApi, RunRequest, RunResult, SentimentAnalysis, Thread};
use crate::core::AssistantError;

/// 各端点调用次数
#[derive(Debug, Default)]
pub struct MockCallCounts {
    pub assistants: AtomicUsize,
    pub threads: AtomicUsize,
    pub runs: AtomicUsize,
    pub sentiments: AtomicUsize,
}

#[derive(Debug)]
pub struct MockAssistantApi {
    assistant_id: Option<String>,
    thread_id: Option<String>,
    run_delay: Duration,
    thread_delay: Duration,
    failing_runs: AtomicUsize,
    sentiment_down: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub calls: MockCallCounts,
}

impl MockAssistantApi {
    pub fn new() -> Self {
        Self {
            assistant_id: Some("a1".to_string()),
            thread_id: Some("t1".to_string()),
            run_delay: Duration::ZERO,
            thread_delay: Duration::ZERO,
            failing_runs: AtomicUsize::new(0),
            sentiment_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: MockCallCounts::default(),
        }
    }

    /// None 表示 create-assistant 返回的负载中没有 id
    pub fn with_assistant_id(mut self, id: Option<&str>) -> Self {
        self.assistant_id = id.map(str::to_string);
        self
    }

    pub fn with_thread_id(mut self, id: Option<&str>) -> Self {
        self.thread_id = id.map(str::to_string);
        self
    }

    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn with_thread_delay(mut self, delay: Duration) -> Self {
        self.thread_delay = delay;
        self
    }

    /// 接下来 n 次 create_run 返回 Network 错误
    pub fn fail_next_runs(&self, n: usize) {
        self.failing_runs.store(n, Ordering::SeqCst);
    }

    pub fn set_sentiment_down(&self, down: bool) {
        self.sentiment_down.store(down, Ordering::SeqCst);
    }

    /// 同时处于进行中的 run 的最大数量
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn thread_creations(&self) -> usize {
        self.calls.threads.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.calls.runs.load(Ordering::SeqCst)
    }
}

impl Default for MockAssistantApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssistantApi for MockAssistantApi {
    async fn create_assistant(&self, name: &str, description: &str) -> Result<Assistant, AssistantError> {
        self.calls.assistants.fetch_add(1, Ordering::SeqCst);
        let id = self
            .assistant_id
            .clone()
            .ok_or_else(|| AssistantError::Protocol("create-assistant: missing string field `id`".into()))?;
        Ok(Assistant {
            id,
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    async fn create_thread(&self, assistant_id: &str, title: &str) -> Result<Thread, AssistantError> {
        self.calls.threads.fetch_add(1, Ordering::SeqCst);
        if !self.thread_delay.is_zero() {
            tokio::time::sleep(self.thread_delay).await;
        }
        let id = self
            .thread_id
            .clone()
            .ok_or_else(|| AssistantError::Protocol("create-thread: missing string field `id`".into()))?;
        Thread::from_payload(json!({ "id": id }), assistant_id, title)
    }

    async fn create_run(&self, request: &RunRequest) -> Result<RunResult, AssistantError> {
        self.calls.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let should_fail = self
            .failing_runs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(AssistantError::Network("mock run failure".into()));
        }

        let response = format!("Echo: {}", request.input_text);
        Ok(RunResult {
            raw: json!({ "response": response, "thread_id": request.thread_id }),
            response,
        })
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentAnalysis, AssistantError> {
        self.calls.sentiments.fetch_add(1, Ordering::SeqCst);
        if self.sentiment_down.load(Ordering::SeqCst) {
            return Err(AssistantError::Network("sentiment service down".into()));
        }
        Ok(SentimentAnalysis {
            raw: json!({ "text": text, "label": "neutral" }),
        })
    }
}
