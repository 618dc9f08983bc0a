//! 带重试的 HTTP 请求客户端
//!
//! send 在发起任何网络请求前先检查凭据；随后按 RetryPolicy 重试传输失败与非 2xx 响应，
//! 退避使用 tokio::time::sleep，不阻塞其他任务。每次失败都输出带尝试序号的 warn 日志。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::api::RetryPolicy;
use crate::core::AssistantError;

/// 一次待发送的请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// 原始响应：状态码 + 响应体文本
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 传输层抽象：真实实现走 reqwest，测试中可替换
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// 基于 reqwest 的传输层
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| AssistantError::Network(format!("http client init failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let mut builder = self.client.request(request.method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }
        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }
}

/// 带重试与鉴权头注入的请求客户端
pub struct RetryingRequestClient {
    transport: Box<dyn HttpTransport>,
    credential: Option<String>,
    policy: RetryPolicy,
}

impl RetryingRequestClient {
    pub fn new(
        transport: impl HttpTransport + 'static,
        credential: Option<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport: Box::new(transport),
            credential: credential.filter(|c| !c.trim().is_empty()),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 合并调用方请求头与默认头；Authorization 始终使用配置的凭据
    fn merge_headers(&self, token: &str, extra: Option<Vec<(String, String)>>) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        for (key, value) in extra.unwrap_or_default() {
            if key.eq_ignore_ascii_case("authorization") {
                continue;
            }
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
            headers.push((key, value));
        }
        headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        headers
    }

    /// 发送请求并返回 JSON 负载；重试耗尽后返回 Network 错误
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: Option<Vec<(String, String)>>,
        body: Option<Value>,
    ) -> Result<Value, AssistantError> {
        let token = self
            .credential
            .as_deref()
            .ok_or_else(|| AssistantError::Auth("no API credential configured".to_string()))?;

        let request = HttpRequest {
            method,
            url: url.to_string(),
            headers: self.merge_headers(token, headers),
            body,
        };

        let mut attempt = 0u32;
        loop {
            let cause = match self.transport.execute(request.clone()).await {
                Ok(resp) if resp.is_success() => {
                    return parse_payload(&resp.body, url);
                }
                Ok(resp) => format!("HTTP {}: {}", resp.status, truncate(&resp.body, 200)),
                Err(e) => e,
            };

            tracing::warn!(
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                url = %url,
                cause = %cause,
                "Request failed"
            );

            if !self.policy.should_retry(attempt) {
                return Err(AssistantError::Network(format!(
                    "{} failed after {} attempts: {}",
                    url,
                    attempt + 1,
                    cause
                )));
            }
            tokio::time::sleep(self.policy.delay_for(attempt)).await;
            attempt += 1;
        }
    }

    pub async fn post(&self, url: &str, body: Value) -> Result<Value, AssistantError> {
        self.send(Method::POST, url, None, Some(body)).await
    }
}

/// 2xx 但响应体不是 JSON 视为协议错误，不重试
fn parse_payload(body: &str, url: &str) -> Result<Value, AssistantError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|e| AssistantError::Protocol(format!("{} returned non-JSON body: {}", url, e)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// 按脚本依次返回结果，并记录每次调用的时间与请求头
    struct ScriptedTransport {
        script: Mutex<Vec<Result<HttpResponse, String>>>,
        calls: Arc<Mutex<Vec<(Instant, Vec<(String, String)>)>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, String>>) -> (Self, Arc<Mutex<Vec<(Instant, Vec<(String, String)>)>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    script: Mutex::new(script.into_iter().rev().collect()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.calls.lock().unwrap().push((Instant::now(), request.headers));
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("script exhausted".to_string()))
        }
    }

    fn ok(body: &str) -> Result<HttpResponse, String> {
        Ok(HttpResponse { status: 200, body: body.to_string() })
    }

    fn status(code: u16) -> Result<HttpResponse, String> {
        Ok(HttpResponse { status: code, body: "boom".to_string() })
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_double_per_attempt() {
        let (transport, calls) = ScriptedTransport::new(vec![
            Err("connection reset".into()),
            status(503),
            Err("connection reset".into()),
        ]);
        let client = RetryingRequestClient::new(
            transport,
            Some("secret".into()),
            RetryPolicy::new(3, Duration::from_millis(1000)),
        );

        let result = client.post("http://api/v1/assistants", serde_json::json!({})).await;
        assert!(matches!(result, Err(AssistantError::Network(_))));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let gap1 = calls[1].0 - calls[0].0;
        let gap2 = calls[2].0 - calls[1].0;
        assert!(gap1 >= Duration::from_millis(1000) && gap1 < Duration::from_millis(1050));
        assert!(gap2 >= Duration::from_millis(2000) && gap2 < Duration::from_millis(2050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let (transport, calls) = ScriptedTransport::new(vec![status(500), ok(r#"{"id":"a1"}"#)]);
        let client = RetryingRequestClient::new(transport, Some("secret".into()), RetryPolicy::default());

        let payload = client.post("http://api/x", serde_json::json!({})).await.unwrap();
        assert_eq!(payload["id"], "a1");
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_network() {
        let (transport, calls) = ScriptedTransport::new(vec![ok("{}")]);
        let client = RetryingRequestClient::new(transport, None, RetryPolicy::default());

        let result = client.post("http://api/x", serde_json::json!({})).await;
        assert!(matches!(result, Err(AssistantError::Auth(_))));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_credential_counts_as_missing() {
        let (transport, calls) = ScriptedTransport::new(vec![ok("{}")]);
        let client = RetryingRequestClient::new(transport, Some("   ".into()), RetryPolicy::default());
        assert!(matches!(
            client.post("http://api/x", serde_json::json!({})).await,
            Err(AssistantError::Auth(_))
        ));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_headers_are_merged_and_auth_cannot_be_overridden() {
        let (transport, calls) = ScriptedTransport::new(vec![ok("{}")]);
        let client = RetryingRequestClient::new(transport, Some("secret".into()), RetryPolicy::default());

        client
            .send(
                Method::GET,
                "http://api/x",
                Some(vec![
                    ("Authorization".into(), "Bearer forged".into()),
                    ("X-Trace".into(), "abc".into()),
                ]),
                None,
            )
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let headers = &calls[0].1;
        assert!(headers.contains(&("Authorization".to_string(), "Bearer secret".to_string())));
        assert!(headers.contains(&("X-Trace".to_string(), "abc".to_string())));
        assert!(!headers.iter().any(|(_, v)| v == "Bearer forged"));
    }

    #[tokio::test]
    async fn test_non_json_success_is_protocol_error_without_retry() {
        let (transport, calls) = ScriptedTransport::new(vec![ok("<html>"), ok("{}")]);
        let client = RetryingRequestClient::new(transport, Some("secret".into()), RetryPolicy::default());

        let result = client.post("http://api/x", serde_json::json!({})).await;
        assert!(matches!(result, Err(AssistantError::Protocol(_))));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }
}
