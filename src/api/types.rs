//! 远端 API 的请求 / 响应类型
//!
//! 每个端点一个带必需字段的类型；解析失败统一转为 Protocol 错误。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AssistantError;

/// 远端助手
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// 远端会话线程；未知字段原样保留，持久化时不丢失
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Thread {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            assistant_id: None,
            title: None,
            extra: Map::new(),
        }
    }
}

/// 单轮对话请求
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub thread_id: String,
    pub input_text: String,
    /// 短期记忆快照
    pub attached_context: HashMap<String, Value>,
}

/// 单轮对话结果
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub response: String,
    pub raw: Value,
}

/// 情感分析结果（原样保留）
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentAnalysis {
    pub raw: Value,
}

/// 取出非空字符串字段
pub(crate) fn required_str(payload: &Value, field: &str, endpoint: &str) -> Result<String, AssistantError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AssistantError::Protocol(format!("{endpoint}: missing string field `{field}`"))
        })
}

impl Thread {
    /// 从 create-thread 响应构建；缺少的 assistantId / title 用请求参数补齐
    pub(crate) fn from_payload(payload: Value, assistant_id: &str, title: &str) -> Result<Self, AssistantError> {
        required_str(&payload, "id", "create-thread")?;
        let mut thread: Thread = serde_json::from_value(payload)
            .map_err(|e| AssistantError::Protocol(format!("create-thread: {e}")))?;
        thread.assistant_id.get_or_insert_with(|| assistant_id.to_string());
        thread.title.get_or_insert_with(|| title.to_string());
        Ok(thread)
    }
}

impl RunResult {
    pub(crate) fn from_payload(payload: Value) -> Result<Self, AssistantError> {
        let response = payload
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AssistantError::Protocol("run: missing string field `response`".into()))?;
        Ok(Self { response, raw: payload })
    }
}
