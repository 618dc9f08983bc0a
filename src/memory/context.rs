//! 会话上下文：需要跨进程保存的最小状态
//!
//! 落盘格式：`{"threadInfo": {...}, "lastInteraction": {"userInput", "assistantResponse"}}`

use serde::{Deserialize, Serialize};

use crate::api::Thread;

/// 最近一轮的输入与回复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastInteraction {
    pub user_input: String,
    pub assistant_response: String,
}

impl LastInteraction {
    pub fn new(user_input: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            assistant_response: assistant_response.into(),
        }
    }
}

/// 持久化单元；唯一写者是编排器
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_info: Option<Thread>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<LastInteraction>,
}

impl SessionContext {
    /// 已保存且 id 非空的线程
    pub fn thread(&self) -> Option<&Thread> {
        self.thread_info.as_ref().filter(|t| !t.id.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.thread_info.is_none() && self.last_interaction.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let ctx = SessionContext {
            thread_info: Some(Thread::new("t1")),
            last_interaction: Some(LastInteraction::new("hi", "hello")),
        };
        let v = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            v,
            json!({
                "threadInfo": {"id": "t1"},
                "lastInteraction": {"userInput": "hi", "assistantResponse": "hello"}
            })
        );
    }

    #[test]
    fn test_blank_thread_id_is_ignored() {
        let ctx: SessionContext = serde_json::from_value(json!({"threadInfo": {"id": ""}})).unwrap();
        assert!(ctx.thread().is_none());
        assert!(SessionContext::default().is_empty());
    }
}
