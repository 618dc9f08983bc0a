//! 实时通道消息格式
//!
//! 出站：`{"type": "textAnalysis", "text": ...}` / `{"type": "imageRecognition", "imageUrl": ...}`
//! 入站：`{"type": ..., ...payload}`，按 type 路由，payload 为去掉 type 后的其余字段。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 分析类型，同时也是短期记忆中保存结果的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnalysisKind {
    TextAnalysis,
    ImageRecognition,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::TextAnalysis => "textAnalysis",
            AnalysisKind::ImageRecognition => "imageRecognition",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnalysisRequest {
    TextAnalysis {
        text: String,
    },
    ImageRecognition {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
}

impl AnalysisRequest {
    pub fn text(text: impl Into<String>) -> Self {
        AnalysisRequest::TextAnalysis { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        AnalysisRequest::ImageRecognition {
            image_url: image_url.into(),
        }
    }

    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisRequest::TextAnalysis { .. } => AnalysisKind::TextAnalysis,
            AnalysisRequest::ImageRecognition { .. } => AnalysisKind::ImageRecognition,
        }
    }
}

/// 解析入站消息为 (类型, 负载)
pub fn decode_inbound(text: &str) -> Result<(AnalysisKind, Value), String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("malformed message: {}", e))?;
    let Value::Object(mut fields) = value else {
        return Err("message is not a JSON object".to_string());
    };
    let tag = fields
        .remove("type")
        .ok_or_else(|| "message has no type".to_string())?;
    let kind: AnalysisKind =
        serde_json::from_value(tag.clone()).map_err(|_| format!("unknown message type {}", tag))?;
    Ok((kind, Value::Object(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_envelope() {
        let v = serde_json::to_value(AnalysisRequest::image("http://x/cat.png")).unwrap();
        assert_eq!(v, json!({"type": "imageRecognition", "imageUrl": "http://x/cat.png"}));
        let v = serde_json::to_value(AnalysisRequest::text("hello")).unwrap();
        assert_eq!(v, json!({"type": "textAnalysis", "text": "hello"}));
    }

    #[test]
    fn test_decode_inbound_strips_type() {
        let (kind, payload) = decode_inbound(r#"{"type":"textAnalysis","label":"positive","score":0.9}"#).unwrap();
        assert_eq!(kind, AnalysisKind::TextAnalysis);
        assert_eq!(payload, json!({"label": "positive", "score": 0.9}));
    }

    #[test]
    fn test_decode_inbound_rejects_unknown() {
        assert!(decode_inbound(r#"{"type":"weather"}"#).is_err());
        assert!(decode_inbound("[1,2]").is_err());
        assert!(decode_inbound("not json").is_err());
    }
}
