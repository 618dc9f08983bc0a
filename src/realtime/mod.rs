//! 实时分析通道：文本分析 / 图像识别结果经 WebSocket 异步回推

pub mod channel;
pub mod message;

pub use channel::{PendingAnalysis, RealtimeChannel};
pub use message::{AnalysisKind, AnalysisRequest};
