//! 远端助手 API 层：带重试的请求客户端、端点类型、HTTP / Mock 实现

pub mod http;
pub mod mock;
pub mod request;
pub mod retry;
pub mod traits;
pub mod types;

pub use http::HttpAssistantApi;
pub use mock::MockAssistantApi;
pub use request::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RetryingRequestClient};
pub use retry::RetryPolicy;
pub use traits::AssistantApi;
pub use types::{Assistant, RunRequest, RunResult, SentimentAnalysis, Thread};
