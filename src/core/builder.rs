//! 会话构建器：按配置装配各组件
//!
//! 默认装配 reqwest 传输 + 重试客户端 + HTTP 助手服务、SQLite 长期记忆、
//! JSON 文件上下文、代码沙箱，以及配置了 url 时的实时通道。
//! 各组件都可以用 with_* 替换（测试中注入 Mock）。

use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{AssistantApi, HttpAssistantApi, ReqwestTransport, RetryPolicy, RetryingRequestClient};
use crate::config::AppConfig;
use crate::core::orchestrator::{AssistantOrchestrator, SessionProfile};
use crate::core::AssistantError;
use crate::memory::{ContextPersistence, FileContextPersistence, LongTermStore, MemoryStore, SqliteLongTerm};
#[cfg(feature = "realtime")]
use crate::realtime::RealtimeChannel;
use crate::sandbox::{CodeSandbox, SandboxPolicy};

/// 从环境变量读取 API 凭据；缺失或为空时返回 Auth 错误
pub fn credential_from_env(var: &str) -> Result<String, AssistantError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(AssistantError::Auth(format!("environment variable {} is not set", var))),
    }
}

pub struct SessionBuilder {
    config: AppConfig,
    api: Option<Arc<dyn AssistantApi>>,
    long_term: Option<Arc<dyn LongTermStore>>,
    persistence: Option<Arc<dyn ContextPersistence>>,
    #[cfg(feature = "realtime")]
    realtime: Option<Arc<RealtimeChannel>>,
}

impl SessionBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            api: None,
            long_term: None,
            persistence: None,
            #[cfg(feature = "realtime")]
            realtime: None,
        }
    }

    /// 替换远端助手服务（不再读取凭据）
    pub fn with_api(mut self, api: Arc<dyn AssistantApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_long_term(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term = Some(store);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn ContextPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    #[cfg(feature = "realtime")]
    pub fn with_realtime(mut self, channel: Arc<RealtimeChannel>) -> Self {
        self.realtime = Some(channel);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 构建 HTTP 助手服务：凭据缺失时在任何网络请求之前失败
    pub fn build_api(&self) -> Result<Arc<dyn AssistantApi>, AssistantError> {
        let credential = credential_from_env(&self.config.api.credential_env)?;
        let transport = ReqwestTransport::new(self.config.api.request_timeout_secs)?;
        let client = RetryingRequestClient::new(
            transport,
            Some(credential),
            RetryPolicy::from_config(&self.config.retry),
        );
        tracing::info!(base_url = %self.config.api.base_url, "Using HTTP assistant API");
        Ok(Arc::new(HttpAssistantApi::from_config(client, &self.config.api)))
    }

    fn context_path(&self) -> PathBuf {
        self.config.context_file_path()
    }

    pub fn build(self) -> Result<AssistantOrchestrator, AssistantError> {
        let api = match self.api.clone() {
            Some(api) => api,
            None => self.build_api()?,
        };
        let long_term: Arc<dyn LongTermStore> = match self.long_term.clone() {
            Some(store) => store,
            None => Arc::new(SqliteLongTerm::open(self.config.long_term_db_path())?),
        };
        let persistence: Arc<dyn ContextPersistence> = match self.persistence.clone() {
            Some(p) => p,
            None => Arc::new(FileContextPersistence::new(self.context_path())),
        };
        let sandbox = CodeSandbox::new(SandboxPolicy::from_config(&self.config.sandbox));

        let orchestrator = AssistantOrchestrator::new(
            api,
            Arc::new(MemoryStore::new(long_term)),
            persistence,
            Arc::new(sandbox),
            SessionProfile::from(&self.config.app),
        );

        #[cfg(feature = "realtime")]
        let orchestrator = match self
            .realtime
            .or_else(|| RealtimeChannel::from_config(&self.config.realtime).map(Arc::new))
        {
            Some(channel) => {
                tracing::info!(url = %channel.url(), "Realtime channel configured");
                orchestrator.with_realtime(channel)
            }
            None => orchestrator,
        };

        Ok(orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockAssistantApi;
    use crate::memory::InMemoryLongTerm;
    use tempfile::TempDir;

    #[test]
    fn test_missing_credential_is_auth_error() {
        let mut config = AppConfig::default();
        config.api.credential_env = "BESPOKE_TEST_CREDENTIAL_THAT_IS_NOT_SET".to_string();
        let err = SessionBuilder::new(config).build().err().unwrap();
        assert!(matches!(err, AssistantError::Auth(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_build_with_overrides() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.app.data_dir = dir.path().to_path_buf();

        let orch = SessionBuilder::new(config)
            .with_api(Arc::new(MockAssistantApi::new()))
            .with_long_term(Arc::new(InMemoryLongTerm::new()))
            .build()
            .unwrap();
        orch.bootstrap().await.unwrap();
        assert!(dir.path().join("context.json").exists());
        assert!(!dir.path().join("memory.db").exists());
    }
}
