//! 助手编排器：会话生命周期
//!
//! 引导：创建助手 → 复用或创建线程 → Ready，在独立任务中运行并由所有调用方共享，失败为终态。
//! 每轮对话持有会话级 Mutex，保证 lastInteraction 不会混入两轮的内容。
//! 状态变化通过 watch 通道投影给调用方。

use std::sync::Arc;

use serde_json::Value;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, Mutex};

use crate::api::{Assistant, AssistantApi, RunRequest, Thread};
use crate::config::AppSection;
use crate::core::{AssistantError, FailureReason, SessionState, SessionSupervisor};
use crate::memory::{ContextPersistence, LastInteraction, MemoryStore, SessionContext};
#[cfg(feature = "realtime")]
use crate::realtime::{AnalysisKind, RealtimeChannel};
use crate::sandbox::CodeSandbox;

/// 进入沙箱执行的输入前缀
pub const CODE_PREFIX: &str = "code:";

/// 长期记忆中助手 id 的键
pub const ASSISTANT_ID_KEY: &str = "assistant_id";

/// 长期记忆中某线程最近一轮的键
pub fn last_interaction_key(thread_id: &str) -> String {
    format!("last_interaction:{}", thread_id)
}

/// 创建助手与线程时使用的资料
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub assistant_name: String,
    pub assistant_description: String,
    pub thread_title: String,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self::from(&AppSection::default())
    }
}

impl From<&AppSection> for SessionProfile {
    fn from(app: &AppSection) -> Self {
        Self {
            assistant_name: app.assistant_name.clone(),
            assistant_description: app.assistant_description.clone(),
            thread_title: app.thread_title.clone(),
        }
    }
}

/// 引导完成后的会话身份
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub assistant: Assistant,
    pub thread: Thread,
}

/// 单轮处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// `code:` 输入的沙箱输出
    Code(String),
    /// 远端助手的回复
    Reply {
        response: String,
        /// 情感分析结果，服务不可用时为 None
        sentiment: Option<Value>,
        raw: Value,
    },
}

impl TurnOutcome {
    /// 展示给用户的文本
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Code(out) => out,
            TurnOutcome::Reply { response, .. } => response,
        }
    }
}

/// 引导任务的结果；None 表示会话在引导完成前被拆除
type BootstrapOutcome = Option<Result<Session, FailureReason>>;

/// 进行中或已完成的引导任务，所有调用方共享
type SharedBootstrap = Shared<BoxFuture<'static, BootstrapOutcome>>;

/// 引导任务与每轮对话共用的会话状态
struct SessionCore {
    api: Arc<dyn AssistantApi>,
    memory: Arc<MemoryStore>,
    persistence: Arc<dyn ContextPersistence>,
    profile: SessionProfile,
    state_tx: watch::Sender<SessionState>,
    /// 当前上下文，同时作为每轮对话的互斥锁
    context: Mutex<SessionContext>,
}

pub struct AssistantOrchestrator {
    core: Arc<SessionCore>,
    sandbox: Arc<CodeSandbox>,
    #[cfg(feature = "realtime")]
    realtime: Option<Arc<RealtimeChannel>>,
    supervisor: SessionSupervisor,
    bootstrap: std::sync::Mutex<Option<SharedBootstrap>>,
}

impl AssistantOrchestrator {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        memory: Arc<MemoryStore>,
        persistence: Arc<dyn ContextPersistence>,
        sandbox: Arc<CodeSandbox>,
        profile: SessionProfile,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        Self {
            core: Arc::new(SessionCore {
                api,
                memory,
                persistence,
                profile,
                state_tx,
                context: Mutex::new(SessionContext::default()),
            }),
            sandbox,
            #[cfg(feature = "realtime")]
            realtime: None,
            supervisor: SessionSupervisor::new(),
            bootstrap: std::sync::Mutex::new(None),
        }
    }

    #[cfg(feature = "realtime")]
    pub fn with_realtime(mut self, channel: Arc<RealtimeChannel>) -> Self {
        self.realtime = Some(channel);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.core.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.core.state_tx.borrow().clone()
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.core.memory
    }

    pub fn sandbox(&self) -> &Arc<CodeSandbox> {
        &self.sandbox
    }

    /// 引导成功后的会话身份
    pub fn session(&self) -> Option<Session> {
        self.bootstrap_slot()
            .as_ref()
            .and_then(|task| task.peek().cloned())
            .flatten()
            .and_then(Result::ok)
    }

    /// 当前（已持久化或待持久化的）上下文
    pub async fn context(&self) -> SessionContext {
        self.core.context.lock().await.clone()
    }

    fn bootstrap_slot(&self) -> std::sync::MutexGuard<'_, Option<SharedBootstrap>> {
        self.bootstrap.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 引导会话；并发调用共享同一次引导，失败后不再重试
    ///
    /// 引导在独立任务中运行，调用方被丢弃不会中断它；会话拆除时任务随之结束。
    pub async fn bootstrap(&self) -> Result<Session, AssistantError> {
        let task = self.bootstrap_task();
        match self.supervisor.run(async { Ok(task.await) }).await? {
            Some(result) => result.map_err(AssistantError::SessionFailed),
            None => Err(AssistantError::Cancelled),
        }
    }

    fn bootstrap_task(&self) -> SharedBootstrap {
        self.bootstrap_slot()
            .get_or_insert_with(|| {
                let core = Arc::clone(&self.core);
                let token = self.supervisor.cancel_token();
                let handle = tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        result = core.run_bootstrap() => Some(result),
                    }
                });
                async move {
                    handle.await.unwrap_or_else(|e| {
                        Some(Err(FailureReason::AssistantUnavailable(format!("bootstrap task failed: {e}"))))
                    })
                }
                .boxed()
                .shared()
            })
            .clone()
    }
}

impl SessionCore {
    fn advance(&self, next: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                tracing::debug!(from = ?current, to = ?next, "Session state changed");
                *current = next;
                true
            } else {
                false
            }
        });
    }

    fn fail(&self, reason: FailureReason) -> FailureReason {
        tracing::error!("Session bootstrap failed: {}", reason);
        self.advance(SessionState::Failed(reason.clone()));
        reason
    }

    async fn run_bootstrap(&self) -> Result<Session, FailureReason> {
        let assistant = self
            .api
            .create_assistant(&self.profile.assistant_name, &self.profile.assistant_description)
            .await
            .map_err(|e| {
                self.fail(match e {
                    AssistantError::Protocol(_) => FailureReason::NoAssistantId,
                    AssistantError::Auth(m) => FailureReason::Unauthorized(m),
                    other => FailureReason::AssistantUnavailable(other.to_string()),
                })
            })?;
        if assistant.id.trim().is_empty() {
            return Err(self.fail(FailureReason::NoAssistantId));
        }
        tracing::info!(assistant_id = %assistant.id, "Assistant created");
        self.advance(SessionState::AssistantCreated);

        if let Err(e) = self.memory.put(ASSISTANT_ID_KEY, Value::String(assistant.id.clone())).await {
            tracing::warn!("Could not record assistant id: {}", e);
        }

        let mut ctx = self.persistence.load().await;
        let thread = match ctx.thread().cloned() {
            Some(thread) => {
                tracing::info!(thread_id = %thread.id, "Reusing persisted thread");
                thread
            }
            None => {
                let thread = self
                    .api
                    .create_thread(&assistant.id, &self.profile.thread_title)
                    .await
                    .map_err(|e| {
                        self.fail(match e {
                            AssistantError::Protocol(_) => FailureReason::NoThreadId,
                            AssistantError::Auth(m) => FailureReason::Unauthorized(m),
                            other => FailureReason::ThreadUnavailable(other.to_string()),
                        })
                    })?;
                if thread.id.trim().is_empty() {
                    return Err(self.fail(FailureReason::NoThreadId));
                }
                tracing::info!(thread_id = %thread.id, "Thread created");
                ctx.thread_info = Some(thread.clone());
                if let Err(e) = self.persistence.save(&ctx).await {
                    tracing::error!("Could not persist new thread: {}", e);
                }
                thread
            }
        };
        self.advance(SessionState::ThreadEstablished);

        if let Some(last) = &ctx.last_interaction {
            self.memory.set_last_interaction(last);
        }
        *self.context.lock().await = ctx;

        self.advance(SessionState::Ready);
        tracing::info!(assistant_id = %assistant.id, thread_id = %thread.id, "Session ready");
        Ok(Session { assistant, thread })
    }
}

impl AssistantOrchestrator {
    /// 处理一次用户输入
    pub async fn handle_input(&self, input: &str) -> Result<TurnOutcome, AssistantError> {
        if self.supervisor.is_cancelled() {
            return Err(AssistantError::Cancelled);
        }
        let session = self.bootstrap().await?;

        if let Some(code) = input.trim_start().strip_prefix(CODE_PREFIX) {
            let output = self.sandbox.execute(code.trim()).await?;
            return Ok(TurnOutcome::Code(output));
        }

        let mut ctx = self.core.context.lock().await;

        let sentiment = match self.supervisor.run(self.core.api.analyze_sentiment(input)).await {
            Ok(s) => Some(s.raw),
            Err(AssistantError::Cancelled) => return Err(AssistantError::Cancelled),
            Err(e) => {
                tracing::warn!("Sentiment analysis unavailable: {}", e);
                None
            }
        };

        let request = RunRequest {
            thread_id: session.thread.id.clone(),
            input_text: input.to_string(),
            attached_context: self.core.memory.snapshot(),
        };
        let result = self
            .supervisor
            .run(self.core.api.create_run(&request))
            .await
            .map_err(|e| {
                tracing::warn!(thread_id = %request.thread_id, "Run failed: {}", e);
                e
            })?;

        let interaction = LastInteraction::new(input, &result.response);
        self.core.memory.set_last_interaction(&interaction);
        match serde_json::to_value(&interaction) {
            Ok(v) => {
                if let Err(e) = self.core.memory.put(&last_interaction_key(&request.thread_id), v).await {
                    tracing::warn!("Could not record last interaction: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not encode last interaction: {}", e),
        }

        ctx.last_interaction = Some(interaction);
        if let Err(e) = self.core.persistence.save(&ctx).await {
            // 下一轮保存时会再次写入
            tracing::error!("Could not persist context: {}", e);
        }

        Ok(TurnOutcome::Reply {
            response: result.response,
            sentiment,
            raw: result.raw,
        })
    }

    #[cfg(feature = "realtime")]
    async fn analyze(&self, kind: AnalysisKind, input: &str) -> Result<Value, AssistantError> {
        if self.supervisor.is_cancelled() {
            return Err(AssistantError::Cancelled);
        }
        let channel = self
            .realtime
            .as_ref()
            .ok_or_else(|| AssistantError::Network("realtime channel not configured".to_string()))?;
        let payload = match kind {
            AnalysisKind::TextAnalysis => self.supervisor.run(channel.analyze_text(input)).await?,
            AnalysisKind::ImageRecognition => self.supervisor.run(channel.recognize_image(input)).await?,
        };
        self.core.memory.set(kind.as_str(), payload.clone());
        Ok(payload)
    }

    /// 通过实时通道做文本分析，结果写入短期记忆 `textAnalysis`
    #[cfg(feature = "realtime")]
    pub async fn analyze_text(&self, text: &str) -> Result<Value, AssistantError> {
        self.analyze(AnalysisKind::TextAnalysis, text).await
    }

    /// 通过实时通道做图像识别，结果写入短期记忆 `imageRecognition`
    #[cfg(feature = "realtime")]
    pub async fn recognize_image(&self, image_url: &str) -> Result<Value, AssistantError> {
        self.analyze(AnalysisKind::ImageRecognition, image_url).await
    }

    /// 拆除会话：放弃进行中的请求并关闭实时通道
    pub async fn shutdown(&self) {
        self.supervisor.cancel();
        self.close_realtime().await;
        tracing::info!("Session shut down");
    }

    #[cfg(feature = "realtime")]
    async fn close_realtime(&self) {
        if let Some(channel) = &self.realtime {
            channel.close().await;
        }
    }

    #[cfg(not(feature = "realtime"))]
    async fn close_realtime(&self) {}

    pub fn is_shut_down(&self) -> bool {
        self.supervisor.is_cancelled()
    }
}
