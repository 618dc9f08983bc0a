//! 代码沙箱：在无能力的小型表达式语言里执行用户代码
//!
//! 执行放在 spawn_blocking 中，外层 tokio::time::timeout 限制墙钟时间；
//! 超时后置位该任务的取消标志，解释器在下一步检查时退出。
//! 并发任务数由 Semaphore 限制，每个任务的状态变化只进不退。

pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod policy;
pub mod value;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub use interpreter::Interpreter;
pub use policy::{SandboxPolicy, BUILTINS};
pub use value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxErrorKind {
    Syntax,
    Runtime,
    Timeout,
    PolicyViolation,
    ResourceLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxError {
    pub kind: SandboxErrorKind,
    pub message: String,
}

impl SandboxError {
    pub fn new(kind: SandboxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SandboxError {}

/// 成功时为输出文本
pub type SandboxResult = Result<String, SandboxError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Done,
    Error,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxJob {
    pub id: Uuid,
    pub source_code: String,
    pub status: JobStatus,
    /// 成功时为输出，失败时为错误描述
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SandboxJob {
    fn new(source_code: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_code: source_code.to_string(),
            status: JobStatus::Pending,
            output: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// 记录结果；已结束的任务不会再被改写
    fn finish(&mut self, result: &SandboxResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let (status, output) = match result {
            Ok(out) => (JobStatus::Done, out.clone()),
            Err(e) if e.kind == SandboxErrorKind::Timeout => (JobStatus::Timeout, e.to_string()),
            Err(e) => (JobStatus::Error, e.to_string()),
        };
        self.status = status;
        self.output = Some(output);
        self.finished_at = Some(Utc::now());
        true
    }
}

pub struct CodeSandbox {
    policy: Arc<SandboxPolicy>,
    semaphore: Arc<Semaphore>,
    /// 按创建顺序保存；已结束的任务超过 max_job_history 时从最旧的开始淘汰
    jobs: Mutex<VecDeque<SandboxJob>>,
}

impl CodeSandbox {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent_jobs.max(1))),
            policy: Arc::new(policy),
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// 执行一段代码，只返回结果
    pub async fn execute(&self, source_code: &str) -> SandboxResult {
        self.track(source_code).await.1
    }

    /// 执行一段代码并返回完整任务记录
    pub async fn run_job(&self, source_code: &str) -> SandboxJob {
        self.track(source_code).await.0
    }

    async fn track(&self, source_code: &str) -> (SandboxJob, SandboxResult) {
        let job = SandboxJob::new(source_code);
        let id = job.id;
        self.jobs().push_back(job);
        tracing::debug!(job_id = %id, "Sandbox job created");

        let result = self.run(source_code).await;
        match &result {
            Ok(_) => tracing::debug!(job_id = %id, "Sandbox job done"),
            Err(e) => tracing::info!(job_id = %id, kind = ?e.kind, "Sandbox job failed: {}", e.message),
        }

        let mut jobs = self.jobs();
        let finished = match jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.finish(&result);
                job.clone()
            }
            None => {
                let mut job = SandboxJob::new(source_code);
                job.id = id;
                job.finish(&result);
                job
            }
        };
        self.evict(&mut jobs);
        (finished, result)
    }

    /// 淘汰最旧的已结束任务；进行中的任务始终保留
    fn evict(&self, jobs: &mut VecDeque<SandboxJob>) {
        while jobs.len() > self.policy.max_job_history {
            match jobs.iter().position(|j| j.status.is_terminal()) {
                Some(oldest) => {
                    jobs.remove(oldest);
                }
                None => break,
            }
        }
    }

    pub fn job(&self, id: Uuid) -> Option<SandboxJob> {
        self.jobs().iter().find(|j| j.id == id).cloned()
    }

    /// 保留中的任务，按创建顺序
    pub fn jobs_snapshot(&self) -> Vec<SandboxJob> {
        self.jobs().iter().cloned().collect()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, VecDeque<SandboxJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(&self, source_code: &str) -> SandboxResult {
        let chars = source_code.chars().count();
        if chars > self.policy.max_source_chars {
            return Err(SandboxError::new(
                SandboxErrorKind::ResourceLimit,
                format!("source longer than {} characters", self.policy.max_source_chars),
            ));
        }

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::new(SandboxErrorKind::ResourceLimit, "sandbox is shut down"))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let policy = Arc::clone(&self.policy);
        let source = source_code.to_string();
        let flag = Arc::clone(&cancel);
        let handle = tokio::task::spawn_blocking(move || {
            // 许可随解释器一起释放，超时后仍在收尾的任务也计入并发上限
            let _permit = permit;
            let program = parser::parse(&source, policy.max_depth)?;
            Interpreter::new(&policy, &flag).run(&program)
        });

        match tokio::time::timeout(self.policy.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SandboxError::new(
                SandboxErrorKind::Runtime,
                format!("interpreter task failed: {e}"),
            )),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                Err(SandboxError::new(
                    SandboxErrorKind::Timeout,
                    format!("execution exceeded {} ms", self.policy.timeout.as_millis()),
                ))
            }
        }
    }
}
