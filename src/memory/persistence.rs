//! 会话上下文持久化
//!
//! 将 SessionContext 写入/从 JSON 文件加载。加载失败（不存在、读失败、解析失败）
//! 一律退化为空上下文并记录日志；保存先写临时文件再 rename，避免崩溃时留下半截文件。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::AssistantError;
use crate::memory::SessionContext;

#[async_trait]
pub trait ContextPersistence: Send + Sync {
    /// 加载上下文；任何失败都返回空上下文
    async fn load(&self) -> SessionContext;

    /// 保存上下文；同一上下文保存两次结果相同
    async fn save(&self, context: &SessionContext) -> Result<(), AssistantError>;
}

/// 单文件 JSON 持久化
#[derive(Debug, Clone)]
pub struct FileContextPersistence {
    path: PathBuf,
}

impl FileContextPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "context.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ContextPersistence for FileContextPersistence {
    async fn load(&self) -> SessionContext {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SessionContext::default(),
            Err(e) => {
                tracing::error!(path = %self.path.display(), "Could not load context: {}", e);
                return SessionContext::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(path = %self.path.display(), "Could not parse context: {}", e);
                SessionContext::default()
            }
        }
    }

    async fn save(&self, context: &SessionContext) -> Result<(), AssistantError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(context)
            .map_err(|e| AssistantError::Persistence(e.to_string()))?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "Context saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Thread;
    use crate::memory::LastInteraction;
    use tempfile::TempDir;

    fn sample() -> SessionContext {
        let mut thread = Thread::new("t1");
        thread.assistant_id = Some("a1".into());
        thread.title = Some("Persistent Session".into());
        thread.extra.insert("object".into(), serde_json::json!("thread"));
        SessionContext {
            thread_info: Some(thread),
            last_interaction: Some(LastInteraction::new("hello", "hi there")),
        }
    }

    #[tokio::test]
    async fn test_save_then_load_on_fresh_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("context.json");
        FileContextPersistence::new(&path).save(&sample()).await.unwrap();

        let loaded = FileContextPersistence::new(&path).load().await;
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let p = FileContextPersistence::new(dir.path().join("nope.json"));
        assert!(p.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(FileContextPersistence::new(&path).load().await, SessionContext::default());
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");
        let p = FileContextPersistence::new(&path);

        p.save(&sample()).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        p.save(&sample()).await.unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
        assert!(!p.temp_path().exists());
    }
}
