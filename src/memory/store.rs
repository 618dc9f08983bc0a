//! MemoryStore：短期 + 长期记忆的组合
//!
//! 每个会话持有一个实例（不存在全局记忆表）。短期部分是进程内 Map，
//! 长期部分委托给 LongTermStore，并在 spawn_blocking 中执行以免阻塞运行时。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AssistantError;
use crate::memory::{InMemoryLongTerm, LastInteraction, LongTermStore, ShortTermMemory};

/// 短期记忆中保存最近一轮对话的键
pub const LAST_INTERACTION_KEY: &str = "last_interaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Short,
    Long,
}

/// 带作用域的记忆条目；同一作用域内键唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub scope: MemoryScope,
    pub key: String,
    pub value: Value,
}

impl MemoryEntry {
    pub fn short(key: impl Into<String>, value: Value) -> Self {
        Self { scope: MemoryScope::Short, key: key.into(), value }
    }

    pub fn long(key: impl Into<String>, value: Value) -> Self {
        Self { scope: MemoryScope::Long, key: key.into(), value }
    }
}

pub struct MemoryStore {
    short_term: Mutex<ShortTermMemory>,
    long_term: Arc<dyn LongTermStore>,
}

impl MemoryStore {
    pub fn new(long_term: Arc<dyn LongTermStore>) -> Self {
        Self {
            short_term: Mutex::new(ShortTermMemory::new()),
            long_term,
        }
    }

    /// 仅内存（长期部分也不落盘）
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLongTerm::new()))
    }

    fn short(&self) -> std::sync::MutexGuard<'_, ShortTermMemory> {
        // 短期表里只有普通数据，锁中毒时沿用内部值
        self.short_term.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.short().set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.short().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.short().remove(key)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.short().snapshot()
    }

    pub fn clear_short_term(&self) {
        self.short().clear();
    }

    pub fn set_last_interaction(&self, interaction: &LastInteraction) {
        match serde_json::to_value(interaction) {
            Ok(v) => self.set(LAST_INTERACTION_KEY, v),
            Err(e) => tracing::warn!("Could not encode last interaction: {}", e),
        }
    }

    pub fn last_interaction(&self) -> Option<LastInteraction> {
        self.get(LAST_INTERACTION_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// 写入长期记忆
    pub async fn put(&self, key: &str, value: Value) -> Result<(), AssistantError> {
        let store = Arc::clone(&self.long_term);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.put(&key, &value))
            .await
            .map_err(|e| AssistantError::Persistence(format!("long-term put task failed: {e}")))?
    }

    /// 读取长期记忆
    pub async fn recall(&self, key: &str) -> Result<Option<Value>, AssistantError> {
        let store = Arc::clone(&self.long_term);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| AssistantError::Persistence(format!("long-term get task failed: {e}")))?
    }

    pub async fn forget(&self, key: &str) -> Result<bool, AssistantError> {
        let store = Arc::clone(&self.long_term);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.delete(&key))
            .await
            .map_err(|e| AssistantError::Persistence(format!("long-term delete task failed: {e}")))?
    }

    /// 按作用域写入条目
    pub async fn store(&self, entry: MemoryEntry) -> Result<(), AssistantError> {
        match entry.scope {
            MemoryScope::Short => {
                self.set(entry.key, entry.value);
                Ok(())
            }
            MemoryScope::Long => self.put(&entry.key, entry.value).await,
        }
    }

    /// 按作用域读取条目
    pub async fn lookup(&self, scope: MemoryScope, key: &str) -> Result<Option<MemoryEntry>, AssistantError> {
        let value = match scope {
            MemoryScope::Short => self.get(key),
            MemoryScope::Long => self.recall(key).await?,
        };
        Ok(value.map(|value| MemoryEntry { scope, key: key.to_string(), value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let memory = MemoryStore::in_memory();
        memory.store(MemoryEntry::short("k", json!("short"))).await.unwrap();
        memory.store(MemoryEntry::long("k", json!("long"))).await.unwrap();

        let short = memory.lookup(MemoryScope::Short, "k").await.unwrap().unwrap();
        let long = memory.lookup(MemoryScope::Long, "k").await.unwrap().unwrap();
        assert_eq!(short.value, json!("short"));
        assert_eq!(long.value, json!("long"));

        memory.clear_short_term();
        assert!(memory.lookup(MemoryScope::Short, "k").await.unwrap().is_none());
        assert!(memory.lookup(MemoryScope::Long, "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_long_term_read_after_write() {
        let memory = MemoryStore::in_memory();
        memory.put("n", json!(1)).await.unwrap();
        memory.put("n", json!(2)).await.unwrap();
        assert_eq!(memory.recall("n").await.unwrap(), Some(json!(2)));
        assert!(memory.forget("n").await.unwrap());
        assert_eq!(memory.recall("n").await.unwrap(), None);
    }

    #[test]
    fn test_last_interaction_round_trip() {
        let memory = MemoryStore::in_memory();
        assert!(memory.last_interaction().is_none());
        memory.set_last_interaction(&LastInteraction::new("q", "a"));
        assert_eq!(memory.last_interaction(), Some(LastInteraction::new("q", "a")));
        assert!(memory.snapshot().contains_key(LAST_INTERACTION_KEY));
    }
}
