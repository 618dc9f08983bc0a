//! 短期记忆：进程生命周期内的键值表
//!
//! 每轮对话把整张表作为 context 附带给远端；进程重启即清空。

use std::collections::HashMap;

use serde_json::Value;

#[derive(Clone, Debug, Default)]
pub struct ShortTermMemory {
    entries: HashMap<String, Value>,
}

impl ShortTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（同键覆盖）
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
