//! 长期记忆：跨进程保留的键值存储
//!
//! put 成功后 get 必须读到最新值。当前实现：SqliteLongTerm（rusqlite，单表 upsert）
//! 与 InMemoryLongTerm（测试 / 未配置数据库时使用）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::core::AssistantError;

/// 长期记忆 trait：同步接口，异步调用方经 spawn_blocking 使用
pub trait LongTermStore: Send + Sync {
    fn put(&self, key: &str, value: &Value) -> Result<(), AssistantError>;

    fn get(&self, key: &str) -> Result<Option<Value>, AssistantError>;

    /// 删除键，返回是否存在过
    fn delete(&self, key: &str) -> Result<bool, AssistantError>;

    fn keys(&self) -> Result<Vec<String>, AssistantError>;
}

/// 内存实现
#[derive(Default)]
pub struct InMemoryLongTerm {
    store: RwLock<HashMap<String, Value>>,
}

impl InMemoryLongTerm {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> AssistantError {
    AssistantError::Persistence("long-term store lock poisoned".to_string())
}

impl LongTermStore for InMemoryLongTerm {
    fn put(&self, key: &str, value: &Value) -> Result<(), AssistantError> {
        self.store.write().map_err(poisoned)?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, AssistantError> {
        Ok(self.store.read().map_err(poisoned)?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, AssistantError> {
        Ok(self.store.write().map_err(poisoned)?.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, AssistantError> {
        let mut keys: Vec<String> = self.store.read().map_err(poisoned)?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// SQLite 实现：表 long_term_memory(key PRIMARY KEY, value JSON 文本, updated_at)
pub struct SqliteLongTerm {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteLongTerm {
    /// 打开或创建数据库；父目录不存在时自动创建
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, AssistantError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;
        tracing::info!(path = %db_path.display(), "Long-term memory opened");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), AssistantError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS long_term_memory (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

impl LongTermStore for SqliteLongTerm {
    fn put(&self, key: &str, value: &Value) -> Result<(), AssistantError> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.execute(
            "INSERT INTO long_term_memory (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value.to_string(), now],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, AssistantError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM long_term_memory WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                AssistantError::Persistence(format!("corrupt long-term value for `{key}`: {e}"))
            })
        })
        .transpose()
    }

    fn delete(&self, key: &str) -> Result<bool, AssistantError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let n = conn.execute("DELETE FROM long_term_memory WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    fn keys(&self) -> Result<Vec<String>, AssistantError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn.prepare("SELECT key FROM long_term_memory ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_read_after_write() {
        let dir = TempDir::new().unwrap();
        let store = SqliteLongTerm::open(dir.path().join("memory.db")).unwrap();

        store.put("user:name", &json!("Ada")).unwrap();
        store.put("user:name", &json!("Grace")).unwrap();
        assert_eq!(store.get("user:name").unwrap(), Some(json!("Grace")));
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.keys().unwrap(), vec!["user:name".to_string()]);
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        {
            let store = SqliteLongTerm::open(&path).unwrap();
            store.put("prefs", &json!({"theme": "dark"})).unwrap();
        }
        let store = SqliteLongTerm::open(&path).unwrap();
        assert_eq!(store.get("prefs").unwrap(), Some(json!({"theme": "dark"})));
        assert!(store.delete("prefs").unwrap());
        assert!(!store.delete("prefs").unwrap());
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryLongTerm::new();
        store.put("b", &json!(2)).unwrap();
        store.put("a", &json!(1)).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.get("a").unwrap(), Some(json!(1)));
    }
}
