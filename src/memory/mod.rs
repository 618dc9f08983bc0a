//! 记忆层：短期（进程内）、长期（SQLite）、会话上下文持久化

pub mod context;
pub mod long_term;
pub mod persistence;
pub mod short_term;
pub mod store;

pub use context::{LastInteraction, SessionContext};
pub use long_term::{InMemoryLongTerm, LongTermStore, SqliteLongTerm};
pub use persistence::{ContextPersistence, FileContextPersistence};
pub use short_term::ShortTermMemory;
pub use store::{MemoryEntry, MemoryScope, MemoryStore, LAST_INTERACTION_KEY};
