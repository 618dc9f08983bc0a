//! 核心编排层：错误、会话状态、会话监管、编排器与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use builder::{credential_from_env, SessionBuilder};
pub use error::AssistantError;
pub use orchestrator::{
    last_interaction_key, AssistantOrchestrator, Session, SessionProfile, TurnOutcome, ASSISTANT_ID_KEY,
    CODE_PREFIX,
};
pub use session_supervisor::SessionSupervisor;
pub use state::{FailureReason, SessionState};
