//! Shared conversation session and the orchestrator that feeds it through
//! the dispatcher.

pub mod bootstrap;
pub mod degraded;
pub mod error;
pub mod orchestrator;
pub mod session;

pub use bootstrap::orchestrator_from_settings;
pub use error::EngineError;
pub use orchestrator::{OrchestratorConfig, SendReply, SessionOrchestrator};
pub use session::{ConversationSession, SessionLimits, SessionStats};
