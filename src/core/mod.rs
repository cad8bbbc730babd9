//! 核心编排层：错误、Space 容器、协作、并行调度、会话监管、编排器

pub mod collaboration;
pub mod error;
pub mod orchestrator;
pub mod parallel;
pub mod session_supervisor;
pub mod space;

pub use collaboration::{CollaborationManager, CollaborationMessage, ListenerId, SharedContext, BROADCAST};
pub use error::{OrchestraError, Result};
pub use orchestrator::{OrchestraRequest, Orchestrator, ResponseStream};
pub use parallel::{AgentExecutor, ParallelEngine, ParallelResult, ParallelTask};
pub use session_supervisor::SessionSupervisor;
pub use space::{Space, SpaceThread};
