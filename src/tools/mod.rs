//! 工具层：统一的工具抽象、注册表与带超时审计的执行器

pub mod echo;
pub mod executor;
pub mod registry;

pub use echo::EchoTool;
pub use executor::{ToolCaller, ToolExecutor};
pub use registry::{tool_spec, Tool, ToolRegistry};
