//! 工作流：步骤图定义、模板、执行器接缝与引擎

pub mod builder;
pub mod engine;
pub mod executor;
pub mod template;
pub mod types;

pub use builder::WorkflowBuilder;
pub use engine::WorkflowEngine;
pub use executor::{DefaultStepExecutor, StepExecutor};
pub use template::{render, render_value};
pub use types::*;
