//! 计划层：目标分解后的 Plan / Task 实体、状态机与 LLM 计划生成

pub mod generator;
#[allow(clippy::module_inception)]
pub mod plan;
pub mod task;

use thiserror::Error;

pub use generator::{PlanGenerator, TaskDraft};
pub use plan::Plan;
pub use task::{Task, TaskDependency, TaskPriority, TaskStatus, TaskStep};

/// 计划 / 任务操作错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Task not found: {0}")]
    TaskNotFound(String),
}
