//! 编排层错误类型
//!
//! 校验错误与未找到错误同步抛给调用方（由外部 API 边界翻译成客户端错误）；
//! 单元失败由并行引擎隔离，工作流致命错误只终止对应上下文，后台错误仅记录日志。

use thiserror::Error;

use crate::llm::LlmError;
use crate::plan::PlanError;
use crate::store::StoreError;
use crate::workflow::WorkflowError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum OrchestraError {
    /// 调用方可修正的请求错误（缺少委派目标、不支持的模式等）
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Space not found: {0}")]
    SpaceNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Conversation thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl OrchestraError {
    /// 是否属于调用方错误（校验 / 未找到），API 边界据此返回 4xx
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::SpaceNotFound(_)
                | Self::AgentNotFound(_)
                | Self::ThreadNotFound(_)
                | Self::Plan(_)
        ) || matches!(
            self,
            Self::Workflow(
                WorkflowError::WorkflowNotFound(_)
                    | WorkflowError::NotPaused(_)
                    | WorkflowError::ContextActive(_)
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestraError>;
