//! 工作流类型定义
//!
//! 工作流是有序步骤列表；每个步骤按种类携带强类型配置，并可指定 next（单个或列表，列表取第一个）。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type WorkflowId = String;
pub type StepId = String;

/// 工作流变量表
pub type Variables = serde_json::Map<String, Value>;

/// 工作流实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    /// 唯一可恢复的非终止状态
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// 后继步骤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Next {
    Single(StepId),
    List(Vec<StepId>),
}

impl Next {
    /// 顺序执行时取第一个
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(id) => Some(id),
            Self::List(ids) => ids.first().map(String::as_str),
        }
    }
}

impl From<&str> for Next {
    fn from(id: &str) -> Self {
        Self::Single(id.to_string())
    }
}

impl From<String> for Next {
    fn from(id: String) -> Self {
        Self::Single(id)
    }
}

impl From<Vec<String>> for Next {
    fn from(ids: Vec<String>) -> Self {
        Self::List(ids)
    }
}

/// 条件步骤的谓词
#[derive(Clone)]
pub enum Condition {
    /// variables[key] == value
    Equals { key: String, value: Value },
    /// variables 中存在 key
    Exists(String),
    /// variables[key] 为真值（非 null / false / 0 / 空串 / 空数组 / 空对象）
    Truthy(String),
    /// variables[key] 的字符串形式包含 needle
    Contains { key: String, needle: String },
    Custom(Arc<dyn Fn(&Variables) -> bool + Send + Sync>),
}

impl Condition {
    pub fn custom(f: impl Fn(&Variables) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn evaluate(&self, variables: &Variables) -> bool {
        match self {
            Self::Equals { key, value } => variables.get(key) == Some(value),
            Self::Exists(key) => variables.contains_key(key),
            Self::Truthy(key) => variables.get(key).map_or(false, is_truthy),
            Self::Contains { key, needle } => variables.get(key).map_or(false, |v| match v {
                Value::String(s) => s.contains(needle.as_str()),
                other => other.to_string().contains(needle.as_str()),
            }),
            Self::Custom(f) => f(variables),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { key, value } => write!(f, "Equals({} == {})", key, value),
            Self::Exists(key) => write!(f, "Exists({})", key),
            Self::Truthy(key) => write!(f, "Truthy({})", key),
            Self::Contains { key, needle } => write!(f, "Contains({} ~ {})", key, needle),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// agent 步骤配置
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStepConfig {
    pub agent: String,
    /// 提示词模板，支持 {{key}}
    pub prompt: String,
    /// 非对象结果写入的变量名；缺省为步骤 ID
    pub output_key: Option<String>,
}

/// tool 步骤配置
#[derive(Debug, Clone, PartialEq)]
pub struct ToolStepConfig {
    pub tool: String,
    /// 参数模板：其中所有字符串都做 {{key}} 替换
    pub args: Value,
    pub output_key: Option<String>,
}

/// 步骤种类
#[derive(Debug, Clone)]
pub enum StepKind {
    Start,
    End,
    Agent(AgentStepConfig),
    Tool(ToolStepConfig),
    Condition {
        predicate: Condition,
        if_true: StepId,
        if_false: StepId,
    },
    HumanInput {
        prompt: String,
    },
    /// 并发执行列出的 agent / tool 分支步骤
    Parallel {
        branches: Vec<StepId>,
    },
    SubWorkflow {
        workflow_id: WorkflowId,
    },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Agent(_) => "agent",
            Self::Tool(_) => "tool",
            Self::Condition { .. } => "condition",
            Self::HumanInput { .. } => "human_input",
            Self::Parallel { .. } => "parallel",
            Self::SubWorkflow { .. } => "subworkflow",
        }
    }
}

/// 工作流步骤
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub id: StepId,
    pub name: String,
    pub kind: StepKind,
    pub next: Option<Next>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            next: None,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, StepKind::Start)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, StepKind::End)
    }

    pub fn agent(id: impl Into<String>, agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Agent(AgentStepConfig {
                agent: agent.into(),
                prompt: prompt.into(),
                output_key: None,
            }),
        )
    }

    pub fn tool(id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self::new(
            id,
            StepKind::Tool(ToolStepConfig {
                tool: tool.into(),
                args,
                output_key: None,
            }),
        )
    }

    pub fn condition(
        id: impl Into<String>,
        predicate: Condition,
        if_true: impl Into<String>,
        if_false: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            StepKind::Condition {
                predicate,
                if_true: if_true.into(),
                if_false: if_false.into(),
            },
        )
    }

    pub fn human_input(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, StepKind::HumanInput { prompt: prompt.into() })
    }

    pub fn parallel(id: impl Into<String>, branches: Vec<String>) -> Self {
        Self::new(id, StepKind::Parallel { branches })
    }

    pub fn subworkflow(id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::SubWorkflow {
                workflow_id: workflow_id.into(),
            },
        )
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn then(mut self, next: impl Into<Next>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// 设置 agent / tool 步骤的输出变量名；其他种类忽略
    pub fn output_to(mut self, key: impl Into<String>) -> Self {
        match &mut self.kind {
            StepKind::Agent(config) => config.output_key = Some(key.into()),
            StepKind::Tool(config) => config.output_key = Some(key.into()),
            _ => {}
        }
        self
    }

    pub fn next_step(&self) -> Option<&str> {
        self.next.as_ref().and_then(Next::first)
    }
}

/// 工作流定义
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    /// 变量默认值，启动时与输入合并（输入优先）
    pub variables: Variables,
    /// 第 0 个步骤即入口
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn entry(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }
}

/// 单步执行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_id: StepId,
    pub step_type: String,
    #[serde(default)]
    pub result: Value,
    pub at: DateTime<Utc>,
}

/// 运行中的工作流实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    pub id: String,
    pub workflow_id: WorkflowId,
    pub variables: Variables,
    pub history: Vec<StepRecord>,
    pub current_step_id: Option<StepId>,
    pub status: WorkflowStatus,
    pub input: Variables,
    pub output: Option<Variables>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 工作流事件
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StepStart {
        context_id: String,
        step_id: StepId,
    },
    StepComplete {
        context_id: String,
        step_id: StepId,
        result: Value,
    },
    WorkflowPaused {
        context_id: String,
        reason: String,
        step_id: StepId,
    },
    WorkflowComplete {
        context_id: String,
        output: Variables,
    },
    WorkflowFailed {
        context_id: String,
        error: String,
    },
}

impl WorkflowEvent {
    pub fn context_id(&self) -> &str {
        match self {
            Self::StepStart { context_id, .. }
            | Self::StepComplete { context_id, .. }
            | Self::WorkflowPaused { context_id, .. }
            | Self::WorkflowComplete { context_id, .. }
            | Self::WorkflowFailed { context_id, .. } => context_id,
        }
    }
}

/// 工作流错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Workflow context not found: {0}")]
    ContextNotFound(String),

    #[error("Workflow context is not paused: {0}")]
    NotPaused(String),

    #[error("Workflow context is still active: {0}")]
    ContextActive(String),

    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Step {step_id} failed: {message}")]
    StepFailed { step_id: StepId, message: String },
}
