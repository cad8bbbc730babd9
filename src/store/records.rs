//! 持久化实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::SamplingParams;
use crate::memory::Message;
use crate::plan::{Plan, Task};
use crate::store::{Entity, EntityKind};

/// 对话线程快照（SpaceTask）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

/// Space 快照：每次状态变更后整体写回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceRecord {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub threads: Vec<ThreadRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for SpaceRecord {
    const KIND: EntityKind = EntityKind::Space;

    fn id(&self) -> &str {
        &self.id
    }
}

/// 计划任务的独立记录，按所属 Space 分组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub space_id: String,
    pub task: Task,
}

impl Entity for TaskRecord {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &str {
        &self.task.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.space_id)
    }
}

/// 产物：与 Space（可选关联 Task）绑定的文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub id: String,
    pub space_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn new(space_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("artifact_{}", uuid::Uuid::new_v4()),
            space_id: space_id.into(),
            task_id: None,
            name: name.into(),
            mime_type: None,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl Entity for ArtifactRecord {
    const KIND: EntityKind = EntityKind::Artifact;

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.space_id)
    }
}

/// Agent 配置（按名字寻址，名字即 ID）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// 工具 ID 列表，实例化时经 ToolRegistry::resolve 解析
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub params: SamplingParams,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            params: SamplingParams::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Entity for AgentProfile {
    const KIND: EntityKind = EntityKind::Agent;

    fn id(&self) -> &str {
        &self.name
    }
}

/// 工具配置记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Entity for ToolRecord {
    const KIND: EntityKind = EntityKind::Tool;

    fn id(&self) -> &str {
        &self.id
    }
}
