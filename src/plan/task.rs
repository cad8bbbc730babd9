//! 计划任务：状态机与序列化
//!
//! 状态转换：pending → running（start）、running → completed（complete，计算耗时）、
//! 任意 → failed / blocked / cancelled。非法转换返回 `PlanError::InvalidTransition`。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanError;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    /// completed 或 cancelled：计划完成判定只看这两种
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// 任务依赖
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: String,
    /// 必需依赖未满足时任务不可执行；可选依赖仅作提示
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl TaskDependency {
    pub fn required(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            required: true,
        }
    }

    pub fn optional(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            required: false,
        }
    }
}

/// 任务内的执行步骤（清单项）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

/// 计划中的一个工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<TaskDependency>,
    #[serde(default)]
    pub steps: Vec<TaskStep>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// complete 时根据 started_at / completed_at 计算
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            assigned_to: None,
            priority: TaskPriority::Normal,
            dependencies: Vec::new(),
            steps: Vec::new(),
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
            blocked_reason: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dependency: TaskDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn assign(&mut self, agent: impl Into<String>) {
        self.assigned_to = Some(agent.into());
        self.touch();
    }

    pub fn add_step(&mut self, description: impl Into<String>) {
        self.steps.push(TaskStep {
            description: description.into(),
            completed: false,
        });
        self.touch();
    }

    /// pending → running
    pub fn start(&mut self) -> Result<(), PlanError> {
        self.ensure_from(TaskStatus::Pending, TaskStatus::Running)?;
        let now = Utc::now();
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// running → completed，并记录耗时
    pub fn complete(&mut self) -> Result<(), PlanError> {
        self.ensure_from(TaskStatus::Running, TaskStatus::Completed)?;
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds());
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(reason.into());
        self.touch();
    }

    pub fn block(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Blocked;
        self.blocked_reason = Some(reason.into());
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.touch();
    }

    /// pending 且没有未满足的必需依赖
    pub fn is_actionable(&self) -> bool {
        self.status == TaskStatus::Pending && !self.has_blocking_dependencies()
    }

    /// 依赖解析的扩展点：目前不做依赖检查，始终返回 false
    pub fn has_blocking_dependencies(&self) -> bool {
        false
    }

    pub fn required_dependencies(&self) -> impl Iterator<Item = &TaskDependency> {
        self.dependencies.iter().filter(|d| d.required)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    fn ensure_from(&self, expected: TaskStatus, to: TaskStatus) -> Result<(), PlanError> {
        if self.status != expected {
            return Err(PlanError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_only_from_pending() {
        let mut task = Task::new("a", "");
        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        let err = task.start().unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidTransition {
                from: TaskStatus::Running,
                to: TaskStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_complete_only_from_running() {
        let mut task = Task::new("a", "");
        assert!(matches!(
            task.complete(),
            Err(PlanError::InvalidTransition { from: TaskStatus::Pending, .. })
        ));

        task.start().unwrap();
        task.complete().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.duration_ms.unwrap() >= 0);

        assert!(task.complete().is_err());
    }

    #[test]
    fn test_fail_block_cancel_from_any_state() {
        let mut task = Task::new("a", "");
        task.block("waiting for review");
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(task.blocked_reason.as_deref(), Some("waiting for review"));
        assert!(task.start().is_err());

        task.fail("boom");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));

        task.cancel();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_actionable_ignores_dependencies() {
        let task = Task::new("a", "").with_dependency(TaskDependency::required("missing"));
        assert!(task.is_actionable());
        assert_eq!(task.required_dependencies().count(), 1);

        let mut running = Task::new("b", "");
        running.start().unwrap();
        assert!(!running.is_actionable());
    }

    #[test]
    fn test_json_round_trip() {
        let mut task = Task::new("write docs", "README")
            .with_dependency(TaskDependency::required("t1"))
            .with_dependency(TaskDependency::optional("t2"))
            .with_tag("docs");
        task.start().unwrap();
        task.complete().unwrap();

        let json = task.to_json();
        let created = json["createdAt"].as_str().unwrap().to_string();
        let completed = json["completedAt"].as_str().unwrap().to_string();

        let restored = Task::from_json(json).unwrap();
        assert_eq!(restored.status, task.status);
        assert_eq!(restored.dependencies, task.dependencies);
        assert_eq!(restored.to_json()["createdAt"].as_str().unwrap(), created);
        assert_eq!(restored.to_json()["completedAt"].as_str().unwrap(), completed);
        assert!(chrono::DateTime::parse_from_rfc3339(&created).is_ok());
    }

    #[test]
    fn test_dependency_defaults_to_required() {
        let dep: TaskDependency = serde_json::from_str(r#"{"task_id": "x"}"#).unwrap();
        assert!(dep.required);
    }
}
