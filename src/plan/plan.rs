//! 计划：目标 + 有序任务列表
//!
//! 可执行任务按插入顺序（FIFO）选取，不按优先级排序；调整计划时整体替换，可保留旧任务。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{PlanError, Task, TaskStatus};

/// 计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub goal: String,
    tasks: Vec<Task>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self::with_tasks(goal, Vec::new())
    }

    pub fn with_tasks(goal: impl Into<String>, tasks: Vec<Task>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            goal: goal.into(),
            tasks,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
        self.updated_at = Utc::now();
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn get_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.updated_at = Utc::now();
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// 按 ID 取任务，不存在时返回 TaskNotFound
    pub fn task_mut(&mut self, task_id: &str) -> Result<&mut Task, PlanError> {
        self.get_task_mut(task_id)
            .ok_or_else(|| PlanError::TaskNotFound(task_id.to_string()))
    }

    pub fn remove_task(&mut self, task_id: &str) -> Result<Task, PlanError> {
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| PlanError::TaskNotFound(task_id.to_string()))?;
        self.updated_at = Utc::now();
        Ok(self.tasks.remove(index))
    }

    /// 原地移动：把 from 位置的任务移到 to 位置
    pub fn reorder_tasks(&mut self, from: usize, to: usize) -> Result<(), PlanError> {
        let len = self.tasks.len();
        for index in [from, to] {
            if index >= len {
                return Err(PlanError::IndexOutOfBounds { index, len });
            }
        }
        let task = self.tasks.remove(from);
        self.tasks.insert(to, task);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 所有任务均为 completed 或 cancelled
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_done())
    }

    /// 按数组顺序返回第一个可执行任务
    pub fn next_actionable_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.is_actionable())
    }

    /// 按数组顺序返回至多 max 个可执行任务
    pub fn all_actionable_tasks(&self, max: usize) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.is_actionable())
            .take(max)
            .collect()
    }

    /// (已完成数, 总数)
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        (done, self.tasks.len())
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// 整体替换计划：preserve 中列出的旧任务按原顺序移入新计划，其后接新任务
    pub fn adapt(mut self, goal: impl Into<String>, new_tasks: Vec<Task>, preserve: &[String]) -> Plan {
        let mut tasks: Vec<Task> = self
            .tasks
            .drain(..)
            .filter(|t| preserve.iter().any(|id| id == &t.id))
            .collect();
        tasks.extend(new_tasks);
        Plan::with_tasks(goal, tasks)
    }
}
