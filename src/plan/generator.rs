//! 计划生成：让 LLM 把目标拆成任务列表
//!
//! 期望输出 JSON 数组 `[{"title", "description", "priority", "dependencies"}]`，可包在 ```json 代码块中；
//! 解析失败时退化为只含一个任务（目标本身）的计划。

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{GenerateRequest, LlmClient, LlmError};
use crate::memory::Message;
use crate::plan::{Plan, Task, TaskDependency, TaskPriority};

const DEFAULT_PLANNER_PROMPT: &str = "You are a planning assistant. Break the user's goal into a short ordered list of tasks. \
Respond ONLY with a JSON array: [{\"title\": \"...\", \"description\": \"...\", \"priority\": \"low|normal|high|urgent\", \"dependencies\": [<index of earlier task>]}]";

/// LLM 输出中的单个任务草稿
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    /// 依赖的前序任务下标
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

/// 从 LLM 文本中提取任务草稿（```json 代码块或第一个 `[` 到最后一个 `]`）
pub fn parse_task_list(output: &str) -> Option<Vec<TaskDraft>> {
    let trimmed = output.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        let start = trimmed.find('[')?;
        let end = trimmed.rfind(']')?;
        if end < start {
            return None;
        }
        &trimmed[start..=end]
    };

    let drafts: Vec<TaskDraft> = serde_json::from_str(json_str).ok()?;
    let drafts: Vec<TaskDraft> = drafts
        .into_iter()
        .filter(|d| !d.title.trim().is_empty())
        .collect();
    if drafts.is_empty() {
        None
    } else {
        Some(drafts)
    }
}

/// 草稿转任务：下标依赖换成任务 ID，越界或指向自身及之后的下标被丢弃
pub fn drafts_to_tasks(drafts: Vec<TaskDraft>) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::with_capacity(drafts.len());
    for (index, draft) in drafts.into_iter().enumerate() {
        let mut task = Task::new(draft.title, draft.description).with_priority(draft.priority);
        for dep in draft.dependencies.into_iter().filter(|d| *d < index) {
            task = task.with_dependency(TaskDependency::required(tasks[dep].id.clone()));
        }
        tasks.push(task);
    }
    tasks
}

/// 计划生成器：持有 LLM 与 system prompt
pub struct PlanGenerator {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl PlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: DEFAULT_PLANNER_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub async fn generate(&self, goal: &str) -> Result<Plan, LlmError> {
        let request = GenerateRequest::new(self.system_prompt.clone(), vec![Message::user(goal)]);
        let generation = self.llm.generate(&request).await?;

        let tasks = match parse_task_list(&generation.text) {
            Some(drafts) => drafts_to_tasks(drafts),
            None => {
                tracing::warn!("Plan output was not a task list, falling back to a single task");
                vec![Task::new(goal, goal)]
            }
        };
        tracing::info!(tasks = tasks.len(), "plan generated");
        Ok(Plan::with_tasks(goal, tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Generation;
    use async_trait::async_trait;

    struct FixedLlm(String);

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn generate(&self, _request: &GenerateRequest) -> Result<Generation, LlmError> {
            Ok(Generation::text(self.0.clone()))
        }
    }

    #[test]
    fn test_parse_fenced_json() {
        let output = "Here you go:\n```json\n[{\"title\": \"a\"}, {\"title\": \"b\", \"priority\": \"high\", \"dependencies\": [0]}]\n```";
        let drafts = parse_task_list(output).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].priority, TaskPriority::High);
        assert_eq!(drafts[1].dependencies, vec![0]);
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_task_list("I cannot plan that").is_none());
        assert!(parse_task_list("[]").is_none());
    }

    #[test]
    fn test_drafts_to_tasks_maps_dependencies() {
        let drafts = parse_task_list(r#"[{"title":"a"},{"title":"b","dependencies":[0, 1, 7]}]"#).unwrap();
        let tasks = drafts_to_tasks(drafts);
        assert_eq!(tasks[1].dependencies.len(), 1);
        assert_eq!(tasks[1].dependencies[0].task_id, tasks[0].id);
    }

    #[tokio::test]
    async fn test_generate_falls_back_to_goal() {
        let generator = PlanGenerator::new(Arc::new(FixedLlm("no json here".into())));
        let plan = generator.generate("ship it").await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tasks()[0].title, "ship it");
    }

    #[tokio::test]
    async fn test_generate_from_list() {
        let generator = PlanGenerator::new(Arc::new(FixedLlm(
            r#"[{"title":"design"},{"title":"build"},{"title":"test"}]"#.into(),
        )));
        let plan = generator.generate("ship it").await.unwrap();
        assert_eq!(plan.goal, "ship it");
        assert_eq!(
            plan.tasks().iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["design", "build", "test"]
        );
    }
}
