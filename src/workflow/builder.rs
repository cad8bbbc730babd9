//! 工作流构建器
//!
//! 提供流畅的 API 来构建工作流，build 时校验步骤 ID 唯一且所有跳转目标存在

use std::collections::HashSet;

use serde_json::Value;

use crate::workflow::types::*;

/// 工作流构建器
pub struct WorkflowBuilder {
    id: WorkflowId,
    name: String,
    description: Option<String>,
    variables: Variables,
    steps: Vec<WorkflowStep>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("wf_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            description: None,
            variables: Variables::new(),
            steps: Vec::new(),
        }
    }

    /// 指定 ID（默认随机生成）
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// 变量默认值
    pub fn variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// 添加步骤；第一个添加的步骤是入口
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// 添加步骤，并把上一个没有 next 的步骤指向它
    pub fn then(mut self, step: WorkflowStep) -> Self {
        if let Some(prev) = self.steps.last_mut() {
            if prev.next.is_none() && chains_to_next(&prev.kind) {
                prev.next = Some(Next::Single(step.id.clone()));
            }
        }
        self.steps.push(step);
        self
    }

    /// 构建并校验
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidConfiguration(format!(
                "workflow {} has no steps",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "duplicate step id: {}",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            for target in targets(step) {
                if !ids.contains(target) {
                    return Err(WorkflowError::InvalidConfiguration(format!(
                        "step {} references unknown step {}",
                        step.id, target
                    )));
                }
            }
            if let StepKind::Parallel { branches } = &step.kind {
                for branch in branches {
                    let leaf = self.steps.iter().find(|s| &s.id == branch);
                    if !matches!(leaf.map(|s| &s.kind), Some(StepKind::Agent(_) | StepKind::Tool(_))) {
                        return Err(WorkflowError::InvalidConfiguration(format!(
                            "parallel branch {} must be an agent or tool step",
                            branch
                        )));
                    }
                }
            }
        }

        Ok(Workflow {
            id: self.id,
            name: self.name,
            description: self.description,
            variables: self.variables,
            steps: self.steps,
        })
    }
}

/// condition / end 步骤不通过 next 推进
fn chains_to_next(kind: &StepKind) -> bool {
    !matches!(kind, StepKind::Condition { .. } | StepKind::End)
}

/// 步骤引用的全部跳转目标
fn targets(step: &WorkflowStep) -> Vec<&str> {
    let mut out: Vec<&str> = match &step.next {
        Some(Next::Single(id)) => vec![id.as_str()],
        Some(Next::List(ids)) => ids.iter().map(String::as_str).collect(),
        None => Vec::new(),
    };
    match &step.kind {
        StepKind::Condition { if_true, if_false, .. } => {
            out.push(if_true);
            out.push(if_false);
        }
        StepKind::Parallel { branches } => out.extend(branches.iter().map(String::as_str)),
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_then_links_steps() {
        let workflow = WorkflowBuilder::new("linear")
            .step(WorkflowStep::start("s"))
            .then(WorkflowStep::agent("a", "writer", "x"))
            .then(WorkflowStep::end("e"))
            .build()
            .unwrap();
        assert_eq!(workflow.entry().unwrap().id, "s");
        assert_eq!(workflow.step("s").unwrap().next_step(), Some("a"));
        assert_eq!(workflow.step("a").unwrap().next_step(), Some("e"));
        assert!(workflow.id.starts_with("wf_"));
    }

    #[test]
    fn test_rejects_unknown_reference() {
        let err = WorkflowBuilder::new("bad")
            .step(WorkflowStep::agent("a", "w", "x").then("missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfiguration(msg) if msg.contains("missing")));

        let err = WorkflowBuilder::new("bad")
            .step(WorkflowStep::condition("c", Condition::Exists("k".into()), "c", "nowhere"))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(WorkflowBuilder::new("empty").build().is_err());
        assert!(WorkflowBuilder::new("dup")
            .step(WorkflowStep::start("x"))
            .step(WorkflowStep::end("x"))
            .build()
            .is_err());
    }

    #[test]
    fn test_parallel_branches_must_be_leaves() {
        let err = WorkflowBuilder::new("p")
            .step(WorkflowStep::parallel("p", vec!["h".into()]))
            .step(WorkflowStep::human_input("h", "?"))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfiguration(msg) if msg.contains("branch h")));

        assert!(WorkflowBuilder::new("p")
            .variable("q", json!("x"))
            .step(WorkflowStep::parallel("p", vec!["t".into()]))
            .step(WorkflowStep::tool("t", "echo", json!({})))
            .build()
            .is_ok());
    }
}
