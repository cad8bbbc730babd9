//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。每次调用都带上调用方（Agent 或工作流步骤），
//! 超时或失败转为 OrchestraError（ToolTimeout / ToolExecutionFailed），并输出一行 JSON 审计日志。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;

use crate::core::OrchestraError;
use crate::tools::{Tool, ToolRegistry};

const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具调用方
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolCaller {
    Agent { name: String },
    WorkflowStep { step_id: String },
}

impl ToolCaller {
    pub fn agent(name: impl Into<String>) -> Self {
        Self::Agent { name: name.into() }
    }

    pub fn step(step_id: impl Into<String>) -> Self {
        Self::WorkflowStep {
            step_id: step_id.into(),
        }
    }
}

impl fmt::Display for ToolCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent { name } => write!(f, "agent:{}", name),
            Self::WorkflowStep { step_id } => write!(f, "step:{}", step_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ToolOutcome {
    Ok,
    Error,
    Timeout,
}

impl ToolOutcome {
    fn of(result: &Result<String, OrchestraError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(OrchestraError::ToolTimeout(_)) => Self::Timeout,
            Err(_) => Self::Error,
        }
    }
}

/// 一次工具调用的审计记录
#[derive(Debug, Serialize)]
struct ToolAudit<'a> {
    event: &'static str,
    tool: &'a str,
    caller: &'a ToolCaller,
    outcome: ToolOutcome,
    duration_ms: u64,
    args_preview: String,
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 OrchestraError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 以 caller 的身份执行工具
    pub async fn execute(
        &self,
        caller: &ToolCaller,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, OrchestraError> {
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = match timeout(self.timeout, self.registry.execute(tool_name, args)).await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(OrchestraError::ToolExecutionFailed(e)),
            Err(_) => Err(OrchestraError::ToolTimeout(tool_name.to_string())),
        };

        let audit = ToolAudit {
            event: "tool_audit",
            tool: tool_name,
            caller,
            outcome: ToolOutcome::of(&result),
            duration_ms: start.elapsed().as_millis() as u64,
            args_preview: preview,
        };
        match serde_json::to_string(&audit) {
            Ok(line) => tracing::info!(caller = %caller, audit = %line, "tool"),
            Err(e) => tracing::warn!(tool = %tool_name, caller = %caller, "Tool audit not serializable: {}", e),
        }
        result
    }

    /// 工具执行能力：按 ID 解析工具表
    pub fn resolve(&self, tool_ids: &[String]) -> HashMap<String, Arc<dyn Tool>> {
        self.registry.resolve(tool_ids)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_execute_maps_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        let executor = ToolExecutor::with_timeout(registry, Duration::from_millis(20));
        let caller = ToolCaller::agent("coder");

        let ok = executor
            .execute(&caller, "echo", serde_json::json!({"text": "x"}))
            .await
            .unwrap();
        assert_eq!(ok, "x");

        let late = executor.execute(&caller, "slow", Value::Null).await;
        assert_eq!(ToolOutcome::of(&late), ToolOutcome::Timeout);
        assert!(matches!(late, Err(OrchestraError::ToolTimeout(name)) if name == "slow"));

        let missing = executor.execute(&caller, "missing", Value::Null).await;
        assert_eq!(ToolOutcome::of(&missing), ToolOutcome::Error);
        assert!(matches!(missing, Err(OrchestraError::ToolExecutionFailed(_))));
    }

    #[test]
    fn test_audit_names_the_caller() {
        let caller = ToolCaller::step("publish");
        assert_eq!(caller.to_string(), "step:publish");
        assert_eq!(ToolCaller::agent("coder").to_string(), "agent:coder");

        let audit = ToolAudit {
            event: "tool_audit",
            tool: "echo",
            caller: &caller,
            outcome: ToolOutcome::Ok,
            duration_ms: 3,
            args_preview: "{}".into(),
        };
        let line = serde_json::to_value(&audit).unwrap();
        assert_eq!(
            line,
            serde_json::json!({
                "event": "tool_audit",
                "tool": "echo",
                "caller": { "kind": "workflow_step", "step_id": "publish" },
                "outcome": "ok",
                "duration_ms": 3,
                "args_preview": "{}",
            })
        );
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = Value::String("x".repeat(500));
        assert!(args_preview(&long).ends_with("..."));
    }
}
