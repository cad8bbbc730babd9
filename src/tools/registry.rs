//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找；
//! resolve(tool_ids) 把 Agent 配置中的工具 ID 解析成可调用的工具表，内核不区分本地或远程工具。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolSpec;
use crate::store::ToolRecord;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 生成交给模型的工具描述
pub fn tool_spec(tool: &dyn Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self.tools.get(name).ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按 ID 解析工具表；未注册的 ID 跳过并记录警告
    pub fn resolve(&self, tool_ids: &[String]) -> HashMap<String, Arc<dyn Tool>> {
        let mut resolved = HashMap::new();
        for id in tool_ids {
            match self.tools.get(id) {
                Some(tool) => {
                    resolved.insert(id.clone(), Arc::clone(tool));
                }
                None => tracing::warn!(tool = %id, "Unknown tool id, skipped"),
            }
        }
        resolved
    }

    /// 已注册工具的目录记录（按名称排序），参数 schema 存入 config
    pub fn records(&self) -> Vec<ToolRecord> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| ToolRecord {
                id: tool.name().to_string(),
                description: tool.description().to_string(),
                config: tool.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let out = registry
            .execute("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "hi");
        assert!(registry.execute("nope", Value::Null).await.is_err());
    }

    #[test]
    fn test_resolve_skips_unknown() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let resolved = registry.resolve(&["echo".to_string(), "web_search".to_string()]);
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("echo"));
        assert_eq!(tool_spec(resolved["echo"].as_ref()).name, "echo");
    }

    #[test]
    fn test_records_describe_registered_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let records = registry.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "echo");
        assert_eq!(records[0].config, EchoTool.parameters_schema());
    }
}
