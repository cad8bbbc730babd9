//! 步骤执行器：agent / tool 步骤的外部调用接缝

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::agent::{Agent, AgentFactory};
use crate::cache::DataAccess;
use crate::memory::Message;
use crate::tools::ToolCaller;
use crate::workflow::{AgentStepConfig, ToolStepConfig, Variables};

/// 工作流步骤执行器
///
/// 返回对象时其键值合并进变量表；返回其他值时写入步骤的输出变量。
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run_agent(
        &self,
        config: &AgentStepConfig,
        prompt: String,
        variables: &Variables,
    ) -> Result<Value, String>;

    async fn run_tool(&self, step_id: &str, config: &ToolStepConfig, args: Value) -> Result<Value, String>;
}

/// 默认执行器：agent 步骤按名字加载 Agent（缓存实例），tool 步骤经 ToolExecutor 执行
pub struct DefaultStepExecutor {
    factory: AgentFactory,
    data: Arc<DataAccess>,
    agents: RwLock<HashMap<String, Arc<Agent>>>,
}

impl DefaultStepExecutor {
    pub fn new(factory: AgentFactory, data: Arc<DataAccess>) -> Self {
        Self {
            factory,
            data,
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// 预先放入一个已实例化的 Agent
    pub async fn insert_agent(&self, agent: Agent) {
        self.agents
            .write()
            .await
            .insert(agent.name().to_string(), Arc::new(agent));
    }

    async fn agent(&self, name: &str) -> Result<Arc<Agent>, String> {
        if let Some(agent) = self.agents.read().await.get(name) {
            return Ok(Arc::clone(agent));
        }
        let agent = Arc::new(
            self.factory
                .load(&self.data, name)
                .await
                .map_err(|e| e.to_string())?,
        );
        Ok(Arc::clone(
            self.agents
                .write()
                .await
                .entry(name.to_string())
                .or_insert(agent),
        ))
    }
}

#[async_trait]
impl StepExecutor for DefaultStepExecutor {
    async fn run_agent(
        &self,
        config: &AgentStepConfig,
        prompt: String,
        _variables: &Variables,
    ) -> Result<Value, String> {
        let agent = self.agent(&config.agent).await?;
        agent
            .run(vec![Message::user(prompt)])
            .await
            .map(Value::String)
            .map_err(|e| e.to_string())
    }

    async fn run_tool(&self, step_id: &str, config: &ToolStepConfig, args: Value) -> Result<Value, String> {
        self.factory
            .tools()
            .execute(&ToolCaller::step(step_id), &config.tool, args)
            .await
            .map(Value::String)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::store::{AgentProfile, MemoryRecordStore};
    use crate::tools::{EchoTool, ToolExecutor, ToolRegistry};
    use serde_json::json;

    fn executor() -> (Arc<DataAccess>, DefaultStepExecutor) {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let factory = AgentFactory::new(
            Arc::new(MockLlmClient),
            Arc::new(ToolExecutor::new(registry, 5)),
        );
        let data = Arc::new(DataAccess::new(Arc::new(MemoryRecordStore::new())));
        (data.clone(), DefaultStepExecutor::new(factory, data))
    }

    #[tokio::test]
    async fn test_agent_step_loads_profile_once() {
        let (data, executor) = executor();
        data.create(AgentProfile::new("writer", "")).await.unwrap();
        let config = AgentStepConfig {
            agent: "writer".into(),
            prompt: String::new(),
            output_key: None,
        };

        let out = executor
            .run_agent(&config, "draft it".into(), &Variables::new())
            .await
            .unwrap();
        assert_eq!(out, json!("Echo from Mock: draft it"));

        // 删除配置后仍使用缓存的实例
        data.delete::<AgentProfile>("writer").await.unwrap();
        assert!(executor
            .run_agent(&config, "again".into(), &Variables::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_tool_step_and_missing_agent() {
        let (_data, executor) = executor();
        let tool = ToolStepConfig {
            tool: "echo".into(),
            args: json!({"text": "hi"}),
            output_key: None,
        };
        assert_eq!(executor.run_tool("publish", &tool, tool.args.clone()).await.unwrap(), json!("hi"));

        let config = AgentStepConfig {
            agent: "ghost".into(),
            prompt: String::new(),
            output_key: None,
        };
        let err = executor
            .run_agent(&config, String::new(), &Variables::new())
            .await
            .unwrap_err();
        assert!(err.contains("ghost"));
    }
}
