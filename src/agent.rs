//! 可寻址的 Agent 工作者
//!
//! AgentProfile 是持久化的配置；AgentFactory 用注入的 LlmClient 与 ToolExecutor 把它实例化为 Agent。
//! Agent::run 在模型请求工具时执行工具并把结果作为 tool 消息回填，直到模型给出最终文本。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::DataAccess;
use crate::core::{AgentExecutor, OrchestraError, ParallelTask};
use crate::llm::{DeltaStream, GenerateRequest, Generation, LlmClient, LlmError, ToolSpec};
use crate::memory::{Message, Role};
use crate::store::AgentProfile;
use crate::tools::{tool_spec, Tool, ToolCaller, ToolExecutor};

/// 单次 run 中最多的工具调用轮数
const MAX_TOOL_ROUNDS: usize = 5;

/// 实例化的 Agent
pub struct Agent {
    profile: AgentProfile,
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Agent {
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| tool_spec(t.as_ref())).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn request(&self, messages: Vec<Message>) -> GenerateRequest {
        GenerateRequest {
            system_prompt: self.profile.system_prompt.clone(),
            messages,
            tools: self.tool_specs(),
            params: self.profile.params.clone(),
        }
    }

    /// 单次非流式生成，不执行工具
    pub async fn generate(&self, messages: Vec<Message>) -> Result<Generation, LlmError> {
        self.llm.generate(&self.request(messages)).await
    }

    pub async fn stream(&self, messages: Vec<Message>) -> Result<DeltaStream, LlmError> {
        self.llm.generate_stream(&self.request(messages)).await
    }

    /// 生成并执行工具调用，返回最终文本
    pub async fn run(&self, messages: Vec<Message>) -> Result<String, OrchestraError> {
        let mut messages = messages;
        let mut generation = self.generate(messages.clone()).await?;

        let caller = ToolCaller::agent(self.name());
        for round in 0..MAX_TOOL_ROUNDS {
            if generation.tool_calls.is_empty() {
                break;
            }
            tracing::debug!(agent = %self.name(), round, calls = generation.tool_calls.len(), "Executing tool calls");

            messages.push(Message::assistant(generation.text.clone()).with_name(self.name()));
            for call in &generation.tool_calls {
                let observation = if self.tools.contains_key(&call.name) {
                    match self.executor.execute(&caller, &call.name, call.args.clone()).await {
                        Ok(output) => output,
                        Err(e) => format!("Error: {}", e),
                    }
                } else {
                    format!("Error: tool not available to {}: {}", self.name(), call.name)
                };
                messages.push(Message::new(Role::Tool, observation).with_name(call.name.clone()));
            }
            generation = self.generate(messages.clone()).await?;
        }

        if !generation.tool_calls.is_empty() {
            tracing::warn!(agent = %self.name(), "Tool round limit reached; returning partial answer");
        }
        Ok(generation.text)
    }
}

#[async_trait]
impl AgentExecutor for Agent {
    async fn execute(&self, task: &ParallelTask) -> Result<String, String> {
        self.run(task.messages.clone()).await.map_err(|e| e.to_string())
    }
}

/// Agent 工厂：持有共享的 LlmClient 与 ToolExecutor
#[derive(Clone)]
pub struct AgentFactory {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
}

impl AgentFactory {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>) -> Self {
        Self { llm, executor }
    }

    pub fn llm(&self) -> Arc<dyn LlmClient> {
        Arc::clone(&self.llm)
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// 按配置实例化；配置中未注册的工具 ID 被跳过
    pub fn build(&self, profile: AgentProfile) -> Agent {
        let tools = self.executor.resolve(&profile.tools);
        Agent {
            profile,
            llm: Arc::clone(&self.llm),
            executor: Arc::clone(&self.executor),
            tools,
        }
    }

    /// 经数据访问层加载配置并实例化；配置不存在时返回 AgentNotFound
    pub async fn load(&self, data: &DataAccess, name: &str) -> Result<Agent, OrchestraError> {
        let profile = data
            .get_agent_profile(name)
            .await?
            .ok_or_else(|| OrchestraError::AgentNotFound(name.to_string()))?;
        Ok(self.build(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use crate::store::MemoryRecordStore;
    use crate::tools::{EchoTool, ToolRegistry};
    use std::sync::Mutex;

    /// 第一次请求 echo 工具，之后返回看到的最后一条消息
    #[derive(Default)]
    struct ToolCallingLlm {
        requests: Mutex<Vec<GenerateRequest>>,
    }

    #[async_trait]
    impl LlmClient for ToolCallingLlm {
        async fn generate(&self, request: &GenerateRequest) -> Result<Generation, LlmError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            if requests.len() == 1 {
                return Ok(Generation {
                    text: "calling".into(),
                    tool_calls: vec![ToolCall {
                        name: "echo".into(),
                        args: serde_json::json!({"text": "pong"}),
                    }],
                    ..Default::default()
                });
            }
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Generation::text(format!("final: {}", last)))
        }
    }

    fn factory(llm: Arc<dyn LlmClient>) -> AgentFactory {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        AgentFactory::new(llm, Arc::new(ToolExecutor::new(registry, 5)))
    }

    #[tokio::test]
    async fn test_run_executes_tool_calls() {
        let llm = Arc::new(ToolCallingLlm::default());
        let agent = factory(llm.clone()).build(
            AgentProfile::new("worker", "You are helpful").with_tools(vec!["echo".into(), "ghost".into()]),
        );
        assert_eq!(agent.tool_names(), vec!["echo".to_string()]);

        let answer = agent.run(vec![Message::user("ping")]).await.unwrap();
        assert_eq!(answer, "final: pong");

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].system_prompt, "You are helpful");
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[1].messages.last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn test_tool_outside_profile_is_refused() {
        let llm = Arc::new(ToolCallingLlm::default());
        let agent = factory(llm).build(AgentProfile::new("bare", ""));
        let answer = agent.run(vec![Message::user("ping")]).await.unwrap();
        assert!(answer.contains("tool not available"));
    }

    #[tokio::test]
    async fn test_load_missing_profile() {
        let data = DataAccess::new(Arc::new(MemoryRecordStore::new()));
        let factory = factory(Arc::new(crate::llm::MockLlmClient));
        assert!(matches!(
            factory.load(&data, "nobody").await,
            Err(OrchestraError::AgentNotFound(name)) if name == "nobody"
        ));

        data.create(AgentProfile::new("writer", "write")).await.unwrap();
        let agent = factory.load(&data, "writer").await.unwrap();
        assert_eq!(agent.name(), "writer");
    }
}
