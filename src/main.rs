//! Hive 演示入口
//!
//! 初始化日志与配置，组装编排器（Mock 模型 + echo 工具），创建一个 Space 并委派一次请求。
//! 用法：`hive [目标]`，配置文件路径可用 HIVE_CONFIG 指定。

use std::sync::Arc;

use anyhow::Context;
use hive::{
    config::load_config_or_default,
    llm::MockLlmClient,
    memory::Message,
    observability,
    store::AgentProfile,
    tools::{EchoTool, ToolRegistry},
    OrchestraRequest, Orchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config_or_default(std::env::var("HIVE_CONFIG").ok().map(Into::into));
    let goal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let goal = if goal.is_empty() {
        "Draft a release checklist".to_string()
    } else {
        goal
    };

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let orchestrator = Orchestrator::from_config(&config, Arc::new(MockLlmClient), tools)
        .context("Failed to build orchestrator")?;

    orchestrator
        .publish_tool_catalog()
        .await
        .context("Failed to publish tool catalog")?;

    orchestrator
        .data()
        .put(
            AgentProfile::new("assistant", "You are a helpful assistant.")
                .with_tools(vec!["echo".to_string()]),
        )
        .await
        .context("Failed to register agent profile")?;

    let space_id = orchestrator
        .start_space(goal.clone(), vec!["assistant".to_string()])
        .await
        .context("Failed to start space")?;

    let request = OrchestraRequest::new(&space_id, vec![Message::user(goal)]).to_agent("assistant");
    let reply = orchestrator
        .handle_request(request)
        .await
        .context("Delegation failed")?
        .finish()
        .await
        .context("Response stream failed")?;

    println!("{}", reply);
    Ok(())
}
