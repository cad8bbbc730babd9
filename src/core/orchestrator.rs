//! 编排器：Space 生命周期与请求委派
//!
//! 每个流式请求分两阶段：
//! 1. 历史阶段：按已有条数切片，只追加比记录更新的消息到目标对话线程；
//! 2. 委派阶段：多于一个目标 Agent 时经并行引擎扇出，合成带标签的聚合文本；否则解析唯一的 Agent
//!    （按需加载配置并缓存实例），只转发最近 context_window 条消息。
//!
//! 最终回复的持久化是尽力而为的旁路：失败只记录日志，不影响已经交付的响应。

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentFactory};
use crate::cache::DataAccess;
use crate::config::{AppConfig, OrchestratorSection, StoreBackend};
use crate::core::{
    AgentExecutor, CollaborationManager, OrchestraError, ParallelResult, ParallelTask, Result, Space,
};
use crate::llm::{LlmClient, LlmError, StreamDelta};
use crate::memory::{window_of, Message, QueuedInput};
use crate::plan::{Plan, PlanError, PlanGenerator, Task};
use crate::store::{MemoryRecordStore, RecordStore, SpaceRecord, SqliteRecordStore, TaskRecord};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::workflow::{
    DefaultStepExecutor, StepExecutor, Variables, Workflow, WorkflowContext, WorkflowEngine,
};

const RESPONSE_BUFFER: usize = 64;

/// 一次委派请求
#[derive(Debug, Clone)]
pub struct OrchestraRequest {
    pub space_id: String,
    /// 目标对话线程；None 为 Space 的默认对话
    pub thread_id: Option<String>,
    /// 调用方持有的完整对话（单调增长）
    pub messages: Vec<Message>,
    /// 目标 Agent 名
    pub agents: Vec<String>,
    pub mode: String,
}

impl OrchestraRequest {
    pub fn new(space_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            space_id: space_id.into(),
            thread_id: None,
            messages,
            agents: Vec::new(),
            mode: "agent".to_string(),
        }
    }

    pub fn to_agent(mut self, agent: impl Into<String>) -> Self {
        self.agents.push(agent.into());
        self
    }

    pub fn to_agents(mut self, agents: Vec<String>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }
}

/// 流式响应：由转发任务经 mpsc 通道推送增量
pub struct ResponseStream {
    space_id: String,
    agents: Vec<String>,
    rx: mpsc::Receiver<std::result::Result<StreamDelta, LlmError>>,
    forwarder: Option<JoinHandle<()>>,
}

impl ResponseStream {
    /// 响应对应的 Agent
    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    /// 收集全部文本，并等待转发任务（含尽力持久化）结束。
    /// 请求被中断时返回 `OrchestraError::Cancelled`
    pub async fn finish(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(delta) = self.next().await {
            match delta {
                Ok(StreamDelta::Text(chunk)) => text.push_str(&chunk),
                Ok(_) => {}
                Err(LlmError::Cancelled) => {
                    return Err(OrchestraError::Cancelled(self.space_id.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(forwarder) = self.forwarder.take() {
            if let Err(e) = forwarder.await {
                tracing::warn!("Response forwarder ended abnormally: {}", e);
            }
        }
        Ok(text)
    }
}

impl Stream for ResponseStream {
    type Item = std::result::Result<StreamDelta, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// 编排器
pub struct Orchestrator {
    config: OrchestratorSection,
    max_concurrency: usize,
    data: Arc<DataAccess>,
    factory: AgentFactory,
    planner: PlanGenerator,
    workflows: Arc<WorkflowEngine>,
    spaces: RwLock<HashMap<String, Arc<Mutex<Space>>>>,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, data: Arc<DataAccess>, factory: AgentFactory) -> Self {
        let executor: Arc<dyn StepExecutor> =
            Arc::new(DefaultStepExecutor::new(factory.clone(), Arc::clone(&data)));
        Self::with_step_executor(config, data, factory, executor)
    }

    /// 使用自定义的工作流步骤执行器
    pub fn with_step_executor(
        config: &AppConfig,
        data: Arc<DataAccess>,
        factory: AgentFactory,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        Self {
            config: config.orchestrator.clone(),
            max_concurrency: config.parallel.max_concurrency,
            planner: PlanGenerator::new(factory.llm()),
            data,
            factory,
            workflows: Arc::new(WorkflowEngine::new(executor)),
            spaces: RwLock::new(HashMap::new()),
        }
    }

    /// 按配置组装存储、缓存、工具与 Agent 工厂
    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
    ) -> Result<Self> {
        let store: Arc<dyn RecordStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryRecordStore::new()),
            StoreBackend::Sqlite => {
                let path = config.store.sqlite_path(&config.app);
                tracing::info!(path = %path.display(), "Opening SQLite record store");
                Arc::new(SqliteRecordStore::open(path)?)
            }
        };
        let data = Arc::new(DataAccess::with_ttl(
            store,
            std::time::Duration::from_secs(config.cache.ttl_secs),
        ));
        let executor = Arc::new(ToolExecutor::new(tools, config.tools.tool_timeout_secs));
        Ok(Self::new(config, data, AgentFactory::new(llm, executor)))
    }

    pub fn data(&self) -> &Arc<DataAccess> {
        &self.data
    }

    pub fn workflows(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    // ---------- Space ----------

    /// 创建并持久化一个新 Space
    pub async fn start_space(&self, goal: impl Into<String>, agents: Vec<String>) -> Result<String> {
        let space = Space::new(goal, agents, self.max_concurrency);
        let id = space.id.clone();
        self.data.create(space.to_record()).await?;
        tracing::info!(space = %id, goal = %space.goal, "Space started");
        self.spaces
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(space)));
        Ok(id)
    }

    /// 取 Space；不在内存中时从存储恢复
    pub async fn space(&self, space_id: &str) -> Result<Arc<Mutex<Space>>> {
        if let Some(space) = self.spaces.read().await.get(space_id) {
            return Ok(Arc::clone(space));
        }
        let record = self
            .data
            .get_space(space_id)
            .await?
            .ok_or_else(|| OrchestraError::SpaceNotFound(space_id.to_string()))?;
        tracing::debug!(space = %space_id, "Space restored from store");
        let restored = Arc::new(Mutex::new(Space::from_record(record, self.max_concurrency)));
        Ok(Arc::clone(
            self.spaces
                .write()
                .await
                .entry(space_id.to_string())
                .or_insert(restored),
        ))
    }

    pub async fn snapshot(&self, space_id: &str) -> Result<SpaceRecord> {
        Ok(self.space(space_id).await?.lock().await.to_record())
    }

    pub async fn collaboration(&self, space_id: &str) -> Result<Arc<CollaborationManager>> {
        Ok(Arc::clone(self.space(space_id).await?.lock().await.collaboration()))
    }

    pub async fn create_thread(&self, space_id: &str, title: impl Into<String>) -> Result<String> {
        let space = self.space(space_id).await?;
        let mut space = space.lock().await;
        let id = space.create_thread(title);
        self.persist(&space).await?;
        Ok(id)
    }

    pub async fn enqueue_input(&self, space_id: &str, content: impl Into<String>) -> Result<String> {
        Ok(self.space(space_id).await?.lock().await.enqueue_input(content))
    }

    pub async fn next_input(&self, space_id: &str) -> Result<Option<QueuedInput>> {
        Ok(self.space(space_id).await?.lock().await.next_input())
    }

    /// 停止接收新输入：清空输入队列并中断进行中的响应流；返回丢弃的输入数
    ///
    /// 已派发的并行单元与暂停中的工作流不受影响。
    pub async fn cancel(&self, space_id: &str) -> Result<usize> {
        let space = self.space(space_id).await?;
        let mut space = space.lock().await;
        let dropped = space.clear_inputs();
        space.supervisor().cancel();
        tracing::info!(space = %space_id, dropped, "Space input cancelled");
        Ok(dropped)
    }

    // ---------- 计划 ----------

    /// 整体替换计划，同步任务记录
    pub async fn set_plan(&self, space_id: &str, plan: Plan) -> Result<()> {
        let space = self.space(space_id).await?;
        let mut space = space.lock().await;
        let previous = space.set_plan(plan);
        self.persist(&space).await?;
        self.sync_task_records(space_id, previous.as_ref(), space.plan()).await
    }

    /// 由 LLM 为 Space 的目标生成计划并设置
    pub async fn generate_plan(&self, space_id: &str) -> Result<Plan> {
        let goal = self.space(space_id).await?.lock().await.goal.clone();
        let plan = self.planner.generate(&goal).await?;
        self.set_plan(space_id, plan.clone()).await?;
        Ok(plan)
    }

    /// 调整计划：保留列出的旧任务，追加新任务
    pub async fn adapt_plan(
        &self,
        space_id: &str,
        goal: impl Into<String>,
        new_tasks: Vec<Task>,
        preserve: &[String],
    ) -> Result<Plan> {
        let current = self
            .space(space_id)
            .await?
            .lock()
            .await
            .plan()
            .cloned()
            .unwrap_or_else(|| Plan::new(""));
        let adapted = current.adapt(goal, new_tasks, preserve);
        self.set_plan(space_id, adapted.clone()).await?;
        Ok(adapted)
    }

    /// 对计划中的任务执行一次变更（状态转换等），持久化 Space 与任务记录
    pub async fn update_task<F>(&self, space_id: &str, task_id: &str, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> std::result::Result<(), PlanError>,
    {
        let space = self.space(space_id).await?;
        let mut space = space.lock().await;
        let plan = space
            .plan_mut()
            .ok_or_else(|| OrchestraError::Validation(format!("space {} has no active plan", space_id)))?;
        let task = plan.task_mut(task_id)?;
        f(task)?;
        let task = task.clone();
        space.touch();
        self.persist(&space).await?;
        self.data
            .put(TaskRecord {
                space_id: space_id.to_string(),
                task: task.clone(),
            })
            .await?;
        Ok(task)
    }

    pub async fn start_task(&self, space_id: &str, task_id: &str) -> Result<Task> {
        self.update_task(space_id, task_id, Task::start).await
    }

    pub async fn complete_task(&self, space_id: &str, task_id: &str) -> Result<Task> {
        self.update_task(space_id, task_id, Task::complete).await
    }

    pub async fn fail_task(&self, space_id: &str, task_id: &str, reason: &str) -> Result<Task> {
        self.update_task(space_id, task_id, |task| {
            task.fail(reason);
            Ok(())
        })
        .await
    }

    pub async fn next_actionable_task(&self, space_id: &str) -> Result<Option<Task>> {
        Ok(self
            .space(space_id)
            .await?
            .lock()
            .await
            .plan()
            .and_then(|p| p.next_actionable_task().cloned()))
    }

    async fn sync_task_records(&self, space_id: &str, previous: Option<&Plan>, current: Option<&Plan>) -> Result<()> {
        let current_tasks = current.map(Plan::tasks).unwrap_or_default();
        if let Some(previous) = previous {
            for old in previous.tasks() {
                if !current_tasks.iter().any(|t| t.id == old.id) {
                    self.data.delete::<TaskRecord>(&old.id).await?;
                }
            }
        }
        for task in current_tasks {
            self.data
                .put(TaskRecord {
                    space_id: space_id.to_string(),
                    task: task.clone(),
                })
                .await?;
        }
        Ok(())
    }

    // ---------- 委派 ----------

    /// 处理一次流式委派请求
    pub async fn handle_request(&self, request: OrchestraRequest) -> Result<ResponseStream> {
        if request.mode != self.config.supported_mode {
            return Err(OrchestraError::Validation(format!(
                "unsupported mode: {}",
                request.mode
            )));
        }
        let targets = if request.agents.is_empty() {
            match &self.config.default_agent {
                Some(agent) => vec![agent.clone()],
                None => {
                    return Err(OrchestraError::Validation(
                        "request names no target agent".to_string(),
                    ))
                }
            }
        } else {
            request.agents.clone()
        };

        let space_handle = self.space(&request.space_id).await?;
        let mut space = space_handle.lock().await;

        // 历史阶段
        let conversation = space.conversation_mut(request.thread_id.as_deref())?;
        let appended = conversation.append_newer(&request.messages);
        let transcript = conversation.messages().to_vec();
        tracing::debug!(space = %request.space_id, appended, total = transcript.len(), "History updated");

        // 委派阶段
        let token = space.supervisor().request_token();
        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        let reply = ReplySink {
            space: Arc::clone(&space_handle),
            data: Arc::clone(&self.data),
            thread_id: request.thread_id.clone(),
        };

        let forwarder = if targets.len() > 1 {
            let mut executors: HashMap<String, Arc<dyn AgentExecutor>> = HashMap::new();
            for name in &targets {
                match self.resolve_agent(&mut space, name).await {
                    Ok(agent) => {
                        executors.insert(name.clone(), agent);
                    }
                    // 缺失的 Agent 由并行引擎报告为该单元的错误
                    Err(e) => tracing::warn!(agent = %name, "Agent unavailable for fan-out: {}", e),
                }
            }
            let units = targets
                .iter()
                .map(|name| {
                    ParallelTask::new(name.clone(), transcript.clone())
                        .with_metadata("spaceId", serde_json::json!(request.space_id))
                })
                .collect();
            let engine = Arc::clone(space.parallel());
            tracing::info!(space = %request.space_id, agents = ?targets, "Fanning out request");
            tokio::spawn(forward_parallel(engine, units, executors, token, tx, reply))
        } else {
            let agent = self.resolve_agent(&mut space, &targets[0]).await?;
            let window = window_of(&transcript, self.config.context_window);
            tracing::info!(space = %request.space_id, agent = %agent.name(), window = window.len(), "Delegating request");
            tokio::spawn(forward_single(agent, window, token, tx, reply))
        };

        space.touch();
        if let Err(e) = self.persist(&space).await {
            forwarder.abort();
            return Err(e);
        }

        Ok(ResponseStream {
            space_id: request.space_id.clone(),
            agents: targets,
            rx,
            forwarder: Some(forwarder),
        })
    }

    /// 取 Space 中缓存的 Agent，未实例化时加载配置并缓存
    async fn resolve_agent(&self, space: &mut Space, name: &str) -> Result<Arc<Agent>> {
        if let Some(agent) = space.agent(name) {
            return Ok(agent);
        }
        let agent = Arc::new(self.factory.load(&self.data, name).await?);
        space.insert_agent(Arc::clone(&agent));
        Ok(agent)
    }

    async fn persist(&self, space: &Space) -> Result<()> {
        self.data.put(space.to_record()).await?;
        Ok(())
    }

    // ---------- 工具目录 ----------

    /// 把已注册的工具写入存储的工具目录，返回写入条数
    pub async fn publish_tool_catalog(&self) -> Result<usize> {
        let records = self.factory.tools().registry().records();
        let count = records.len();
        for record in records {
            self.data.put(record).await?;
        }
        tracing::info!(tools = count, "Tool catalog published");
        Ok(count)
    }

    // ---------- 工作流 ----------

    pub async fn register_workflow(&self, workflow: Workflow) {
        self.workflows.register_workflow(workflow).await;
    }

    pub async fn run_workflow(&self, workflow_id: &str, input: Variables) -> Result<WorkflowContext> {
        Ok(self.workflows.start_workflow(workflow_id, input).await?)
    }

    pub async fn resume_workflow(&self, context_id: &str, input: Variables) -> Result<WorkflowContext> {
        Ok(self.workflows.resume_workflow(context_id, input).await?)
    }

    /// 取回并丢弃已终止的工作流上下文
    pub async fn remove_workflow_context(&self, context_id: &str) -> Result<WorkflowContext> {
        Ok(self.workflows.remove_context(context_id).await?)
    }
}

/// 最终回复的落点
struct ReplySink {
    space: Arc<Mutex<Space>>,
    data: Arc<DataAccess>,
    thread_id: Option<String>,
}

impl ReplySink {
    /// 尽力持久化：失败只记录日志
    async fn persist(self, reply: Message) {
        let (space_id, record) = {
            let mut space = self.space.lock().await;
            match space.conversation_mut(self.thread_id.as_deref()) {
                Ok(conversation) => conversation.push(reply),
                Err(e) => {
                    tracing::warn!("Reply not recorded: {}", e);
                    return;
                }
            }
            space.touch();
            (space.id.clone(), space.to_record())
        };
        if let Err(e) = self.data.put(record).await {
            tracing::warn!(space = %space_id, "Best-effort reply persistence failed: {}", e);
        }
    }
}

type DeltaSender = mpsc::Sender<std::result::Result<StreamDelta, LlmError>>;

async fn forward_single(
    agent: Arc<Agent>,
    window: Vec<Message>,
    token: CancellationToken,
    tx: DeltaSender,
    reply: ReplySink,
) {
    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => Err(LlmError::Cancelled),
        opened = agent.stream(window) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };

    let mut text = String::new();
    let mut detached = false;
    loop {
        let delta = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!(agent = %agent.name(), "Response stream aborted");
                let _ = tx.send(Err(LlmError::Cancelled)).await;
                return;
            }
            delta = stream.next() => delta,
        };
        match delta {
            None => break,
            Some(Ok(delta)) => {
                if let StreamDelta::Text(chunk) = &delta {
                    text.push_str(chunk);
                }
                if !detached && tx.send(Ok(delta)).await.is_err() {
                    tracing::debug!(agent = %agent.name(), "Response consumer dropped; draining for persistence");
                    detached = true;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(agent = %agent.name(), "Model stream failed: {}", e);
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
    drop(tx);

    reply
        .persist(Message::assistant(text).with_name(agent.name()))
        .await;
}

async fn forward_parallel(
    engine: Arc<crate::core::ParallelEngine>,
    units: Vec<ParallelTask>,
    executors: HashMap<String, Arc<dyn AgentExecutor>>,
    token: CancellationToken,
    tx: DeltaSender,
    reply: ReplySink,
) {
    // 批次在独立任务中运行：中断响应不会取消已派发的单元
    let batch = tokio::spawn(async move { engine.execute_parallel(units, &executors).await });
    let results = tokio::select! {
        biased;
        _ = token.cancelled() => {
            let _ = tx.send(Err(LlmError::Cancelled)).await;
            return;
        }
        joined = batch => joined,
    };
    let text = match results {
        Ok(results) => aggregate(&results),
        Err(e) => {
            let _ = tx.send(Err(LlmError::Stream(e.to_string()))).await;
            return;
        }
    };

    let _ = tx.send(Ok(StreamDelta::Text(text.clone()))).await;
    let _ = tx
        .send(Ok(StreamDelta::Finish(crate::llm::FinishReason::Stop)))
        .await;
    drop(tx);

    reply.persist(Message::assistant(text)).await;
}

/// 按提交顺序拼接各 Agent 的带标签输出
fn aggregate(results: &[ParallelResult]) -> String {
    results
        .iter()
        .map(|r| match (&r.result, &r.error) {
            (Some(text), _) => format!("[{}]\n{}", r.agent_id, text),
            (None, Some(error)) => format!("[{}] error: {}", r.agent_id, error),
            (None, None) => format!("[{}]", r.agent_id),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
