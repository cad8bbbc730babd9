//! Space：顶层项目容器
//!
//! 持有目标、Agent 表、当前计划、默认对话、SpaceTask 对话线程、输入队列，以及协作管理器、
//! 并行引擎和会话监管的句柄。每次状态变更后由编排器把 to_record() 快照写回存储。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent::Agent;
use crate::core::{CollaborationManager, OrchestraError, ParallelEngine, SessionSupervisor};
use crate::memory::{ConversationHistory, MessageQueue, QueuedInput};
use crate::plan::Plan;
use crate::store::{SpaceRecord, ThreadRecord};

/// SpaceTask：Space 内的一条次级对话线程（与计划中的 Task 无关）
#[derive(Debug, Clone)]
pub struct SpaceThread {
    pub id: String,
    pub title: String,
    pub history: ConversationHistory,
    pub created_at: DateTime<Utc>,
}

impl SpaceThread {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: format!("thread_{}", uuid::Uuid::new_v4()),
            title: title.into(),
            history: ConversationHistory::new(),
            created_at: Utc::now(),
        }
    }

    fn to_record(&self) -> ThreadRecord {
        ThreadRecord {
            id: self.id.clone(),
            title: self.title.clone(),
            messages: self.history.messages().to_vec(),
            created_at: self.created_at,
        }
    }

    fn from_record(record: ThreadRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            history: ConversationHistory::from_messages(record.messages),
            created_at: record.created_at,
        }
    }
}

/// Space
pub struct Space {
    pub id: String,
    pub goal: String,
    agent_names: Vec<String>,
    agents: HashMap<String, Arc<Agent>>,
    plan: Option<Plan>,
    history: ConversationHistory,
    threads: Vec<SpaceThread>,
    queue: MessageQueue,
    collaboration: Arc<CollaborationManager>,
    parallel: Arc<ParallelEngine>,
    supervisor: Arc<SessionSupervisor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Space {
    pub fn new(goal: impl Into<String>, agent_names: Vec<String>, max_concurrency: usize) -> Self {
        let now = Utc::now();
        Self::assemble(
            format!("space_{}", uuid::Uuid::new_v4()),
            goal.into(),
            agent_names,
            None,
            ConversationHistory::new(),
            Vec::new(),
            max_concurrency,
            now,
            now,
        )
    }

    /// 从存储快照恢复；Agent 实例与输入队列不持久化，按需重新加载
    pub fn from_record(record: SpaceRecord, max_concurrency: usize) -> Self {
        Self::assemble(
            record.id,
            record.goal,
            record.agents,
            record.plan,
            ConversationHistory::from_messages(record.history),
            record.threads.into_iter().map(SpaceThread::from_record).collect(),
            max_concurrency,
            record.created_at,
            record.updated_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        id: String,
        goal: String,
        agent_names: Vec<String>,
        plan: Option<Plan>,
        history: ConversationHistory,
        threads: Vec<SpaceThread>,
        max_concurrency: usize,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let collaboration = Arc::new(CollaborationManager::new(id.clone()));
        for name in &agent_names {
            collaboration.register_agent(name.clone());
        }
        Self {
            id,
            goal,
            agent_names,
            agents: HashMap::new(),
            plan,
            history,
            threads,
            queue: MessageQueue::new(),
            collaboration,
            parallel: Arc::new(ParallelEngine::new(max_concurrency)),
            supervisor: Arc::new(SessionSupervisor::new()),
            created_at,
            updated_at,
        }
    }

    pub fn to_record(&self) -> SpaceRecord {
        SpaceRecord {
            id: self.id.clone(),
            goal: self.goal.clone(),
            agents: self.agent_names.clone(),
            plan: self.plan.clone(),
            history: self.history.messages().to_vec(),
            threads: self.threads.iter().map(SpaceThread::to_record).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // ---------- Agent ----------

    pub fn agent_names(&self) -> &[String] {
        &self.agent_names
    }

    /// 已实例化的 Agent
    pub fn agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    /// 缓存实例化的 Agent；名字首次出现时加入成员列表
    pub fn insert_agent(&mut self, agent: Arc<Agent>) {
        let name = agent.name().to_string();
        if !self.agent_names.contains(&name) {
            self.agent_names.push(name.clone());
            self.collaboration.register_agent(name.clone());
        }
        self.agents.insert(name, agent);
    }

    // ---------- 计划 ----------

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn plan_mut(&mut self) -> Option<&mut Plan> {
        self.plan.as_mut()
    }

    /// 整体替换计划，返回旧计划
    pub fn set_plan(&mut self, plan: Plan) -> Option<Plan> {
        self.touch();
        self.plan.replace(plan)
    }

    // ---------- 对话 ----------

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn threads(&self) -> &[SpaceThread] {
        &self.threads
    }

    pub fn thread(&self, thread_id: &str) -> Option<&SpaceThread> {
        self.threads.iter().find(|t| t.id == thread_id)
    }

    pub fn create_thread(&mut self, title: impl Into<String>) -> String {
        let thread = SpaceThread::new(title);
        let id = thread.id.clone();
        self.threads.push(thread);
        self.touch();
        id
    }

    /// 指定线程的对话；None 为默认对话
    pub fn conversation(&self, thread_id: Option<&str>) -> Result<&ConversationHistory, OrchestraError> {
        match thread_id {
            None => Ok(&self.history),
            Some(id) => self
                .thread(id)
                .map(|t| &t.history)
                .ok_or_else(|| OrchestraError::ThreadNotFound(id.to_string())),
        }
    }

    pub fn conversation_mut(
        &mut self,
        thread_id: Option<&str>,
    ) -> Result<&mut ConversationHistory, OrchestraError> {
        match thread_id {
            None => Ok(&mut self.history),
            Some(id) => self
                .threads
                .iter_mut()
                .find(|t| t.id == id)
                .map(|t| &mut t.history)
                .ok_or_else(|| OrchestraError::ThreadNotFound(id.to_string())),
        }
    }

    // ---------- 输入队列 ----------

    pub fn enqueue_input(&mut self, content: impl Into<String>) -> String {
        self.queue.push(content)
    }

    pub fn next_input(&mut self) -> Option<QueuedInput> {
        self.queue.pop()
    }

    pub fn pending_inputs(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_inputs(&mut self) -> usize {
        self.queue.clear()
    }

    // ---------- 句柄 ----------

    pub fn collaboration(&self) -> &Arc<CollaborationManager> {
        &self.collaboration
    }

    pub fn parallel(&self) -> &Arc<ParallelEngine> {
        &self.parallel
    }

    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;
    use crate::plan::Task;

    #[test]
    fn test_record_round_trip_keeps_threads_and_plan() {
        let mut space = Space::new("ship it", vec!["coder".into()], 2);
        let thread = space.create_thread("design");
        space
            .conversation_mut(Some(&thread))
            .unwrap()
            .push(Message::user("sketch"));
        space.conversation_mut(None).unwrap().push(Message::user("hello"));
        space.set_plan(Plan::with_tasks("ship it", vec![Task::new("build", "")]));

        let record = space.to_record();
        let restored = Space::from_record(record.clone(), 2);
        assert_eq!(restored.id, space.id);
        assert_eq!(restored.thread(&thread).unwrap().history.len(), 1);
        assert_eq!(restored.history().len(), 1);
        assert_eq!(restored.plan().unwrap().len(), 1);
        assert_eq!(restored.to_record(), record);
        assert_eq!(restored.collaboration().agents(), vec!["coder".to_string()]);
    }

    #[test]
    fn test_unknown_thread() {
        let mut space = Space::new("g", vec![], 1);
        assert!(matches!(
            space.conversation_mut(Some("nope")),
            Err(OrchestraError::ThreadNotFound(_))
        ));
        assert!(space.conversation(None).unwrap().is_empty());
    }

    #[test]
    fn test_input_queue() {
        let mut space = Space::new("g", vec![], 1);
        space.enqueue_input("a");
        space.enqueue_input("b");
        assert_eq!(space.next_input().unwrap().content, "a");
        assert_eq!(space.clear_inputs(), 1);
        assert_eq!(space.pending_inputs(), 0);
    }
}
