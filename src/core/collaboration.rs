//! Agent 协作：定向 / 广播消息与共享上下文
//!
//! 每个目标 Agent 一个 FIFO 队列，get_messages 读取即清空；广播发给除发送者外的每个 Agent，
//! 并额外追加到 "broadcast" 队列。共享上下文后写覆盖，记录最后更新时间与更新者。
//! 监听器同步调用，单个监听器 panic 只记录日志，不影响其他监听器。

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 广播伪目标
pub const BROADCAST: &str = "broadcast";

/// Agent 之间的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl CollaborationMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            from: from.into(),
            to: to.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }
}

/// 共享上下文
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContext {
    pub data: serde_json::Map<String, Value>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

type Listener = Arc<dyn Fn(&CollaborationMessage) + Send + Sync>;

/// 监听器句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId {
    agent_id: String,
    id: u64,
}

/// 每个 Space 一个协作管理器
pub struct CollaborationManager {
    space_id: String,
    agents: Mutex<Vec<String>>,
    queues: Mutex<HashMap<String, VecDeque<CollaborationMessage>>>,
    shared: Mutex<SharedContext>,
    listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_listener: AtomicU64,
}

impl CollaborationManager {
    pub fn new(space_id: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            agents: Mutex::new(Vec::new()),
            queues: Mutex::new(HashMap::new()),
            shared: Mutex::new(SharedContext::default()),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    /// 登记参与广播的 Agent；重复登记忽略
    pub fn register_agent(&self, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        let mut agents = lock(&self.agents);
        if !agents.contains(&agent_id) {
            agents.push(agent_id);
        }
    }

    pub fn unregister_agent(&self, agent_id: &str) {
        lock(&self.agents).retain(|a| a != agent_id);
    }

    pub fn agents(&self) -> Vec<String> {
        lock(&self.agents).clone()
    }

    /// 定向发送；目标为 "broadcast" 时按广播处理
    pub fn send_message(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> CollaborationMessage {
        let message = CollaborationMessage::new(from, to, content);
        self.deliver(message.clone());
        message
    }

    /// 广播给除发送者外的每个已登记 Agent，并追加到 broadcast 队列
    pub fn broadcast(&self, from: impl Into<String>, content: impl Into<String>) -> CollaborationMessage {
        let message = CollaborationMessage::new(from, BROADCAST, content);
        self.deliver(message.clone());
        message
    }

    /// 投递一条已构造的消息
    pub fn deliver(&self, message: CollaborationMessage) {
        let recipients: Vec<String> = if message.is_broadcast() {
            let mut recipients: Vec<String> = lock(&self.agents)
                .iter()
                .filter(|a| **a != message.from)
                .cloned()
                .collect();
            recipients.push(BROADCAST.to_string());
            recipients
        } else {
            vec![message.to.clone()]
        };

        {
            let mut queues = lock(&self.queues);
            for recipient in &recipients {
                queues
                    .entry(recipient.clone())
                    .or_default()
                    .push_back(message.clone());
            }
        }
        tracing::debug!(
            space = %self.space_id,
            from = %message.from,
            to = %message.to,
            recipients = recipients.len(),
            "Collaboration message delivered"
        );

        for recipient in &recipients {
            self.notify(recipient, &message);
        }
    }

    /// 取出并清空某 Agent 的消息
    pub fn get_messages(&self, agent_id: &str) -> Vec<CollaborationMessage> {
        lock(&self.queues)
            .get_mut(agent_id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// 只读查看，不清空
    pub fn peek_messages(&self, agent_id: &str) -> Vec<CollaborationMessage> {
        lock(&self.queues)
            .get(agent_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, agent_id: &str) -> usize {
        lock(&self.queues).get(agent_id).map_or(0, VecDeque::len)
    }

    /// 写共享上下文（后写覆盖）
    pub fn update_shared_context(&self, agent_id: &str, key: impl Into<String>, value: Value) {
        let mut shared = lock(&self.shared);
        shared.data.insert(key.into(), value);
        shared.updated_at = Some(Utc::now());
        shared.updated_by = Some(agent_id.to_string());
    }

    pub fn shared_value(&self, key: &str) -> Option<Value> {
        lock(&self.shared).data.get(key).cloned()
    }

    pub fn shared_context(&self) -> SharedContext {
        lock(&self.shared).clone()
    }

    /// 订阅发给某 Agent 的消息；订阅 "broadcast" 可收到每次广播
    pub fn subscribe(
        &self,
        agent_id: impl Into<String>,
        listener: impl Fn(&CollaborationMessage) + Send + Sync + 'static,
    ) -> ListenerId {
        let agent_id = agent_id.into();
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners)
            .entry(agent_id.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        ListenerId { agent_id, id }
    }

    pub fn unsubscribe(&self, handle: &ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        match listeners.get_mut(&handle.agent_id) {
            Some(list) => {
                let before = list.len();
                list.retain(|(id, _)| *id != handle.id);
                list.len() != before
            }
            None => false,
        }
    }

    fn notify(&self, agent_id: &str, message: &CollaborationMessage) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .get(agent_id)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                tracing::warn!(space = %self.space_id, agent = %agent_id, "Collaboration listener panicked");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
