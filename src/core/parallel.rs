//! 并行执行引擎：有界并发的扇出 / 扇入
//!
//! Semaphore 限制并发（默认 3）；按优先级降序稳定排序后提交；单个单元失败只写入其结果的 error，
//! 不影响兄弟单元。每个单元持有独立的 CancellationToken，cancel_task 可在下一个 await 点中断它。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::memory::Message;

/// 一个扇出单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelTask {
    pub id: String,
    pub agent_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// 数值越大越先提交
    #[serde(default)]
    pub priority: i32,
}

impl ParallelTask {
    pub fn new(agent_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: format!("ptask_{}", uuid::Uuid::new_v4()),
            agent_id: agent_id.into(),
            messages,
            metadata: serde_json::Map::new(),
            priority: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// 单元结果：result 与 error 二选一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelResult {
    pub task_id: String,
    pub agent_id: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ParallelResult {
    fn settled(task: &ParallelTask, outcome: Result<String, String>, duration_ms: u64) -> Self {
        let (result, error) = match outcome {
            Ok(text) => (Some(text), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            task_id: task.id.clone(),
            agent_id: task.agent_id.clone(),
            result,
            error,
            duration_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 可被并行引擎调度的执行者（通常是 Agent）
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, task: &ParallelTask) -> Result<String, String>;
}

/// 并行执行引擎
pub struct ParallelEngine {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    /// 在途单元：task_id -> 取消令牌
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ParallelEngine {
    pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 执行一批单元，为每个输入返回一个结果，按（排序后的）提交顺序排列
    pub async fn execute_parallel(
        &self,
        tasks: Vec<ParallelTask>,
        agents: &HashMap<String, Arc<dyn AgentExecutor>>,
    ) -> Vec<ParallelResult> {
        let mut ordered = tasks;
        // sort_by 是稳定排序，同优先级保持输入顺序
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::debug!(
            units = ordered.len(),
            max_concurrency = self.max_concurrency,
            "Dispatching parallel batch"
        );

        let mut slots: Vec<Option<ParallelResult>> = vec![None; ordered.len()];
        let tokens: Vec<CancellationToken> = {
            let mut active = self.lock_active();
            ordered
                .iter()
                .map(|task| {
                    let token = CancellationToken::new();
                    active.insert(task.id.clone(), token.clone());
                    token
                })
                .collect()
        };
        let mut set = JoinSet::new();

        // 许可在派发循环中按排序后的顺序获取，保证高优先级先开始执行
        for (index, (task, token)) in ordered.iter().cloned().zip(tokens).enumerate() {
            let Some(agent) = agents.get(&task.agent_id).cloned() else {
                let error = format!("Agent not found: {}", task.agent_id);
                slots[index] = Some(self.settle_inline(&task, error));
                continue;
            };
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let error = if token.is_cancelled() {
                    format!("Task cancelled: {}", task.id)
                } else {
                    "Parallel scheduler closed".to_string()
                };
                slots[index] = Some(self.settle_inline(&task, error));
                continue;
            };

            let active = Arc::clone(&self.active);
            set.spawn(async move {
                let dispatched = Instant::now();
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(format!("Task cancelled: {}", task.id)),
                    outcome = run_unit(agent, &task) => outcome,
                };
                drop(permit);
                let duration_ms = dispatched.elapsed().as_millis() as u64;
                active
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&task.id);
                (index, ParallelResult::settled(&task, outcome, duration_ms))
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Some(err) = &result.error {
                        tracing::warn!(task_id = %result.task_id, agent = %result.agent_id, "Parallel unit failed: {}", err);
                    }
                    slots[index] = Some(result);
                }
                Err(e) => tracing::warn!("Parallel unit aborted: {}", e),
            }
        }

        ordered
            .iter()
            .zip(slots)
            .map(|(task, slot)| {
                slot.unwrap_or_else(|| {
                    self.lock_active().remove(&task.id);
                    ParallelResult::settled(task, Err("Task aborted".to_string()), 0)
                })
            })
            .collect()
    }

    /// 取消一个在途单元：移除登记并触发其令牌；返回单元是否仍在途
    pub fn cancel_task(&self, task_id: &str) -> bool {
        match self.lock_active().remove(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_active().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 未派发即结束的单元（缺少 Agent、排队时被取消）
    fn settle_inline(&self, task: &ParallelTask, error: String) -> ParallelResult {
        self.lock_active().remove(&task.id);
        tracing::warn!(task_id = %task.id, agent = %task.agent_id, "Parallel unit not dispatched: {}", error);
        ParallelResult::settled(task, Err(error), 0)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ParallelEngine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CONCURRENCY)
    }
}

async fn run_unit(agent: Arc<dyn AgentExecutor>, task: &ParallelTask) -> Result<String, String> {
    match AssertUnwindSafe(agent.execute(task)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => Err(format!("Agent {} panicked", task.agent_id)),
    }
}
