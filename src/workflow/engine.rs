//! 工作流引擎
//!
//! 单线程的步骤解释器：第 0 个步骤即入口，按 next 循环推进。事件通过 mpsc 通道同步、有序地发出：
//! 执行前 StepStart，执行后恰好一个 StepComplete / WorkflowPaused / WorkflowFailed / WorkflowComplete
//! （condition 步骤直接跳到分支，不发 StepComplete）。
//! execute_step 遇到未知的上下文或步骤时静默返回，供调用方幂等地恢复执行。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};

use crate::workflow::template::{render, render_value};
use crate::workflow::types::*;
use crate::workflow::StepExecutor;

/// 工作流引擎
pub struct WorkflowEngine {
    workflows: RwLock<HashMap<WorkflowId, Arc<Workflow>>>,
    contexts: RwLock<HashMap<String, WorkflowContext>>,
    executor: Arc<dyn StepExecutor>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<WorkflowEvent>>>,
}

impl WorkflowEngine {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            executor,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// 注册工作流定义；同 ID 覆盖
    pub async fn register_workflow(&self, workflow: Workflow) {
        tracing::debug!(workflow = %workflow.id, steps = workflow.steps.len(), "Registering workflow");
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), Arc::new(workflow));
    }

    pub async fn workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    pub async fn workflow_ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<WorkflowId> = self.workflows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 上下文快照
    pub async fn context(&self, context_id: &str) -> Option<WorkflowContext> {
        self.contexts.read().await.get(context_id).cloned()
    }

    pub async fn context_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 移除已终止的上下文并返回其最终快照；运行中或暂停的上下文不能移除
    pub async fn remove_context(&self, context_id: &str) -> Result<WorkflowContext, WorkflowError> {
        let mut contexts = self.contexts.write().await;
        match contexts.get(context_id) {
            None => Err(WorkflowError::ContextNotFound(context_id.to_string())),
            Some(ctx) if !ctx.status.is_terminal() => Err(WorkflowError::ContextActive(context_id.to_string())),
            Some(_) => {
                tracing::debug!(context = %context_id, "Workflow context removed");
                contexts
                    .remove(context_id)
                    .ok_or_else(|| WorkflowError::ContextNotFound(context_id.to_string()))
            }
        }
    }

    /// 订阅之后发出的全部事件
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<WorkflowEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// 创建上下文并从第 0 个步骤开始执行，直到完成、暂停或失败；返回此时的上下文快照
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        input: Variables,
    ) -> Result<WorkflowContext, WorkflowError> {
        let workflow = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut variables = workflow.variables.clone();
        variables.extend(input.iter().map(|(k, v)| (k.clone(), v.clone())));

        let now = Utc::now();
        let context = WorkflowContext {
            id: format!("wfctx_{}", uuid::Uuid::new_v4()),
            workflow_id: workflow.id.clone(),
            variables,
            history: Vec::new(),
            current_step_id: None,
            status: WorkflowStatus::Running,
            input,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let context_id = context.id.clone();
        tracing::info!(workflow = %workflow.id, context = %context_id, "Workflow started");
        self.contexts.write().await.insert(context_id.clone(), context);

        match workflow.entry() {
            Some(entry) => self.execute_step(&context_id, &entry.id).await,
            None => self.complete(&context_id).await,
        }

        self.context(&context_id)
            .await
            .ok_or(WorkflowError::ContextNotFound(context_id))
    }

    /// 从指定步骤开始执行；未知上下文或步骤时静默返回
    pub async fn execute_step(&self, context_id: &str, step_id: &str) {
        let mut next = Some(step_id.to_string());
        while let Some(step_id) = next.take() {
            next = self.run_step(context_id, &step_id).await;
        }
    }

    /// 恢复暂停的上下文：合并输入，从暂停步骤的 next 继续
    pub async fn resume_workflow(
        &self,
        context_id: &str,
        input: Variables,
    ) -> Result<WorkflowContext, WorkflowError> {
        let (workflow_id, paused_step) = self
            .with_context(context_id, |ctx| {
                if ctx.status != WorkflowStatus::Paused {
                    return Err(WorkflowError::NotPaused(context_id.to_string()));
                }
                ctx.variables
                    .extend(input.iter().map(|(k, v)| (k.clone(), v.clone())));
                ctx.status = WorkflowStatus::Running;
                if let Some(step_id) = &ctx.current_step_id {
                    ctx.history.push(StepRecord {
                        step_id: step_id.clone(),
                        step_type: "human_input".to_string(),
                        result: Value::Object(input.clone()),
                        at: Utc::now(),
                    });
                }
                Ok((ctx.workflow_id.clone(), ctx.current_step_id.clone()))
            })
            .await
            .ok_or_else(|| WorkflowError::ContextNotFound(context_id.to_string()))??;

        tracing::info!(context = %context_id, "Workflow resumed");

        let next = match (self.workflow(&workflow_id).await, paused_step) {
            (Some(workflow), Some(step_id)) => workflow
                .step(&step_id)
                .and_then(|s| s.next_step())
                .map(str::to_string),
            _ => None,
        };
        match next {
            Some(step_id) => self.execute_step(context_id, &step_id).await,
            None => self.complete(context_id).await,
        }

        self.context(context_id)
            .await
            .ok_or_else(|| WorkflowError::ContextNotFound(context_id.to_string()))
    }

    /// 取消上下文；已终止的上下文保持原状态。正在执行的步骤结束后不再推进
    pub async fn cancel_workflow(&self, context_id: &str) -> Result<WorkflowContext, WorkflowError> {
        let snapshot = self
            .with_context(context_id, |ctx| {
                if !ctx.status.is_terminal() {
                    ctx.status = WorkflowStatus::Cancelled;
                }
                ctx.clone()
            })
            .await
            .ok_or_else(|| WorkflowError::ContextNotFound(context_id.to_string()))?;
        tracing::info!(context = %context_id, status = ?snapshot.status, "Workflow cancel requested");
        Ok(snapshot)
    }

    /// 执行单个步骤，返回下一个要执行的步骤
    async fn run_step(&self, context_id: &str, step_id: &str) -> Option<StepId> {
        let Some((workflow_id, status, variables)) = self
            .contexts
            .read()
            .await
            .get(context_id)
            .map(|c| (c.workflow_id.clone(), c.status, c.variables.clone()))
        else {
            tracing::debug!(context = %context_id, "execute_step: unknown context, ignored");
            return None;
        };
        if status != WorkflowStatus::Running {
            tracing::debug!(context = %context_id, ?status, "execute_step: context not running, ignored");
            return None;
        }
        let Some(workflow) = self.workflow(&workflow_id).await else {
            tracing::debug!(workflow = %workflow_id, "execute_step: workflow no longer registered, ignored");
            return None;
        };
        let Some(step) = workflow.step(step_id).cloned() else {
            tracing::debug!(context = %context_id, step = %step_id, "execute_step: unknown step, ignored");
            return None;
        };

        self.with_context(context_id, |ctx| ctx.current_step_id = Some(step.id.clone()))
            .await;
        self.emit(WorkflowEvent::StepStart {
            context_id: context_id.to_string(),
            step_id: step.id.clone(),
        });

        match &step.kind {
            StepKind::Condition {
                predicate,
                if_true,
                if_false,
            } => {
                let branch = if predicate.evaluate(&variables) { if_true } else { if_false };
                self.with_context(context_id, |ctx| {
                    ctx.history.push(record(&step, json!({ "branch": branch })));
                })
                .await;
                return Some(branch.clone());
            }
            StepKind::HumanInput { prompt } => {
                self.with_context(context_id, |ctx| ctx.status = WorkflowStatus::Paused)
                    .await;
                tracing::info!(context = %context_id, step = %step.id, "Workflow paused for human input");
                self.emit(WorkflowEvent::WorkflowPaused {
                    context_id: context_id.to_string(),
                    reason: prompt.clone(),
                    step_id: step.id.clone(),
                });
                return None;
            }
            StepKind::End => {
                self.with_context(context_id, |ctx| ctx.history.push(record(&step, Value::Null)))
                    .await;
                self.complete(context_id).await;
                return None;
            }
            _ => {}
        }

        let result = match self.run_action(&workflow, &step, &variables).await {
            Ok(result) => result,
            Err(message) => {
                self.fail(context_id, &step.id, message).await;
                return None;
            }
        };

        let still_running = self
            .with_context(context_id, |ctx| {
                if ctx.status != WorkflowStatus::Running {
                    return false;
                }
                merge_result(&mut ctx.variables, &step, &result);
                ctx.history.push(record(&step, result.clone()));
                true
            })
            .await
            .unwrap_or(false);
        if !still_running {
            tracing::debug!(context = %context_id, step = %step.id, "Context left running state during step");
            return None;
        }

        self.emit(WorkflowEvent::StepComplete {
            context_id: context_id.to_string(),
            step_id: step.id.clone(),
            result,
        });

        match step.next_step() {
            Some(next) => Some(next.to_string()),
            None => {
                self.complete(context_id).await;
                None
            }
        }
    }

    /// 执行有外部副作用的步骤
    async fn run_action(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        variables: &Variables,
    ) -> Result<Value, String> {
        match &step.kind {
            StepKind::Agent(_) | StepKind::Tool(_) => self.run_leaf(step, variables).await,
            StepKind::Parallel { branches } => {
                let leaves = branches
                    .iter()
                    .map(|id| {
                        workflow
                            .step(id)
                            .ok_or_else(|| format!("Parallel branch not found: {}", id))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let outcomes = join_all(leaves.iter().map(|leaf| self.run_leaf(leaf, variables))).await;

                let mut merged = Variables::new();
                for (leaf, outcome) in leaves.iter().zip(outcomes) {
                    let value = outcome.map_err(|e| format!("branch {}: {}", leaf.id, e))?;
                    merge_result(&mut merged, leaf, &value);
                }
                Ok(Value::Object(merged))
            }
            StepKind::SubWorkflow { workflow_id } => {
                self.run_subworkflow(workflow_id.clone(), variables.clone()).await
            }
            StepKind::Start => Ok(Value::Null),
            StepKind::Condition { .. } | StepKind::HumanInput { .. } | StepKind::End => Ok(Value::Null),
        }
    }

    /// agent / tool 叶子步骤
    async fn run_leaf(&self, step: &WorkflowStep, variables: &Variables) -> Result<Value, String> {
        match &step.kind {
            StepKind::Agent(config) => {
                let prompt = render(&config.prompt, variables);
                self.executor.run_agent(config, prompt, variables).await
            }
            StepKind::Tool(config) => {
                let args = render_value(&config.args, variables);
                self.executor.run_tool(&step.id, config, args).await
            }
            other => Err(format!(
                "step {} of type {} cannot run as a parallel branch",
                step.id,
                other.type_name()
            )),
        }
    }

    /// 以当前变量为输入运行子工作流；子工作流未完成（暂停或失败）视为本步骤失败。
    /// 子上下文只存活于本步骤内，结束后即移除
    fn run_subworkflow(&self, workflow_id: WorkflowId, input: Variables) -> BoxFuture<'_, Result<Value, String>> {
        Box::pin(async move {
            let child = self
                .start_workflow(&workflow_id, input)
                .await
                .map_err(|e| e.to_string())?;
            self.contexts.write().await.remove(&child.id);
            match child.status {
                WorkflowStatus::Completed => Ok(Value::Object(child.output.unwrap_or_default())),
                status => Err(format!(
                    "subworkflow {} ended as {:?}{}",
                    workflow_id,
                    status,
                    child.error.map(|e| format!(": {}", e)).unwrap_or_default()
                )),
            }
        })
    }

    async fn complete(&self, context_id: &str) {
        let output = self
            .with_context(context_id, |ctx| {
                ctx.status = WorkflowStatus::Completed;
                ctx.current_step_id = None;
                ctx.output = Some(ctx.variables.clone());
                ctx.variables.clone()
            })
            .await;
        if let Some(output) = output {
            tracing::info!(context = %context_id, "Workflow completed");
            self.emit(WorkflowEvent::WorkflowComplete {
                context_id: context_id.to_string(),
                output,
            });
        }
    }

    async fn fail(&self, context_id: &str, step_id: &str, message: String) {
        let error = WorkflowError::StepFailed {
            step_id: step_id.to_string(),
            message,
        }
        .to_string();
        tracing::warn!(context = %context_id, "Workflow failed: {}", error);
        self.with_context(context_id, |ctx| {
            ctx.status = WorkflowStatus::Failed;
            ctx.error = Some(error.clone());
        })
        .await;
        self.emit(WorkflowEvent::WorkflowFailed {
            context_id: context_id.to_string(),
            error,
        });
    }

    async fn with_context<R>(&self, context_id: &str, f: impl FnOnce(&mut WorkflowContext) -> R) -> Option<R> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts.get_mut(context_id)?;
        let out = f(ctx);
        ctx.updated_at = Utc::now();
        Some(out)
    }

    fn emit(&self, event: WorkflowEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn record(step: &WorkflowStep, result: Value) -> StepRecord {
    StepRecord {
        step_id: step.id.clone(),
        step_type: step.kind.type_name().to_string(),
        result,
        at: Utc::now(),
    }
}

/// 对象结果按键合并；其他非 null 结果写入步骤的输出变量（缺省为步骤 ID）
fn merge_result(variables: &mut Variables, step: &WorkflowStep, result: &Value) {
    match result {
        Value::Object(map) => variables.extend(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
        Value::Null => {}
        other => {
            let key = match &step.kind {
                StepKind::Agent(config) => config.output_key.clone(),
                StepKind::Tool(config) => config.output_key.clone(),
                _ => None,
            }
            .unwrap_or_else(|| step.id.clone());
            variables.insert(key, other.clone());
        }
    }
}
