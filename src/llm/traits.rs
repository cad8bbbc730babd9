//! 模型推理服务抽象
//!
//! 编排内核只关心 text、tool_calls 与结束原因；具体后端（OpenAI 兼容 / Mock）实现 LlmClient：
//! generate（非流式）、generate_stream（增量事件流）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::Message;

/// 推理调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM stream failed: {0}")]
    Stream(String),

    #[error("LLM request cancelled")]
    Cancelled,
}

/// 暴露给模型的工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 采样参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// 一次推理请求
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub params: SamplingParams,
}

impl GenerateRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            ..Default::default()
        }
    }
}

/// 模型请求的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    Error,
}

/// 非流式推理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// 流式增量事件
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Text(String),
    ToolCall(ToolCall),
    Finish(FinishReason),
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, LlmError>> + Send>>;

/// 模型推理服务：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, LlmError>;

    /// 流式完成；默认把 generate 的结果拆成增量事件
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<DeltaStream, LlmError> {
        let generation = self.generate(request).await?;
        let mut deltas = Vec::new();
        if !generation.text.is_empty() {
            deltas.push(Ok(StreamDelta::Text(generation.text)));
        }
        deltas.extend(
            generation
                .tool_calls
                .into_iter()
                .map(|call| Ok(StreamDelta::ToolCall(call))),
        );
        deltas.push(Ok(StreamDelta::Finish(generation.finish_reason)));
        Ok(Box::pin(stream::iter(deltas)))
    }
}

/// 把增量流收集为完整结果
pub async fn collect_stream(mut stream: DeltaStream) -> Result<Generation, LlmError> {
    let mut generation = Generation::default();
    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::Text(text) => generation.text.push_str(&text),
            StreamDelta::ToolCall(call) => generation.tool_calls.push(call),
            StreamDelta::Finish(reason) => generation.finish_reason = reason,
        }
    }
    Ok(generation)
}
