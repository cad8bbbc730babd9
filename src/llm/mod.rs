//! LLM 层：模型推理服务抽象与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::MockLlmClient;
pub use traits::{
    collect_stream, DeltaStream, FinishReason, GenerateRequest, Generation, LlmClient, LlmError,
    SamplingParams, StreamDelta, ToolCall, ToolSpec,
};
