//! Mock LLM 客户端（用于演示与测试，无需 API）
//!
//! 取最后一条 User 消息原样回显，便于本地跑通编排流程。

use async_trait::async_trait;

use crate::llm::{GenerateRequest, Generation, LlmClient, LlmError};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(Generation::text(format!("Echo from Mock: {}", last_user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{collect_stream, FinishReason};
    use crate::memory::Message;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let request = GenerateRequest::new(
            "sys",
            vec![Message::user("first"), Message::assistant("x"), Message::user("second")],
        );
        let generation = MockLlmClient.generate(&request).await.unwrap();
        assert_eq!(generation.text, "Echo from Mock: second");
    }

    #[tokio::test]
    async fn test_default_stream_wraps_generate() {
        let request = GenerateRequest::new("sys", vec![Message::user("hi")]);
        let stream = MockLlmClient.generate_stream(&request).await.unwrap();
        let generation = collect_stream(stream).await.unwrap();
        assert_eq!(generation.text, "Echo from Mock: hi");
        assert_eq!(generation.finish_reason, FinishReason::Stop);
    }
}
