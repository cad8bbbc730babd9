//! 对话记录：消息与只追加的会话历史
//!
//! Space 的默认对话与每个 SpaceTask 线程各持有一份 ConversationHistory；
//! 编排器按已有条数切片追加新消息，并只向单个 Agent 转发最近的窗口。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 发言的 Agent 名（assistant 消息时填写）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 只追加的对话记录
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// 追加 transcript 中比已记录部分更新的消息，返回追加条数
    ///
    /// 按已有条数切片而不是按内容比对：调用方必须提交单调增长的完整 transcript。
    pub fn append_newer(&mut self, transcript: &[Message]) -> usize {
        let existing = self.messages.len();
        if transcript.len() <= existing {
            return 0;
        }
        let fresh = &transcript[existing..];
        self.messages.extend_from_slice(fresh);
        fresh.len()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 最近 n 条消息（不足 n 条时返回全部）
    pub fn window(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 取 transcript 的最近 n 条，供单 Agent 委派时限制 prompt 大小
pub fn window_of(messages: &[Message], n: usize) -> Vec<Message> {
    let start = messages.len().saturating_sub(n);
    messages[start..].to_vec()
}
