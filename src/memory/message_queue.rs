//! 输入缓冲：每个 Space 一个 FIFO 队列
//!
//! Agent 正在处理时到达的用户输入先入队，编排器按到达顺序取出；取消时整体清空。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 排队中的一条输入
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedInput {
    pub id: String,
    pub content: String,
    /// 入队时间（毫秒时间戳）
    pub enqueued_at: i64,
}

/// FIFO 输入队列
#[derive(Clone, Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<QueuedInput>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队，返回生成的输入 ID
    pub fn push(&mut self, content: impl Into<String>) -> String {
        let id = format!("input_{}", uuid::Uuid::new_v4());
        self.items.push_back(QueuedInput {
            id: id.clone(),
            content: content.into(),
            enqueued_at: chrono::Utc::now().timestamp_millis(),
        });
        id
    }

    pub fn pop(&mut self) -> Option<QueuedInput> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&QueuedInput> {
        self.items.front()
    }

    /// 取出全部排队输入（保持顺序）
    pub fn drain(&mut self) -> Vec<QueuedInput> {
        self.items.drain(..).collect()
    }

    /// 清空队列，返回被丢弃的条数
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
