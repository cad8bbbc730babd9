//! 对话层：消息、只追加的会话历史、输入 FIFO 队列

pub mod conversation;
pub mod message_queue;

pub use conversation::{window_of, ConversationHistory, Message, Role};
pub use message_queue::{MessageQueue, QueuedInput};
