//! 记录存储：Space / Task / Artifact / Agent / Tool 实体的整记录读写
//!
//! 存储层不支持部分更新，调用方读取-合并-写回；所有读写通过 cache::DataAccess 进行。

pub mod memory;
pub mod records;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryRecordStore;
pub use records::{AgentProfile, ArtifactRecord, SpaceRecord, TaskRecord, ThreadRecord, ToolRecord};
pub use sqlite::SqliteRecordStore;

/// 存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// 实体种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Space,
    Task,
    Artifact,
    Agent,
    Tool,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Space => "space",
            Self::Task => "task",
            Self::Artifact => "artifact",
            Self::Agent => "agent",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可存储实体：种类、ID、所属父实体（如 Task / Artifact 所属的 Space）
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn parent_id(&self) -> Option<&str> {
        None
    }
}

/// 记录存储接口：按 (kind, id) 存取 JSON 快照
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError>;

    /// 列出某种实体；parent 为 Some 时只返回该父实体下的记录。按首次写入顺序返回
    async fn list(&self, kind: EntityKind, parent: Option<&str>) -> Result<Vec<Value>, StoreError>;

    /// 整记录写入（插入或覆盖）
    async fn put(
        &self,
        kind: EntityKind,
        id: &str,
        parent: Option<&str>,
        value: Value,
    ) -> Result<(), StoreError>;

    /// 删除，返回记录是否存在
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError>;
}
