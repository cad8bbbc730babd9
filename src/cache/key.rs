//! 结构化缓存键与订阅主题
//!
//! 缓存键是 (实体种类, ID, 过滤哈希) 三元组，失效按结构匹配而不是字符串前缀，
//! 避免前缀碰撞或拼写错误导致的静默脏读。

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::store::EntityKind;

/// 缓存键：实体键带 id，集合键带 filter（列表过滤条件的哈希，如所属 Space）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntityKind,
    pub id: Option<String>,
    pub filter: Option<u64>,
}

impl CacheKey {
    pub fn entity(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
            filter: None,
        }
    }

    pub fn collection(kind: EntityKind, parent: Option<&str>) -> Self {
        Self {
            kind,
            id: None,
            filter: Some(filter_hash(parent)),
        }
    }

    pub fn is_collection(&self) -> bool {
        self.id.is_none()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(id) = &self.id {
            write!(f, ":{}", id)?;
        }
        if let Some(filter) = self.filter {
            write!(f, ":{:x}", filter)?;
        }
        Ok(())
    }
}

/// 列表过滤条件的哈希
pub fn filter_hash(parent: Option<&str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    parent.hash(&mut hasher);
    hasher.finish()
}

/// 失效模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// 精确的一个键
    Exact(CacheKey),
    /// 某种实体的全部集合键
    Collections(EntityKind),
    /// 某种实体的全部键
    Kind(EntityKind),
    /// 全部键
    All,
}

impl KeyPattern {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Collections(kind) => key.kind == *kind && key.is_collection(),
            Self::Kind(kind) => key.kind == *kind,
            Self::All => true,
        }
    }
}

/// 订阅主题：单个实体，或某种实体的集合（可限定所属父实体）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Entity { kind: EntityKind, id: String },
    Collection { kind: EntityKind, parent: Option<String> },
}

impl Topic {
    pub fn entity(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::Entity { kind, id: id.into() }
    }

    pub fn collection(kind: EntityKind, parent: Option<&str>) -> Self {
        Self::Collection {
            kind,
            parent: parent.map(str::to_string),
        }
    }

    /// 一次变更需要通知的全部主题：实体本身、全集合、所属父实体的集合
    pub fn affected_by(kind: EntityKind, id: &str, parent: Option<&str>) -> Vec<Topic> {
        let mut topics = vec![Topic::entity(kind, id), Topic::collection(kind, None)];
        if parent.is_some() {
            topics.push(Topic::collection(kind, parent));
        }
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_match_structurally() {
        let space = CacheKey::entity(EntityKind::Space, "s1");
        let spaces = CacheKey::entity(EntityKind::Space, "s10");
        let artifacts = CacheKey::collection(EntityKind::Artifact, Some("s1"));

        // 字符串前缀 "space:s1" 会误伤 "space:s10"，结构匹配不会
        assert!(KeyPattern::Exact(space.clone()).matches(&space));
        assert!(!KeyPattern::Exact(space.clone()).matches(&spaces));

        assert!(KeyPattern::Collections(EntityKind::Artifact).matches(&artifacts));
        assert!(!KeyPattern::Collections(EntityKind::Space).matches(&space));
        assert!(KeyPattern::Kind(EntityKind::Space).matches(&spaces));
        assert!(KeyPattern::All.matches(&artifacts));
    }

    #[test]
    fn test_collection_keys_differ_by_parent() {
        assert_ne!(
            CacheKey::collection(EntityKind::Task, Some("a")),
            CacheKey::collection(EntityKind::Task, Some("b"))
        );
        assert_ne!(
            CacheKey::collection(EntityKind::Task, None),
            CacheKey::collection(EntityKind::Task, Some("a"))
        );
    }

    #[test]
    fn test_affected_topics() {
        let topics = Topic::affected_by(EntityKind::Artifact, "x", Some("s1"));
        assert_eq!(topics.len(), 3);
        assert!(topics.contains(&Topic::collection(EntityKind::Artifact, Some("s1"))));
        assert_eq!(Topic::affected_by(EntityKind::Space, "s1", None).len(), 2);
        assert_eq!(
            CacheKey::entity(EntityKind::Space, "s1").to_string(),
            "space:s1"
        );
    }
}
