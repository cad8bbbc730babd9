//! 内存记录存储（默认后端，进程退出即丢失）

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::{EntityKind, RecordStore, StoreError};

struct Row {
    parent: Option<String>,
    value: Value,
    /// 首次写入序号，用于 list 保序
    seq: u64,
}

#[derive(Default)]
pub struct MemoryRecordStore {
    rows: RwLock<HashMap<(EntityKind, String), Row>>,
    next_seq: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(&(kind, id.to_string()))
            .map(|row| row.value.clone()))
    }

    async fn list(&self, kind: EntityKind, parent: Option<&str>) -> Result<Vec<Value>, StoreError> {
        let rows = self.rows.read().await;
        let mut matched: Vec<&Row> = rows
            .iter()
            .filter(|((k, _), row)| {
                *k == kind && parent.map_or(true, |p| row.parent.as_deref() == Some(p))
            })
            .map(|(_, row)| row)
            .collect();
        matched.sort_by_key(|row| row.seq);
        Ok(matched.into_iter().map(|row| row.value.clone()).collect())
    }

    async fn put(
        &self,
        kind: EntityKind,
        id: &str,
        parent: Option<&str>,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let key = (kind, id.to_string());
        let seq = match rows.get(&key) {
            Some(existing) => existing.seq,
            None => self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        rows.insert(
            key,
            Row {
                parent: parent.map(str::to_string),
                value,
                seq,
            },
        );
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .rows
            .write()
            .await
            .remove(&(kind, id.to_string()))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud_and_list_order() {
        let store = MemoryRecordStore::new();
        store.put(EntityKind::Artifact, "b", Some("s1"), json!({"id": "b"})).await.unwrap();
        store.put(EntityKind::Artifact, "a", Some("s1"), json!({"id": "a"})).await.unwrap();
        store.put(EntityKind::Artifact, "c", Some("s2"), json!({"id": "c"})).await.unwrap();

        let in_s1 = store.list(EntityKind::Artifact, Some("s1")).await.unwrap();
        assert_eq!(in_s1, vec![json!({"id": "b"}), json!({"id": "a"})]);
        assert_eq!(store.list(EntityKind::Artifact, None).await.unwrap().len(), 3);

        // 覆盖写保留原位置
        store.put(EntityKind::Artifact, "b", Some("s1"), json!({"id": "b", "v": 2})).await.unwrap();
        let in_s1 = store.list(EntityKind::Artifact, Some("s1")).await.unwrap();
        assert_eq!(in_s1[0]["v"], 2);

        assert!(store.delete(EntityKind::Artifact, "a").await.unwrap());
        assert!(!store.delete(EntityKind::Artifact, "a").await.unwrap());
        assert!(store.get(EntityKind::Artifact, "a").await.unwrap().is_none());
        assert!(store.get(EntityKind::Space, "b").await.unwrap().is_none());
    }
}
