//! SQLite 记录存储
//!
//! 单表 records(kind, id, parent, body, updated_at)，body 存实体 JSON；
//! rusqlite 为同步 API，所有语句在 spawn_blocking 中执行，连接由 Mutex 串行化。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::store::{EntityKind, RecordStore, StoreError};

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteRecordStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(backend_err)?;
            }
        }
        let conn = Connection::open(path).map_err(backend_err)?;
        Self::init(conn)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                parent TEXT,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (kind, id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_parent ON records(kind, parent);",
        )
        .map_err(backend_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(backend_err)?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM records WHERE kind = ?1 AND id = ?2",
                    params![kind.as_str(), id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend_err)?;
            body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn list(&self, kind: EntityKind, parent: Option<&str>) -> Result<Vec<Value>, StoreError> {
        let parent = parent.map(str::to_string);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT body FROM records
                     WHERE kind = ?1 AND (?2 IS NULL OR parent = ?2)
                     ORDER BY rowid ASC",
                )
                .map_err(backend_err)?;
            let rows = stmt
                .query_map(params![kind.as_str(), parent], |row| row.get::<_, String>(0))
                .map_err(backend_err)?;
            let mut values = Vec::new();
            for body in rows {
                let body = body.map_err(backend_err)?;
                values.push(serde_json::from_str(&body)?);
            }
            Ok(values)
        })
        .await
    }

    async fn put(
        &self,
        kind: EntityKind,
        id: &str,
        parent: Option<&str>,
        value: Value,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let parent = parent.map(str::to_string);
        let body = serde_json::to_string(&value)?;
        let now = chrono::Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO records (kind, id, parent, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(kind, id) DO UPDATE SET
                    parent = excluded.parent,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![kind.as_str(), id, parent, body, now],
            )
            .map_err(backend_err)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "DELETE FROM records WHERE kind = ?1 AND id = ?2",
                    params![kind.as_str(), id],
                )
                .map_err(backend_err)?;
            Ok(n > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_crud() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.put(EntityKind::Task, "t1", Some("s1"), json!({"id": "t1", "n": 1})).await.unwrap();
        store.put(EntityKind::Task, "t2", Some("s2"), json!({"id": "t2"})).await.unwrap();
        store.put(EntityKind::Task, "t1", Some("s1"), json!({"id": "t1", "n": 2})).await.unwrap();

        assert_eq!(store.get(EntityKind::Task, "t1").await.unwrap().unwrap()["n"], 2);
        assert_eq!(store.list(EntityKind::Task, Some("s1")).await.unwrap().len(), 1);
        let all = store.list(EntityKind::Task, None).await.unwrap();
        assert_eq!(all[0]["id"], "t1");
        assert_eq!(all[1]["id"], "t2");

        assert!(store.delete(EntityKind::Task, "t1").await.unwrap());
        assert!(store.get(EntityKind::Task, "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hive.db");
        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.put(EntityKind::Space, "s1", None, json!({"goal": "g"})).await.unwrap();
        }
        let reopened = SqliteRecordStore::open(&path).unwrap();
        let value = reopened.get(EntityKind::Space, "s1").await.unwrap().unwrap();
        assert_eq!(value["goal"], "g");
    }
}
