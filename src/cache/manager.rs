//! 数据访问层：带 TTL 的读穿缓存 + 同步发布/订阅
//!
//! 每次写操作依次：写穿到 RecordStore → 更新/淘汰精确键 → 淘汰同种实体的集合键 →
//! 通知实体主题与集合主题。读操作先查缓存，未过期直接返回，过期则淘汰并按未命中处理。
//! 新订阅者注册后立即收到当前值。
//!
//! 缓存带一个写代数（epoch）：每次写入或淘汰都会递增。读穿在未命中时记下当前代数，
//! 从存储读回后只有代数未变才回填，避免并发写之后被旧快照覆盖。

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::cache::{CacheKey, KeyPattern, Topic};
use crate::store::{
    AgentProfile, ArtifactRecord, Entity, EntityKind, RecordStore, SpaceRecord, StoreError,
    TaskRecord, ToolRecord,
};

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: Instant,
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// 集合订阅收到的变更
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<T> {
    /// 订阅时推送的当前列表
    Snapshot(Vec<T>),
    Upserted(T),
    Deleted(String),
}

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

enum Notification {
    Entity(Option<Value>),
    Upserted(Value),
    Deleted(String),
    Snapshot(Vec<Value>),
}

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    epoch: u64,
}

enum Lookup {
    Hit(Value),
    /// 未命中，附带当时的写代数
    Miss(u64),
}

/// 数据访问 / 缓存管理器。由应用根显式构造并注入，不使用全局单例
pub struct DataAccess {
    store: Arc<dyn RecordStore>,
    ttl: Duration,
    cache: Mutex<CacheState>,
    subscribers: RwLock<HashMap<Topic, Vec<(u64, Callback)>>>,
    next_subscription: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DataAccess {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_ttl(store, Self::DEFAULT_TTL)
    }

    pub fn with_ttl(store: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(CacheState::default()),
            subscribers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // ---------- 读 ----------

    /// 读取单个实体（缓存优先）
    pub async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self.get_value(T::KIND, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// 读取某种实体的列表；parent 为 Some 时只列出该父实体下的记录
    pub async fn list<T: Entity>(&self, parent: Option<&str>) -> Result<Vec<T>, StoreError> {
        let values = self.list_values(T::KIND, parent).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    async fn get_value(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
        let key = CacheKey::entity(kind, id);
        let epoch = match self.cache_lookup(&key) {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Miss(epoch) => epoch,
        };
        let value = self.store.get(kind, id).await?;
        if let Some(value) = &value {
            self.cache_fill(key, value.clone(), epoch);
        }
        Ok(value)
    }

    async fn list_values(&self, kind: EntityKind, parent: Option<&str>) -> Result<Vec<Value>, StoreError> {
        let key = CacheKey::collection(kind, parent);
        let epoch = match self.cache_lookup(&key) {
            Lookup::Hit(Value::Array(items)) => return Ok(items),
            Lookup::Hit(_) => self.lock_cache().epoch,
            Lookup::Miss(epoch) => epoch,
        };
        let items = self.store.list(kind, parent).await?;
        self.cache_fill(key, Value::Array(items.clone()), epoch);
        Ok(items)
    }

    // ---------- 写 ----------

    /// 新建实体（与 put 相同的写穿流程）
    pub async fn create<T: Entity>(&self, entity: T) -> Result<T, StoreError> {
        self.put(entity).await
    }

    /// 整记录写入
    pub async fn put<T: Entity>(&self, entity: T) -> Result<T, StoreError> {
        let value = serde_json::to_value(&entity)?;
        let id = entity.id().to_string();
        let parent = entity.parent_id().map(str::to_string);

        self.store
            .put(T::KIND, &id, parent.as_deref(), value.clone())
            .await?;
        {
            let mut cache = self.lock_cache();
            cache.epoch += 1;
            cache.entries.insert(
                CacheKey::entity(T::KIND, id.as_str()),
                CacheEntry {
                    data: value.clone(),
                    timestamp: Instant::now(),
                },
            );
            let collections = KeyPattern::Collections(T::KIND);
            cache.entries.retain(|key, _| !collections.matches(key));
        }

        self.publish(&Topic::entity(T::KIND, id.as_str()), &Notification::Entity(Some(value.clone())));
        for topic in collection_topics(T::KIND, &id, parent.as_deref()) {
            self.publish(&topic, &Notification::Upserted(value.clone()));
        }
        Ok(entity)
    }

    /// 读取-合并-写回；实体不存在时返回 NotFound
    pub async fn update<T, F>(&self, id: &str, f: F) -> Result<T, StoreError>
    where
        T: Entity,
        F: FnOnce(&mut T),
    {
        let mut current: T = self.get(id).await?.ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })?;
        f(&mut current);
        self.put(current).await
    }

    /// 删除实体，返回记录是否存在
    pub async fn delete<T: Entity>(&self, id: &str) -> Result<bool, StoreError> {
        let parent = match self.get::<T>(id).await? {
            Some(existing) => existing.parent_id().map(str::to_string),
            None => None,
        };

        let existed = self.store.delete(T::KIND, id).await?;
        self.invalidate(KeyPattern::Exact(CacheKey::entity(T::KIND, id)));
        self.invalidate(KeyPattern::Collections(T::KIND));

        if existed {
            self.publish(&Topic::entity(T::KIND, id), &Notification::Entity(None));
            for topic in collection_topics(T::KIND, id, parent.as_deref()) {
                self.publish(&topic, &Notification::Deleted(id.to_string()));
            }
        }
        Ok(existed)
    }

    // ---------- 订阅 ----------

    /// 订阅单个实体；注册后立即推送当前值（不存在时为 None），之后每次变更推送一次
    pub async fn subscribe<T, F>(&self, id: &str, callback: F) -> Result<SubscriptionHandle, StoreError>
    where
        T: Entity,
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let on_change = Arc::clone(&callback);
        let handle = self.register(
            Topic::entity(T::KIND, id),
            Arc::new(move |notification: &Notification| {
                if let Notification::Entity(value) = notification {
                    match value.clone().map(serde_json::from_value::<T>).transpose() {
                        Ok(entity) => on_change(entity),
                        Err(e) => tracing::warn!("Subscriber payload decode failed: {}", e),
                    }
                }
            }),
        );

        let current = self.get::<T>(id).await?;
        invoke_guarded(|| callback(current));
        Ok(handle)
    }

    /// 订阅某种实体的集合；注册后立即推送当前列表快照
    pub async fn subscribe_collection<T, F>(
        &self,
        parent: Option<&str>,
        callback: F,
    ) -> Result<SubscriptionHandle, StoreError>
    where
        T: Entity,
        F: Fn(CollectionChange<T>) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let on_change = Arc::clone(&callback);
        let handle = self.register(
            Topic::collection(T::KIND, parent),
            Arc::new(move |notification: &Notification| {
                let change = match notification {
                    Notification::Upserted(value) => {
                        serde_json::from_value::<T>(value.clone()).map(CollectionChange::Upserted)
                    }
                    Notification::Deleted(id) => Ok(CollectionChange::Deleted(id.clone())),
                    Notification::Snapshot(values) => values
                        .iter()
                        .map(|v| serde_json::from_value::<T>(v.clone()))
                        .collect::<Result<Vec<_>, _>>()
                        .map(CollectionChange::Snapshot),
                    Notification::Entity(_) => return,
                };
                match change {
                    Ok(change) => on_change(change),
                    Err(e) => tracing::warn!("Subscriber payload decode failed: {}", e),
                }
            }),
        );

        let current = self.list::<T>(parent).await?;
        invoke_guarded(|| callback(CollectionChange::Snapshot(current)));
        Ok(handle)
    }

    /// 取消订阅，返回句柄是否仍有效
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = subscribers.get_mut(&handle.topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != handle.id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&handle.topic);
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map_or(0, Vec::len)
    }

    fn register(&self, topic: Topic, callback: Callback) -> SubscriptionHandle {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.clone())
            .or_default()
            .push((id, callback));
        SubscriptionHandle { id, topic }
    }

    /// 同步通知某主题的全部订阅者；单个订阅者 panic 只记录日志，不影响其他订阅者
    fn publish(&self, topic: &Topic, notification: &Notification) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            invoke_guarded(|| callback(notification));
        }
    }

    // ---------- 缓存维护 ----------

    /// 按模式淘汰缓存，返回淘汰条数；同时使进行中的读穿回填失效
    pub fn invalidate(&self, pattern: KeyPattern) -> usize {
        let mut cache = self.lock_cache();
        cache.epoch += 1;
        let before = cache.entries.len();
        cache.entries.retain(|key, _| !pattern.matches(key));
        before - cache.entries.len()
    }

    pub fn clear(&self) {
        let mut cache = self.lock_cache();
        cache.epoch += 1;
        cache.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock_cache().entries.len(),
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_lookup(&self, key: &CacheKey) -> Lookup {
        let mut cache = self.lock_cache();
        let fresh = match cache.entries.get(key) {
            Some(entry) if entry.timestamp.elapsed() < self.ttl => Some(entry.data.clone()),
            Some(_) => {
                cache.entries.remove(key);
                None
            }
            None => None,
        };
        match fresh {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Hit(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss(cache.epoch)
            }
        }
    }

    /// 读穿回填：读取期间有写入或淘汰时丢弃
    fn cache_fill(&self, key: CacheKey, data: Value, epoch: u64) {
        let mut cache = self.lock_cache();
        if cache.epoch != epoch {
            tracing::debug!(?key, "Read-through raced a write; not caching");
            return;
        }
        cache.entries.insert(
            key,
            CacheEntry {
                data,
                timestamp: Instant::now(),
            },
        );
    }

    // ---------- 常用实体的便捷方法 ----------

    pub async fn get_space(&self, id: &str) -> Result<Option<SpaceRecord>, StoreError> {
        self.get(id).await
    }

    pub async fn update_space<F>(&self, id: &str, f: F) -> Result<SpaceRecord, StoreError>
    where
        F: FnOnce(&mut SpaceRecord),
    {
        self.update(id, f).await
    }

    pub async fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StoreError> {
        self.list(None).await
    }

    pub async fn list_tasks(&self, space_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        self.list(Some(space_id)).await
    }

    pub async fn list_artifacts(&self, space_id: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.list(Some(space_id)).await
    }

    pub async fn get_agent_profile(&self, name: &str) -> Result<Option<AgentProfile>, StoreError> {
        self.get(name).await
    }

    pub async fn get_tool(&self, id: &str) -> Result<Option<ToolRecord>, StoreError> {
        self.get(id).await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolRecord>, StoreError> {
        self.list(None).await
    }
}

/// 受影响主题中的集合主题（实体主题单独推送）
fn collection_topics(kind: EntityKind, id: &str, parent: Option<&str>) -> Vec<Topic> {
    Topic::affected_by(kind, id, parent)
        .into_iter()
        .filter(|t| matches!(t, Topic::Collection { .. }))
        .collect()
}

fn invoke_guarded(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("Cache subscriber panicked; continuing delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// 统计 get/list 调用次数的存储
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryRecordStore,
        gets: AtomicUsize,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for CountingStore {
        async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(kind, id).await
        }

        async fn list(&self, kind: EntityKind, parent: Option<&str>) -> Result<Vec<Value>, StoreError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list(kind, parent).await
        }

        async fn put(
            &self,
            kind: EntityKind,
            id: &str,
            parent: Option<&str>,
            value: Value,
        ) -> Result<(), StoreError> {
            self.inner.put(kind, id, parent, value).await
        }

        async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(kind, id).await
        }
    }

    fn space(id: &str, goal: &str) -> SpaceRecord {
        let now = chrono::Utc::now();
        SpaceRecord {
            id: id.to_string(),
            goal: goal.to_string(),
            agents: vec![],
            plan: None,
            history: vec![],
            threads: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    async fn seeded() -> (Arc<CountingStore>, DataAccess) {
        let store = Arc::new(CountingStore::default());
        let value = serde_json::to_value(space("s1", "first")).unwrap();
        store.inner.put(EntityKind::Space, "s1", None, value).await.unwrap();
        let data = DataAccess::new(store.clone());
        (store, data)
    }

    #[tokio::test]
    async fn test_get_twice_hits_store_once() {
        let (store, data) = seeded().await;
        assert_eq!(data.get_space("s1").await.unwrap().unwrap().goal, "first");
        assert_eq!(data.get_space("s1").await.unwrap().unwrap().goal, "first");
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
        let stats = data.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_update_then_get_uses_cache() {
        let (store, data) = seeded().await;
        data.get_space("s1").await.unwrap();
        data.update_space("s1", |s| s.goal = "second".into()).await.unwrap();
        let fetched = data.get_space("s1").await.unwrap().unwrap();
        assert_eq!(fetched.goal, "second");
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        let persisted = store.inner.get(EntityKind::Space, "s1").await.unwrap().unwrap();
        assert_eq!(persisted["goal"], "second");
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let store = Arc::new(CountingStore::default());
        let value = serde_json::to_value(space("s1", "g")).unwrap();
        store.inner.put(EntityKind::Space, "s1", None, value).await.unwrap();
        let data = DataAccess::with_ttl(store.clone(), Duration::from_millis(20));

        data.get_space("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        data.get_space("s1").await.unwrap();
        assert_eq!(store.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscriber_gets_current_then_one_per_update() {
        let (_store, data) = seeded().await;
        let seen = Arc::new(Mutex::new(Vec::<Option<String>>::new()));
        let sink = Arc::clone(&seen);
        data.subscribe::<SpaceRecord, _>("s1", move |s| {
            sink.lock().unwrap().push(s.map(|s| s.goal));
        })
        .await
        .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[Some("first".to_string())]);

        data.update_space("s1", |s| s.goal = "second".into()).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(seen.lock().unwrap()[1], Some("second".to_string()));

        data.delete::<SpaceRecord>("s1").await.unwrap();
        assert_eq!(seen.lock().unwrap()[2], None);
    }

    #[tokio::test]
    async fn test_artifact_write_evicts_space_listing() {
        let store = Arc::new(CountingStore::default());
        let data = DataAccess::new(store.clone());

        let first = data.create(ArtifactRecord::new("s1", "a.txt", "hello")).await.unwrap();
        assert_eq!(data.list_artifacts("s1").await.unwrap().len(), 1);
        assert_eq!(data.list_artifacts("s1").await.unwrap().len(), 1);
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);

        data.update::<ArtifactRecord, _>(&first.id, |a| a.content = "changed".into())
            .await
            .unwrap();
        let listed = data.list_artifacts("s1").await.unwrap();
        assert_eq!(listed[0].content, "changed");
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);

        data.create(ArtifactRecord::new("s2", "b.txt", "")).await.unwrap();
        assert_eq!(data.list_artifacts("s1").await.unwrap().len(), 1);
        assert_eq!(data.list::<ArtifactRecord>(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_collection_subscription() {
        let data = DataAccess::new(Arc::new(MemoryRecordStore::new()));
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let handle = data
            .subscribe_collection::<ArtifactRecord, _>(Some("s1"), move |change| {
                let label = match change {
                    CollectionChange::Snapshot(items) => format!("snapshot:{}", items.len()),
                    CollectionChange::Upserted(a) => format!("upsert:{}", a.name),
                    CollectionChange::Deleted(_) => "deleted".to_string(),
                };
                sink.lock().unwrap().push(label);
            })
            .await
            .unwrap();

        let a = data.create(ArtifactRecord::new("s1", "a", "")).await.unwrap();
        data.create(ArtifactRecord::new("s2", "other", "")).await.unwrap();
        data.delete::<ArtifactRecord>(&a.id).await.unwrap();

        assert_eq!(
            changes.lock().unwrap().as_slice(),
            &["snapshot:0", "upsert:a", "deleted"]
        );

        assert!(data.unsubscribe(&handle));
        assert!(!data.unsubscribe(&handle));
        data.create(ArtifactRecord::new("s1", "late", "")).await.unwrap();
        assert_eq!(changes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_block_others() {
        let (_store, data) = seeded().await;
        let calls = Arc::new(AtomicUsize::new(0));
        data.subscribe::<SpaceRecord, _>("s1", |s| {
            if s.map(|s| s.goal) == Some("boom".to_string()) {
                panic!("bad subscriber");
            }
        })
        .await
        .unwrap();
        let counter = Arc::clone(&calls);
        data.subscribe::<SpaceRecord, _>("s1", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        data.update_space("s1", |s| s.goal = "boom".into()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// 读取时先取快照，再延迟返回，模拟慢存储上的读写交错
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for SlowStore {
        async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
            let snapshot = self.inner.get(kind, id).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            snapshot
        }

        async fn list(&self, kind: EntityKind, parent: Option<&str>) -> Result<Vec<Value>, StoreError> {
            let snapshot = self.inner.list(kind, parent).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            snapshot
        }

        async fn put(
            &self,
            kind: EntityKind,
            id: &str,
            parent: Option<&str>,
            value: Value,
        ) -> Result<(), StoreError> {
            self.inner.put(kind, id, parent, value).await
        }

        async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(kind, id).await
        }
    }

    #[tokio::test]
    async fn test_slow_read_does_not_overwrite_concurrent_write() {
        let store = Arc::new(SlowStore::default());
        let value = serde_json::to_value(space("s1", "old")).unwrap();
        store.inner.put(EntityKind::Space, "s1", None, value).await.unwrap();
        let data = Arc::new(DataAccess::new(store));

        let reader = {
            let data = Arc::clone(&data);
            tokio::spawn(async move { data.get_space("s1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        data.put(space("s1", "new")).await.unwrap();

        // 与写入并发的读取可以看到旧值，但不能把旧值留在缓存里
        reader.await.unwrap().unwrap();
        assert_eq!(data.get_space("s1").await.unwrap().unwrap().goal, "new");
    }

    #[tokio::test]
    async fn test_slow_listing_does_not_cache_stale_collection() {
        let data = Arc::new(DataAccess::new(Arc::new(SlowStore::default())));

        let reader = {
            let data = Arc::clone(&data);
            tokio::spawn(async move { data.list_artifacts("s1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        data.create(ArtifactRecord::new("s1", "a.txt", "")).await.unwrap();

        assert!(reader.await.unwrap().unwrap().is_empty());
        assert_eq!(data.list_artifacts("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_drops_inflight_fill() {
        let store = Arc::new(SlowStore::default());
        let value = serde_json::to_value(space("s1", "g")).unwrap();
        store.inner.put(EntityKind::Space, "s1", None, value).await.unwrap();
        let data = Arc::new(DataAccess::new(store));

        let reader = {
            let data = Arc::clone(&data);
            tokio::spawn(async move { data.get_space("s1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        data.invalidate(KeyPattern::Kind(EntityKind::Space));
        reader.await.unwrap().unwrap();
        assert_eq!(data.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let data = DataAccess::new(Arc::new(MemoryRecordStore::new()));
        let err = data.update_space("nope", |_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: EntityKind::Space, .. }));
    }
}
