//! 缓存与订阅层：所有实体读写经由 DataAccess，读穿缓存 + TTL + 写后同步通知

pub mod key;
pub mod manager;

pub use key::{filter_hash, CacheKey, KeyPattern, Topic};
pub use manager::{CacheEntry, CacheStats, CollectionChange, DataAccess, SubscriptionHandle};
