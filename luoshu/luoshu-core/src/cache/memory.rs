use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;

use crate::error::CacheError;
use crate::types::JsonValue;

use super::{CachedEntry, ResultCache};

/// 内存结果缓存。`max_entries` 为 LRU 上限，写入时按最近最少使用淘汰
pub struct MemoryResultCache {
  entries: Mutex<LruCache<String, CachedEntry>>,
}

impl MemoryResultCache {
  pub fn new(max_entries: Option<usize>) -> Self {
    let entries = match max_entries.and_then(NonZeroUsize::new) {
      Some(bound) => LruCache::new(bound),
      None => LruCache::unbounded(),
    };
    Self { entries: Mutex::new(entries) }
  }

  pub fn len(&self) -> usize {
    self.entries.lock().expect("result cache lock poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
  async fn get(&self, key: &str, ttl: f64) -> Result<Option<JsonValue>, CacheError> {
    let mut entries = self.entries.lock().expect("result cache lock poisoned");
    match entries.get(key) {
      Some(entry) if entry.is_fresh(ttl) => Ok(Some(entry.value.clone())),
      _ => Ok(None),
    }
  }

  async fn set(&self, key: &str, value: JsonValue) -> Result<(), CacheError> {
    let mut entries = self.entries.lock().expect("result cache lock poisoned");
    entries.put(key.to_string(), CachedEntry::now(value));
    Ok(())
  }

  async fn clear(&self) -> Result<(), CacheError> {
    self.entries.lock().expect("result cache lock poisoned").clear();
    Ok(())
  }
}
