//! 结果缓存：按键存储任务结果，读取时评估 TTL。
//!
//! 单飞（single-flight）去重始终在内存中、按进程维护，与后端无关。

mod filesystem;
mod memory;
mod single_flight;

use async_trait::async_trait;

pub use filesystem::FilesystemResultCache;
pub use memory::MemoryResultCache;
pub use single_flight::{Flight, FlightGuard, FlightResult, SingleFlight, wait as wait_flight};

use crate::error::CacheError;
use crate::types::JsonValue;

/// 结果缓存抽象。实现必须线程安全
#[async_trait]
pub trait ResultCache: Send + Sync {
  /// 读取缓存值。`ttl` 以秒计，在读取时评估：`now - stored_ts <= ttl` 才算新鲜
  async fn get(&self, key: &str, ttl: f64) -> Result<Option<JsonValue>, CacheError>;

  /// 写入缓存值，记录当前时间戳
  async fn set(&self, key: &str, value: JsonValue) -> Result<(), CacheError>;

  /// 清空缓存
  async fn clear(&self) -> Result<(), CacheError>;
}

/// 缓存条目：写入时间戳（epoch 毫秒）与值
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct CachedEntry {
  pub timestamp_ms: i64,
  pub value: JsonValue,
}

impl CachedEntry {
  pub fn now(value: JsonValue) -> Self {
    Self { timestamp_ms: chrono::Utc::now().timestamp_millis(), value }
  }

  pub fn is_fresh(&self, ttl: f64) -> bool {
    let age_ms = chrono::Utc::now().timestamp_millis() - self.timestamp_ms;
    age_ms as f64 <= ttl * 1000.0
  }
}
