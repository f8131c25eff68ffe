use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

pub const TASKS_SUCCEEDED: &str = "tasks_succeeded";
pub const TASKS_FAILED: &str = "tasks_failed";
pub const CACHE_HITS: &str = "cache_hits";
pub const CACHE_SETS: &str = "cache_sets";
pub const DEDUP_JOINS: &str = "dedup_joins";
pub const TASK_DURATION_MS: &str = "task_duration_ms";

/// 可替换的指标提供者
pub trait MetricsProvider: Send + Sync {
  fn increment_counter(&self, name: &'static str, value: u64);

  fn record_duration_ms(&self, name: &'static str, value: f64);
}

/// 默认的进程内指标实现，计数可直接读取（测试中使用）
#[derive(Default)]
pub struct InMemoryMetrics {
  counters: DashMap<&'static str, AtomicU64>,
  durations: DashMap<&'static str, Mutex<Vec<f64>>>,
}

impl InMemoryMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn counter(&self, name: &'static str) -> u64 {
    self.counters.get(name).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
  }

  pub fn durations(&self, name: &'static str) -> Vec<f64> {
    self.durations.get(name).map(|d| d.lock().expect("metrics durations lock poisoned").clone()).unwrap_or_default()
  }
}

impl MetricsProvider for InMemoryMetrics {
  fn increment_counter(&self, name: &'static str, value: u64) {
    self.counters.entry(name).or_insert_with(|| AtomicU64::new(0)).fetch_add(value, Ordering::SeqCst);
  }

  fn record_duration_ms(&self, name: &'static str, value: f64) {
    self.durations.entry(name).or_insert_with(|| Mutex::new(Vec::new())).lock().unwrap().push(value);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_in_memory_counters() {
    let metrics = InMemoryMetrics::new();
    assert_eq!(metrics.counter(TASKS_SUCCEEDED), 0);

    metrics.increment_counter(TASKS_SUCCEEDED, 1);
    metrics.increment_counter(TASKS_SUCCEEDED, 2);
    assert_eq!(metrics.counter(TASKS_SUCCEEDED), 3);
  }

  #[test]
  fn test_in_memory_durations() {
    let metrics = InMemoryMetrics::new();
    metrics.record_duration_ms(TASK_DURATION_MS, 12.5);
    metrics.record_duration_ms(TASK_DURATION_MS, 3.0);
    assert_eq!(metrics.durations(TASK_DURATION_MS), vec![12.5, 3.0]);
  }
}
