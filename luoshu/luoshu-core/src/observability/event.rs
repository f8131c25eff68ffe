use std::sync::Arc;

use dashmap::DashMap;
use log::warn;

use crate::types::JsonValue;

/// 引擎发出的事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
  FlowStarted,
  FlowCompleted,
  TaskStarted,
  TaskRetry,
  TaskFailed,
  TaskSucceeded,
}

pub type EventPayload = serde_json::Map<String, JsonValue>;

/// 事件处理函数。返回错误不会中断核心执行
pub type EventHandler = Arc<dyn Fn(&EventPayload) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// 进程内事件总线。
///
/// 处理函数按订阅顺序同步调用（尽力而为）：处理函数的错误被吞掉，
/// 仅记录一行诊断日志，绝不反馈给任务执行。
#[derive(Default)]
pub struct EventBus {
  subscribers: DashMap<EventKind, Vec<EventHandler>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe<F>(&self, kind: EventKind, handler: F)
  where
    F: Fn(&EventPayload) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
  {
    self.subscribers.entry(kind).or_default().push(Arc::new(handler));
  }

  pub fn emit(&self, kind: EventKind, payload: EventPayload) {
    let handlers = match self.subscribers.get(&kind) {
      Some(entry) => entry.value().clone(),
      None => return,
    };
    for handler in handlers {
      if let Err(e) = handler(&payload) {
        warn!("Event handler failed for {}: {}", kind, e);
      }
    }
  }

  pub fn subscriber_count(&self, kind: EventKind) -> usize {
    self.subscribers.get(&kind).map(|e| e.value().len()).unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[test]
  fn test_emit_invokes_subscribers_in_order() {
    let bus = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let s1 = seen.clone();
    bus.subscribe(EventKind::TaskStarted, move |_| {
      s1.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });
    let s2 = seen.clone();
    bus.subscribe(EventKind::TaskStarted, move |_| {
      s2.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    bus.emit(EventKind::TaskStarted, EventPayload::new());
    assert_eq!(seen.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_handler_errors_are_swallowed() {
    let bus = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));

    bus.subscribe(EventKind::TaskFailed, |_| Err("boom".into()));
    let s = seen.clone();
    bus.subscribe(EventKind::TaskFailed, move |_| {
      s.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    // 第一个处理函数报错，后续处理函数仍被调用
    bus.emit(EventKind::TaskFailed, EventPayload::new());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_event_kind_names() {
    assert_eq!(EventKind::FlowStarted.to_string(), "flow_started");
    assert_eq!(EventKind::TaskRetry.to_string(), "task_retry");
  }
}
