//! 可观测性表面：事件总线、指标提供者、追踪器。均可替换，由调度器与执行管道调用。

mod event;
mod metrics;
mod tracer;

pub use event::{EventBus, EventHandler, EventKind, EventPayload};
pub use metrics::{
  CACHE_HITS, CACHE_SETS, DEDUP_JOINS, InMemoryMetrics, MetricsProvider, TASK_DURATION_MS, TASKS_FAILED,
  TASKS_SUCCEEDED,
};
pub use tracer::{LogTracer, NoopTracer, Span, Tracer};
