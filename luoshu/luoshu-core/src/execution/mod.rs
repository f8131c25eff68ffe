//! 任务执行管道：中间件链 → 缓存/单飞 → 事件/追踪 → 按模式执行 →
//! 超时与重试 → 制品持久化 → 缓存写入

mod middleware;
mod pipeline;
pub mod process;

pub use middleware::{Middleware, Next, TaskCall};
pub use process::{WORKER_ENV, worker_main};

pub(crate) use pipeline::{call_task, execute_node};
