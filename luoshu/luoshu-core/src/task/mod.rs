//! 任务定义：可调用体与执行策略（重试、超时、缓存、持久化、优先级、执行模式）

mod definition;
mod handler;
mod registry;

pub use definition::{CacheKeyFn, RunMode, TaskDefinition, TaskDefinitionBuilder};
pub use handler::{TaskCallable, TaskFuture, TaskInput};
pub use registry::TaskRegistry;
