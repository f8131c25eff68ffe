//! luoshu：进程内工作流引擎。
//!
//! 以 [TaskDefinition](task::TaskDefinition) 声明带策略（重试、超时、缓存、
//! 持久化、优先级、执行模式）的任务，在 [Flow](flow::Flow) 体内把它们组合为
//! DAG；内嵌调度器在并发上限内按优先级驱动执行，支持运行期动态扇出与
//! 三种失败策略（fail_fast / continue / aggregate）。
//!
//! ```no_run
//! use luoshu_core::flow::{Flow, RunOptions, TaskArgs};
//! use luoshu_core::task::{TaskDefinition, TaskInput};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let double = TaskDefinition::builder("double")
//!   .handler(|input: TaskInput| async move {
//!     let x: i64 = input.arg_as(0)?;
//!     Ok(json!(x * 2))
//!   })
//!   .build();
//!
//! let flow = Flow::new("demo", move |b| {
//!   let first = b.invoke(&double, TaskArgs::new().arg(json!(21)));
//!   Ok(first.into())
//! });
//! let result = flow.run(RunOptions::default()).await?;
//! assert_eq!(result, json!(42));
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod cache;
pub mod context;
pub mod error;
pub mod execution;
pub mod flow;
pub mod observability;
pub mod runtime;
pub mod scheduler;
pub mod secrets;
pub mod setting;
pub mod task;
pub mod types;

pub use context::RunContext;
pub use error::{
  AggregateTaskError, ArtifactError, CacheError, DynamicExpansionError, FlowBuildError, FlowRunError,
  RetryExhaustedError, TaskError, TaskExecutionError, TaskFailure, TaskResult, TaskTimeoutError,
};
pub use execution::worker_main;
pub use flow::{Flow, FlowBuilder, FlowRegistry, RunOptions, TaskArgs};
pub use runtime::Runtime;
pub use scheduler::NodeState;
pub use task::TaskDefinition;
pub use types::{FailurePolicy, JsonValue, NodeName, RunId};
