//! 流的构建面：占位调用、扇出声明、DAG 构建与导出、流对象与流注册表

mod builder;
pub(crate) mod dag;
mod export;
#[allow(clippy::module_inception)]
mod flow;
mod invocation;
mod registry;

pub use builder::{FanOutSource, FlowBuilder};
pub use dag::Dag;
pub use flow::{Flow, FlowOutput, RunOptions, RunSummary};
pub use invocation::{ArgValue, FanOut, Invocation, TaskArgs};
pub use registry::{FlowProvider, FlowRegistry};
