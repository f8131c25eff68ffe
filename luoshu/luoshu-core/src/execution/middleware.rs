use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::TaskError;
use crate::task::{TaskDefinition, TaskInput};
use crate::types::{JsonValue, NodeName};

/// 一次派发在中间件链中的视图
pub struct TaskCall {
  pub task: TaskDefinition,
  pub node: NodeName,
  pub input: TaskInput,
}

pub(crate) type Terminal = dyn Fn(TaskCall) -> BoxFuture<'static, Result<JsonValue, TaskError>> + Send + Sync;

/// 链中剩余的部分。中间件必须恰好调用一次 [Next::run] 以继续
pub struct Next<'a> {
  chain: &'a [Arc<dyn Middleware>],
  terminal: &'a Terminal,
}

impl<'a> Next<'a> {
  pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], terminal: &'a Terminal) -> Self {
    Self { chain, terminal }
  }

  pub async fn run(self, call: TaskCall) -> Result<JsonValue, TaskError> {
    match self.chain.split_first() {
      Some((head, rest)) => head.handle(call, Next { chain: rest, terminal: self.terminal }).await,
      None => (self.terminal)(call).await,
    }
  }
}

/// 洋葱式中间件。注册顺序即组合顺序（先注册者在最外层），
/// 每次派发按最外到最内执行、最内到最外收尾。
/// 可以包装错误与返回值，但不得吞掉失败。
#[async_trait]
pub trait Middleware: Send + Sync {
  async fn handle(&self, call: TaskCall, next: Next<'_>) -> Result<JsonValue, TaskError>;
}
