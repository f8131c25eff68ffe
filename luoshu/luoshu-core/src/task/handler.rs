use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::context::RunContext;
use crate::error::TaskError;
use crate::types::JsonValue;

/// 一次任务派发的输入：已解析的位置参数、关键字参数与运行上下文
#[derive(Debug, Clone)]
pub struct TaskInput {
  pub args: Vec<JsonValue>,
  pub kwargs: BTreeMap<String, JsonValue>,
  pub ctx: RunContext,
}

impl TaskInput {
  pub fn new(args: Vec<JsonValue>, kwargs: BTreeMap<String, JsonValue>, ctx: RunContext) -> Self {
    Self { args, kwargs, ctx }
  }

  pub fn arg(&self, index: usize) -> Option<&JsonValue> {
    self.args.get(index)
  }

  /// 反序列化位置参数
  pub fn arg_as<T>(&self, index: usize) -> Result<T, TaskError>
  where
    T: DeserializeOwned,
  {
    let value = self.arg(index).ok_or_else(|| TaskError::msg(format!("缺少位置参数: {}", index)))?;
    serde_json::from_value(value.clone()).map_err(TaskError::from)
  }

  pub fn kwarg(&self, name: &str) -> Option<&JsonValue> {
    self.kwargs.get(name)
  }

  /// 反序列化关键字参数
  pub fn kwarg_as<T>(&self, name: &str) -> Result<T, TaskError>
  where
    T: DeserializeOwned,
  {
    let value = self.kwarg(name).ok_or_else(|| TaskError::msg(format!("缺少关键字参数: {}", name)))?;
    serde_json::from_value(value.clone()).map_err(TaskError::from)
  }
}

pub type TaskFuture = BoxFuture<'static, Result<JsonValue, TaskError>>;

type AsyncTaskFn = dyn Fn(TaskInput) -> TaskFuture + Send + Sync;
type BlockingTaskFn = dyn Fn(TaskInput) -> Result<JsonValue, TaskError> + Send + Sync;

/// 任务可调用体。异步体默认在调度器协作线程上执行，阻塞体默认进线程池
#[derive(Clone)]
pub enum TaskCallable {
  Async(Arc<AsyncTaskFn>),
  Blocking(Arc<BlockingTaskFn>),
}

impl TaskCallable {
  pub fn from_async<F, Fut>(f: F) -> Self
  where
    F: Fn(TaskInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, TaskError>> + Send + 'static,
  {
    TaskCallable::Async(Arc::new(move |input| Box::pin(f(input))))
  }

  pub fn from_blocking<F>(f: F) -> Self
  where
    F: Fn(TaskInput) -> Result<JsonValue, TaskError> + Send + Sync + 'static,
  {
    TaskCallable::Blocking(Arc::new(f))
  }

  pub fn is_async(&self) -> bool {
    matches!(self, TaskCallable::Async(_))
  }
}

impl std::fmt::Debug for TaskCallable {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TaskCallable::Async(_) => f.write_str("TaskCallable::Async"),
      TaskCallable::Blocking(_) => f.write_str("TaskCallable::Blocking"),
    }
  }
}
