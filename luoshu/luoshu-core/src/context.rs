use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio_util::sync::CancellationToken;

use crate::runtime::Runtime;
use crate::types::{FailurePolicy, JsonValue, ParamsMap, RunId};

/// 运行上下文。一次 `Flow::run` 一个，随运行结束而丢弃。
///
/// 任务体通过 [TaskInput](crate::task::TaskInput) 显式持有；
/// 异步任务也可以用 [RunContext::current] 取得（运行之外返回中性上下文）。
#[derive(Clone)]
pub struct RunContext {
  inner: Arc<RunContextInner>,
}

struct RunContextInner {
  run_id: RunId,
  flow: Option<String>,
  params: ParamsMap,
  failure_policy: FailurePolicy,
  cancel: CancellationToken,
  started_at: DateTime<FixedOffset>,
  runtime: Runtime,
}

impl RunContext {
  pub(crate) fn new(
    runtime: Runtime,
    flow: impl Into<String>,
    params: ParamsMap,
    failure_policy: FailurePolicy,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      inner: Arc::new(RunContextInner {
        run_id: RunId::now_v7(),
        flow: Some(flow.into()),
        params,
        failure_policy,
        cancel,
        started_at: Utc::now().into(),
        runtime,
      }),
    }
  }

  /// 中性上下文：在运行之外直接调用任务时使用
  pub fn neutral() -> Self {
    Self::neutral_with_runtime(Runtime::global())
  }

  pub(crate) fn neutral_with_runtime(runtime: Runtime) -> Self {
    Self {
      inner: Arc::new(RunContextInner {
        run_id: RunId::now_v7(),
        flow: None,
        params: ParamsMap::new(),
        failure_policy: FailurePolicy::default(),
        cancel: CancellationToken::new(),
        started_at: Utc::now().into(),
        runtime,
      }),
    }
  }

  /// 进程工作端的上下文：携带父进程传来的参数，其余与中性上下文一致
  pub(crate) fn for_process_worker(runtime: Runtime, params: ParamsMap) -> Self {
    Self {
      inner: Arc::new(RunContextInner {
        run_id: RunId::now_v7(),
        flow: None,
        params,
        failure_policy: FailurePolicy::default(),
        cancel: CancellationToken::new(),
        started_at: Utc::now().into(),
        runtime,
      }),
    }
  }

  /// 当前任务的运行上下文。仅在异步任务体内有值，其余场合返回中性上下文
  pub fn current() -> Self {
    RUN_CONTEXT.try_with(|ctx| ctx.clone()).unwrap_or_else(|_| Self::neutral())
  }

  pub fn run_id(&self) -> &RunId {
    &self.inner.run_id
  }

  pub fn flow(&self) -> Option<&str> {
    self.inner.flow.as_deref()
  }

  pub fn params(&self) -> &ParamsMap {
    &self.inner.params
  }

  pub fn param(&self, name: &str) -> Option<&JsonValue> {
    self.inner.params.get(name)
  }

  pub fn failure_policy(&self) -> FailurePolicy {
    self.inner.failure_policy
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.inner.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancel.is_cancelled()
  }

  pub fn started_at(&self) -> &DateTime<FixedOffset> {
    &self.inner.started_at
  }

  pub fn runtime(&self) -> &Runtime {
    &self.inner.runtime
  }
}

impl std::fmt::Debug for RunContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RunContext")
      .field("run_id", &self.inner.run_id)
      .field("flow", &self.inner.flow)
      .field("failure_policy", &self.inner.failure_policy)
      .finish()
  }
}

tokio::task_local! {
  static RUN_CONTEXT: RunContext;
}

/// 在上下文作用域内执行 future，使 [RunContext::current] 可用
pub(crate) async fn with_context<F>(ctx: RunContext, fut: F) -> F::Output
where
  F: Future,
{
  RUN_CONTEXT.scope(ctx, fut).await
}
