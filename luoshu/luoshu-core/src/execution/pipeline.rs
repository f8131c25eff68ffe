use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use log::debug;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::cache::{self, Flight};
use crate::context::RunContext;
use crate::error::{
  RetryExhaustedError, TaskError, TaskErrorKind, TaskExecutionError, TaskFailure, TaskResult, TaskTimeoutError,
};
use crate::flow::{ArgValue, TaskArgs};
use crate::observability::{
  CACHE_HITS, CACHE_SETS, DEDUP_JOINS, EventKind, EventPayload, TASK_DURATION_MS, TASKS_FAILED, TASKS_SUCCEEDED,
};
use crate::runtime::Runtime;
use crate::task::{RunMode, TaskDefinition, TaskInput};
use crate::types::{JsonValue, NodeName};

use super::middleware::{Next, TaskCall, Terminal};
use super::process;

/// 执行一次派发：缓存查找（含单飞）→ 重试循环（中间件 + 按模式执行 + 超时）
/// → 持久化 → 缓存写入
pub(crate) async fn execute_node(runtime: Runtime, task: TaskDefinition, node: NodeName, input: TaskInput) -> TaskResult {
  let _span = runtime.tracer().span(&format!("task:{}", task.name()), &[("node", node.to_string())]);

  let cache_key = task.cache_ttl().map(|_| task.cache_key(&input.args, &input.kwargs));
  if let (Some(ttl), Some(key)) = (task.cache_ttl(), cache_key.as_deref()) {
    match runtime.result_cache().get(key, ttl).await {
      Ok(Some(value)) => {
        debug!("Cache hit for task {} (key {})", task.name(), key);
        runtime.metrics().increment_counter(CACHE_HITS, 1);
        return Ok(value);
      }
      Ok(None) => {}
      Err(e) => return Err(Arc::new(TaskFailure::Cache(e))),
    }
  }

  // 单飞：同键的并发派发共享领跑者的一次执行
  let flight_guard = match cache_key.as_deref() {
    Some(key) => match runtime.single_flight().join(key) {
      Flight::Leader(guard) => Some(guard),
      Flight::Follower(rx) => {
        runtime.metrics().increment_counter(DEDUP_JOINS, 1);
        return cache::wait_flight(rx, &node).await;
      }
    },
    None => None,
  };

  let started = Instant::now();
  let result = run_attempts(&runtime, &task, &node, input, cache_key.as_deref()).await;
  runtime.metrics().record_duration_ms(TASK_DURATION_MS, started.elapsed().as_secs_f64() * 1000.0);

  if let Some(guard) = flight_guard {
    guard.complete(result.clone());
  }
  result
}

/// 流之外的直接调用：同一条管道，中性上下文，仅接受字面参数
pub(crate) async fn call_task(runtime: Runtime, task: TaskDefinition, args: TaskArgs) -> TaskResult {
  let node = NodeName::from(format!("{}:call", task.name()));
  let ctx = RunContext::neutral_with_runtime(runtime.clone());

  let mut positional = Vec::with_capacity(args.args.len());
  for arg in &args.args {
    match literal_value(arg) {
      Some(value) => positional.push(value),
      None => return Err(non_literal_failure(&task, &node)),
    }
  }
  let mut kwargs = std::collections::BTreeMap::new();
  for (name, arg) in &args.kwargs {
    let Some(value) = literal_value(arg) else {
      return Err(non_literal_failure(&task, &node));
    };
    kwargs.insert(name.clone(), value);
  }

  let input = TaskInput::new(positional, kwargs, ctx);
  execute_node(runtime, task, node, input).await
}

fn literal_value(arg: &ArgValue) -> Option<JsonValue> {
  match arg {
    ArgValue::Literal(value) => Some(value.clone()),
    ArgValue::List(items) => {
      let mut values = Vec::with_capacity(items.len());
      for item in items {
        values.push(literal_value(item)?);
      }
      Some(JsonValue::Array(values))
    }
    ArgValue::Ref(_) | ArgValue::FanOutRef(_) => None,
  }
}

fn non_literal_failure(task: &TaskDefinition, node: &NodeName) -> Arc<TaskFailure> {
  Arc::new(TaskFailure::Execution(TaskExecutionError {
    task: task.name().to_string(),
    node: node.clone(),
    source: TaskError::msg("流之外调用不支持占位参数"),
  }))
}

/// 重试循环。事件顺序：每次尝试前 task_started，失败且有剩余预算时 task_retry，
/// 终态 task_succeeded 或 task_failed
async fn run_attempts(
  runtime: &Runtime,
  task: &TaskDefinition,
  node: &NodeName,
  input: TaskInput,
  cache_key: Option<&str>,
) -> TaskResult {
  let max_attempts = task.retries() + 1;
  let mut attempt: u32 = 0;

  let failure: TaskFailure = loop {
    attempt += 1;
    emit_task_event(runtime, EventKind::TaskStarted, task, node, &input, attempt, None);

    match run_attempt(runtime, task, node, input.clone()).await {
      Ok(value) => {
        let value = match persist_and_cache(runtime, task, cache_key, value).await {
          Ok(value) => value,
          Err(f) => break f,
        };
        emit_task_event(runtime, EventKind::TaskSucceeded, task, node, &input, attempt, None);
        runtime.metrics().increment_counter(TASKS_SUCCEEDED, 1);
        return Ok(value);
      }
      Err(e) => match e.kind() {
        TaskErrorKind::Cancelled => break TaskFailure::Cancelled { node: node.clone() },
        TaskErrorKind::Fatal => {
          break TaskFailure::Execution(TaskExecutionError {
            task: task.name().to_string(),
            node: node.clone(),
            source: e,
          });
        }
        TaskErrorKind::Failed | TaskErrorKind::Timeout => {
          let this_failure: TaskFailure = if e.kind() == TaskErrorKind::Timeout {
            TaskFailure::Timeout(TaskTimeoutError {
              task: task.name().to_string(),
              node: node.clone(),
              timeout: task.timeout().unwrap_or_default(),
            })
          } else {
            TaskFailure::Execution(TaskExecutionError { task: task.name().to_string(), node: node.clone(), source: e })
          };

          if attempt < max_attempts {
            emit_task_event(runtime, EventKind::TaskRetry, task, node, &input, attempt, Some(&this_failure.to_string()));
            if !backoff_sleep(task, attempt, input.ctx.cancel_token()).await {
              break TaskFailure::Cancelled { node: node.clone() };
            }
            continue;
          }

          if task.retries() > 0 {
            break TaskFailure::RetryExhausted(RetryExhaustedError {
              task: task.name().to_string(),
              node: node.clone(),
              attempts: attempt,
              last: Box::new(this_failure),
            });
          }
          break this_failure;
        }
      },
    }
  };

  if !matches!(failure, TaskFailure::Cancelled { .. }) {
    emit_task_event(runtime, EventKind::TaskFailed, task, node, &input, attempt, Some(&failure.to_string()));
    runtime.metrics().increment_counter(TASKS_FAILED, 1);
  }
  Err(Arc::new(failure))
}

/// 单次尝试：中间件链包裹按模式执行。中间件异常视同任务失败参与重试；
/// 外侧的缓存/持久化层不在重试范围内
async fn run_attempt(
  runtime: &Runtime,
  task: &TaskDefinition,
  node: &NodeName,
  input: TaskInput,
) -> Result<JsonValue, TaskError> {
  let chain = runtime.middleware_chain();
  let rt = runtime.clone();
  let terminal = move |call: TaskCall| -> BoxFuture<'static, Result<JsonValue, TaskError>> {
    let rt = rt.clone();
    Box::pin(async move { execute_mode(rt, call.task, call.input).await })
  };
  let terminal: &Terminal = &terminal;
  let call = TaskCall { task: task.clone(), node: node.clone(), input };
  Next::new(&chain, terminal).run(call).await
}

/// 按执行模式运行任务体，内含超时竞速与协作取消
async fn execute_mode(runtime: Runtime, task: TaskDefinition, input: TaskInput) -> Result<JsonValue, TaskError> {
  let setting = runtime.setting();
  let mode = task.effective_run_in(&setting);
  let cancel = input.ctx.cancel_token().clone();
  let timeout = task.timeout();

  match mode {
    RunMode::Async => {
      let fut = task.invoke_callable(input);
      race_async(fut, timeout, &cancel).await
    }
    RunMode::Thread => {
      let blocking_task = task.clone();
      let handle = tokio::task::spawn_blocking(move || futures::executor::block_on(blocking_task.invoke_callable(input)));
      race_thread(handle, timeout, &cancel).await
    }
    RunMode::Process => process::execute_in_worker(&runtime, &task, input, timeout, &cancel).await,
  }
}

/// 异步模式：超时与取消都在挂起点立即生效
async fn race_async<F>(fut: F, timeout: Option<f64>, cancel: &CancellationToken) -> Result<JsonValue, TaskError>
where
  F: Future<Output = Result<JsonValue, TaskError>>,
{
  let work = async {
    match timeout {
      Some(secs) => match tokio::time::timeout(Duration::from_secs_f64(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(TaskError::timeout()),
      },
      None => fut.await,
    }
  };
  tokio::select! {
    result = work => result,
    _ = cancel.cancelled() => Err(TaskError::cancelled()),
  }
}

/// 线程模式：线程工作无法强杀，超时或取消后等待其自然结束并丢弃结果
async fn race_thread(
  mut handle: tokio::task::JoinHandle<Result<JsonValue, TaskError>>,
  timeout: Option<f64>,
  cancel: &CancellationToken,
) -> Result<JsonValue, TaskError> {
  let timeout_fut: BoxFuture<'static, ()> = match timeout {
    Some(secs) => Box::pin(tokio::time::sleep(Duration::from_secs_f64(secs))),
    None => Box::pin(std::future::pending()),
  };

  tokio::select! {
    joined = &mut handle => flatten_join(joined),
    _ = timeout_fut => {
      let _ = handle.await;
      Err(TaskError::timeout())
    }
    _ = cancel.cancelled() => {
      let _ = handle.await;
      Err(TaskError::cancelled())
    }
  }
}

fn flatten_join(joined: Result<Result<JsonValue, TaskError>, tokio::task::JoinError>) -> Result<JsonValue, TaskError> {
  match joined {
    Ok(result) => result,
    Err(e) => Err(TaskError::msg(format!("任务线程异常退出: {}", e))),
  }
}

/// 第 k 次重试前睡 `backoff · 2^(k-1) + uniform[0, jitter)` 秒。
/// 返回 false 表示睡眠期间被取消
async fn backoff_sleep(task: &TaskDefinition, attempt: u32, cancel: &CancellationToken) -> bool {
  let base = task.retry_backoff() * 2f64.powi(attempt as i32 - 1);
  let jitter = if task.retry_jitter() > 0.0 { rand::rng().random_range(0.0..task.retry_jitter()) } else { 0.0 };
  let delay = base + jitter;
  if delay <= 0.0 {
    return !cancel.is_cancelled();
  }
  tokio::select! {
    _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => true,
    _ = cancel.cancelled() => false,
  }
}

async fn persist_and_cache(
  runtime: &Runtime,
  task: &TaskDefinition,
  cache_key: Option<&str>,
  value: JsonValue,
) -> Result<JsonValue, TaskFailure> {
  let value = if task.persist() {
    match runtime.artifact_store().put(value).await {
      Ok(artifact_ref) => artifact_ref.to_value(),
      Err(e) => return Err(TaskFailure::Artifact(e)),
    }
  } else {
    value
  };

  if let Some(key) = cache_key {
    if let Err(e) = runtime.result_cache().set(key, value.clone()).await {
      return Err(TaskFailure::Cache(e));
    }
    runtime.metrics().increment_counter(CACHE_SETS, 1);
  }
  Ok(value)
}

fn emit_task_event(
  runtime: &Runtime,
  kind: EventKind,
  task: &TaskDefinition,
  node: &NodeName,
  input: &TaskInput,
  attempt: u32,
  error: Option<&str>,
) {
  let mut payload = EventPayload::new();
  payload.insert("task".to_string(), JsonValue::from(task.name()));
  payload.insert("node".to_string(), JsonValue::from(node.as_str()));
  payload.insert("run_id".to_string(), JsonValue::from(input.ctx.run_id().to_string()));
  payload.insert("attempt".to_string(), JsonValue::from(attempt));
  if let Some(error) = error {
    payload.insert("error".to_string(), JsonValue::from(error));
  }
  runtime.emit(kind, payload);
}
