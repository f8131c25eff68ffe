//! 进程执行模式。
//!
//! 工作进程是当前可执行文件自身的再执行：父进程以 `LUOSHU_PROCESS_WORKER=1`
//! 重新拉起 `current_exe()`，通过 stdin/stdout 传递一份 JSON 信封。宿主程序
//! 在 `main` 开头（构建完任务定义之后）调用 [worker_main]，按名在
//! [TaskRegistry] 中解析任务并执行。参数与返回值必须可序列化，序列化失败
//! 直接作为不可重试的执行错误浮出。

use std::collections::BTreeMap;
use std::process::Stdio;

use futures::future::BoxFuture;
use log::error;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::error::TaskError;
use crate::runtime::Runtime;
use crate::task::{TaskDefinition, TaskInput, TaskRegistry};
use crate::types::{JsonValue, ParamsMap};

/// 工作进程环境标记
pub const WORKER_ENV: &str = "LUOSHU_PROCESS_WORKER";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WorkerRequest {
  pub task: String,
  pub args: Vec<JsonValue>,
  pub kwargs: BTreeMap<String, JsonValue>,
  pub params: ParamsMap,
  pub run_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WorkerResponse {
  pub ok: Option<JsonValue>,
  pub err: Option<String>,
}

impl WorkerResponse {
  fn success(value: JsonValue) -> Self {
    Self { ok: Some(value), err: None }
  }

  fn failure(message: impl Into<String>) -> Self {
    Self { ok: None, err: Some(message.into()) }
  }
}

/// 宿主钩子：若本进程以工作模式拉起，则执行一个任务并退出；否则立即返回。
///
/// 必须在任务定义构建完成之后调用，否则注册表中找不到任务。
pub fn worker_main() {
  if std::env::var(WORKER_ENV).is_err() {
    return;
  }
  let response = run_worker();
  let exit_code = if response.err.is_some() { 1 } else { 0 };
  match serde_json::to_string(&response) {
    Ok(body) => println!("{}", body),
    Err(e) => {
      error!("Failed to serialize worker response: {}", e);
      println!("{}", r#"{"ok":null,"err":"worker response serialization failed"}"#);
    }
  }
  std::process::exit(exit_code);
}

fn run_worker() -> WorkerResponse {
  let mut buf = String::new();
  if let Err(e) = std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf) {
    return WorkerResponse::failure(format!("读取请求失败: {}", e));
  }
  let request: WorkerRequest = match serde_json::from_str(&buf) {
    Ok(request) => request,
    Err(e) => return WorkerResponse::failure(format!("请求解析失败: {}", e)),
  };
  let Some(task) = TaskRegistry::global().get(&request.task) else {
    return WorkerResponse::failure(format!("任务未注册: {}", request.task));
  };

  let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
    Ok(rt) => rt,
    Err(e) => return WorkerResponse::failure(format!("工作端运行时构建失败: {}", e)),
  };
  let ctx = RunContext::for_process_worker(Runtime::global(), request.params);
  let input = TaskInput::new(request.args, request.kwargs, ctx);

  match rt.block_on(task.invoke_callable(input)) {
    Ok(value) => WorkerResponse::success(value),
    Err(e) => WorkerResponse::failure(e.to_string()),
  }
}

/// 父进程侧：在工作进程中执行一次任务体。
/// 受 `process_pool_max_workers` 信号量约束；超时或取消只在发出信号后
/// 等待工作进程自然结束并丢弃结果，不强杀（与线程模式一致）。
pub(crate) async fn execute_in_worker(
  runtime: &Runtime,
  task: &TaskDefinition,
  input: TaskInput,
  timeout: Option<f64>,
  cancel: &CancellationToken,
) -> Result<JsonValue, TaskError> {
  let _permit = runtime.acquire_process_slot().await?;

  let request = WorkerRequest {
    task: task.name().to_string(),
    args: input.args,
    kwargs: input.kwargs,
    params: input.ctx.params().clone(),
    run_id: input.ctx.run_id().to_string(),
  };
  let payload =
    serde_json::to_vec(&request).map_err(|e| TaskError::fatal(format!("进程模式参数序列化失败: {}", e)))?;

  let exe = std::env::current_exe().map_err(|e| TaskError::with_source("无法定位当前可执行文件", e))?;
  let mut child = tokio::process::Command::new(exe)
    .env(WORKER_ENV, "1")
    .stdin(Stdio::piped())
    .stdout(Stdio::piped())
    .stderr(Stdio::inherit())
    .spawn()
    .map_err(|e| TaskError::with_source("工作进程启动失败", e))?;

  let mut stdin = child.stdin.take().ok_or_else(|| TaskError::msg("无法获取工作进程 stdin"))?;
  let mut stdout = child.stdout.take().ok_or_else(|| TaskError::msg("无法获取工作进程 stdout"))?;
  if let Err(e) = stdin.write_all(&payload).await {
    let _ = drain_worker(&mut child, &mut stdout).await;
    return Err(TaskError::with_source("写入工作进程失败", e));
  }
  // 关闭管道，工作端读到 EOF 后开始执行
  drop(stdin);

  let timeout_fut: BoxFuture<'static, ()> = match timeout {
    Some(secs) => Box::pin(tokio::time::sleep(std::time::Duration::from_secs_f64(secs))),
    None => Box::pin(std::future::pending()),
  };

  // 工作进程无法强杀：超时或取消后等待其自然结束并丢弃结果
  let (status, raw) = tokio::select! {
    drained = drain_worker(&mut child, &mut stdout) => drained,
    _ = timeout_fut => {
      let _ = drain_worker(&mut child, &mut stdout).await;
      return Err(TaskError::timeout());
    }
    _ = cancel.cancelled() => {
      let _ = drain_worker(&mut child, &mut stdout).await;
      return Err(TaskError::cancelled());
    }
  };
  let status = status.map_err(TaskError::from)?;

  let response: WorkerResponse = serde_json::from_slice(&raw)
    .map_err(|e| TaskError::fatal(format!("工作进程响应解析失败（exit: {}）: {}", status, e)))?;
  match response {
    WorkerResponse { ok: Some(value), .. } => Ok(value),
    WorkerResponse { err: Some(message), .. } => Err(TaskError::msg(message)),
    _ => Err(TaskError::fatal("工作进程响应为空")),
  }
}

/// 等待工作进程自然结束，同时收取其标准输出（避免管道写满互相等待）
async fn drain_worker(
  child: &mut tokio::process::Child,
  stdout: &mut tokio::process::ChildStdout,
) -> (std::io::Result<std::process::ExitStatus>, Vec<u8>) {
  let mut raw = Vec::new();
  let (status, _) = tokio::join!(child.wait(), stdout.read_to_end(&mut raw));
  (status, raw)
}
