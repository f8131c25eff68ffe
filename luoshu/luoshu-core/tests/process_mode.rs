//! 进程执行模式的端到端验证。
//!
//! 工作进程是当前可执行文件的再执行，libtest 的入口无法让子进程接管协议，
//! 因此本测试使用无 harness 的独立入口，与真实宿主程序同构：先构建任务
//! 定义（完成注册），再调用 `worker_main()` 给工作端接管机会，最后在宿主
//! 侧执行断言。

use std::time::{Duration, Instant};

use serde_json::json;

use luoshu_core::error::{FlowRunError, TaskFailure};
use luoshu_core::flow::{Flow, RunOptions, TaskArgs};
use luoshu_core::runtime::Runtime;
use luoshu_core::task::{RunMode, TaskDefinition, TaskInput};

fn build_tasks() -> (TaskDefinition, TaskDefinition, TaskDefinition) {
  let double = TaskDefinition::builder("proc_double")
    .blocking_handler(|input: TaskInput| {
      let x: i64 = input.arg_as(0)?;
      Ok(json!(x * 2))
    })
    .with_run_in(RunMode::Process)
    .build();

  // 睡够之后写下完成标记：父进程据此区分「等到自然结束」与「被强杀」
  let slow_timeout = TaskDefinition::builder("proc_slow_timeout")
    .blocking_handler(|input: TaskInput| {
      let marker: String = input.arg_as(0)?;
      std::thread::sleep(Duration::from_millis(400));
      std::fs::write(&marker, b"done")?;
      Ok(json!("done"))
    })
    .with_run_in(RunMode::Process)
    .with_timeout(0.1)
    .build();

  let slow_cancel = TaskDefinition::builder("proc_slow_cancel")
    .blocking_handler(|input: TaskInput| {
      let marker: String = input.arg_as(0)?;
      std::thread::sleep(Duration::from_millis(400));
      std::fs::write(&marker, b"done")?;
      Ok(json!("done"))
    })
    .with_run_in(RunMode::Process)
    .build();

  (double, slow_timeout, slow_cancel)
}

fn main() {
  let (double, slow_timeout, slow_cancel) = build_tasks();
  // 子进程从这里接管并退出
  luoshu_core::worker_main();

  let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("构建测试运行时失败");
  rt.block_on(async {
    process_task_runs_in_worker(double).await;
    process_timeout_waits_for_natural_exit(slow_timeout).await;
    process_cancellation_drains_worker(slow_cancel).await;
  });
  println!("process_mode: all checks passed");
}

fn marker_path(label: &str) -> std::path::PathBuf {
  std::env::temp_dir().join(format!("luoshu-proc-{}-{}.done", label, std::process::id()))
}

/// 进程模式任务经由调度器与工作进程跑完整条流水线
async fn process_task_runs_in_worker(double: TaskDefinition) {
  let runtime = Runtime::builder().build();
  let flow = Flow::new("process_flow", move |b| Ok(b.invoke(&double, TaskArgs::new().arg(json!(21))).into()))
    .with_runtime(runtime);

  let result = flow.run(RunOptions::default()).await.expect("进程模式流水线应当成功");
  assert_eq!(result, json!(42));
}

/// 超时不强杀：发出裁决后等待工作进程自然结束（完成标记已写下），结果丢弃
async fn process_timeout_waits_for_natural_exit(slow_timeout: TaskDefinition) {
  let runtime = Runtime::builder().build();
  let marker = marker_path("timeout");
  let _ = std::fs::remove_file(&marker);

  let started = Instant::now();
  let error = slow_timeout
    .call_with_runtime(runtime, TaskArgs::new().arg(json!(marker.to_string_lossy().to_string())))
    .await
    .expect_err("超时必须浮出");
  let elapsed = started.elapsed();

  assert!(matches!(error.as_ref(), TaskFailure::Timeout(_)), "期望超时失败，实际: {}", error);
  // 返回晚于任务体全程（400ms ≫ 100ms 超时），证明父进程等到了自然结束
  assert!(elapsed >= Duration::from_millis(400), "elapsed: {:?}", elapsed);
  assert!(marker.exists(), "完成标记缺失：工作进程被提前终止");
  let _ = std::fs::remove_file(&marker);
}

/// 运行级取消同样只排空不强杀
async fn process_cancellation_drains_worker(slow_cancel: TaskDefinition) {
  let runtime = Runtime::builder().build();
  let marker = marker_path("cancel");
  let _ = std::fs::remove_file(&marker);

  let marker_arg = marker.to_string_lossy().to_string();
  let flow = Flow::new("process_cancel_flow", move |b| {
    Ok(b.invoke(&slow_cancel, TaskArgs::new().arg(json!(marker_arg.clone()))).into())
  })
  .with_runtime(runtime);

  let token = tokio_util::sync::CancellationToken::new();
  let trigger = token.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.cancel();
  });

  let started = Instant::now();
  let options = RunOptions::builder().cancel(token).build();
  let result = flow.run(options).await;
  let elapsed = started.elapsed();

  assert!(matches!(result.expect_err("取消必须浮出"), FlowRunError::Cancelled));
  assert!(elapsed >= Duration::from_millis(400), "elapsed: {:?}", elapsed);
  assert!(marker.exists(), "完成标记缺失：工作进程被提前终止");
  let _ = std::fs::remove_file(&marker);
}
