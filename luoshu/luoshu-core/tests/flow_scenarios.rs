//! 端到端场景：静态/动态流水线、重试、失败策略、缓存去重与制品交接

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;

use luoshu_core::artifact::{ArtifactRef, MemoryArtifactStore};
use luoshu_core::error::{FlowRunError, TaskFailure};
use luoshu_core::flow::{ArgValue, Flow, RunOptions, TaskArgs};
use luoshu_core::observability::{CACHE_HITS, DEDUP_JOINS, EventKind, InMemoryMetrics, TASKS_FAILED, TASKS_SUCCEEDED};
use luoshu_core::runtime::Runtime;
use luoshu_core::scheduler::NodeState;
use luoshu_core::task::{TaskDefinition, TaskInput};
use luoshu_core::types::{FailurePolicy, JsonValue, failure};

fn test_runtime() -> (Runtime, Arc<InMemoryMetrics>) {
  let metrics = Arc::new(InMemoryMetrics::new());
  let runtime = Runtime::builder().with_metrics(metrics.clone()).build();
  (runtime, metrics)
}

fn square_task(name: &str) -> TaskDefinition {
  TaskDefinition::builder(name)
    .handler(|input: TaskInput| async move {
      let x: i64 = input.arg_as(0)?;
      Ok(json!(x * x))
    })
    .build()
}

fn sum_task(name: &str) -> TaskDefinition {
  TaskDefinition::builder(name)
    .handler(|input: TaskInput| async move {
      let xs: Vec<i64> = input.arg_as(0)?;
      Ok(json!(xs.iter().sum::<i64>()))
    })
    .build()
}

/// 静态流水线：构建期已知的集合逐元素展开，列表参数携带占位引用
#[tokio::test]
async fn test_static_pipeline_total() {
  let (runtime, metrics) = test_runtime();
  let square = square_task("s1_square");
  let total = sum_task("s1_total");

  let flow = Flow::new("static_pipeline", move |b| {
    let squares = b.fan_out_values(&square, vec![json!(1), json!(2), json!(3), json!(4)]);
    let list = ArgValue::List(squares.iter().map(ArgValue::from).collect());
    Ok(b.invoke(&total, TaskArgs::new().arg(list)).into())
  })
  .with_runtime(runtime);

  let result = flow.run(RunOptions::default()).await.unwrap();
  assert_eq!(result, json!(30));
  assert_eq!(metrics.counter(TASKS_SUCCEEDED), 5);

  let graph = flow.describe().unwrap();
  assert_eq!(graph["count"], json!(5));
}

/// 动态流水线：numbers → 扇出 square → total，共 6 次任务完成
#[tokio::test]
async fn test_dynamic_pipeline_total() {
  let (runtime, metrics) = test_runtime();
  let numbers =
    TaskDefinition::builder("s1_numbers").handler(|_input| async { Ok(json!([1, 2, 3, 4])) }).build();
  let square = square_task("s1_square_dyn");
  let total = sum_task("s1_total_dyn");

  let flow = Flow::new("dynamic_pipeline", move |b| {
    let nums = b.invoke(&numbers, TaskArgs::new());
    let squares = b.fan_out(&square, &nums, None);
    Ok(b.invoke(&total, TaskArgs::new().arg(&squares)).into())
  })
  .with_runtime(runtime);

  let (result, summary) = flow.run_with_summary(RunOptions::default()).await;
  assert_eq!(result.unwrap(), json!(30));
  assert_eq!(metrics.counter(TASKS_SUCCEEDED), 6);

  let square_nodes =
    summary.node_states.iter().filter(|(name, _)| name.as_str().starts_with("s1_square_dyn:")).count();
  assert_eq!(square_nodes, 4);
}

/// 动态扇出：1 个源 + 3 个子任务 + 1 个聚合，屏障收齐 3 个子结果
#[tokio::test]
async fn test_dynamic_fan_out_over_urls() {
  let (runtime, metrics) = test_runtime();
  let list_urls =
    TaskDefinition::builder("s2_list_urls").handler(|_input| async { Ok(json!(["a", "b", "c"])) }).build();
  let fetch = TaskDefinition::builder("s2_fetch")
    .handler(|input: TaskInput| async move {
      let url: String = input.arg_as(0)?;
      Ok(json!(url.len()))
    })
    .build();
  let agg = sum_task("s2_agg");

  let flow = Flow::new("fetch_all", move |b| {
    let urls = b.invoke(&list_urls, TaskArgs::new());
    let fetched = b.fan_out(&fetch, &urls, None);
    Ok(b.invoke(&agg, TaskArgs::new().arg(&fetched)).into())
  })
  .with_runtime(runtime);

  let (result, summary) = flow.run_with_summary(RunOptions::default()).await;
  assert_eq!(result.unwrap(), json!(3));
  assert_eq!(metrics.counter(TASKS_SUCCEEDED), 5);

  // 屏障收齐三个子任务后成功
  let fetch_nodes: Vec<_> =
    summary.node_states.iter().filter(|(name, _)| name.as_str().starts_with("s2_fetch:")).collect();
  assert_eq!(fetch_nodes.len(), 3);
  assert!(fetch_nodes.iter().all(|(_, state)| **state == NodeState::Succeeded));
  assert_eq!(summary.node_states.get(&luoshu_core::NodeName::from("fanout:1")), Some(&NodeState::Succeeded));
}

/// 重试退避：失败两次后成功。3 次 task_started、2 次 task_retry、1 次 task_succeeded，
/// 实际睡眠不低于 0.1 + 0.2 秒
#[tokio::test]
async fn test_retries_with_backoff() {
  let (runtime, _metrics) = test_runtime();

  let events: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
  for kind in [EventKind::TaskStarted, EventKind::TaskRetry, EventKind::TaskSucceeded, EventKind::TaskFailed] {
    let log = events.clone();
    runtime.subscribe(kind, move |payload| {
      if payload.get("task").and_then(|v| v.as_str()) == Some("s3_flaky") {
        log.lock().unwrap().push(kind.to_string());
      }
      Ok(())
    });
  }

  let attempts = Arc::new(AtomicU32::new(0));
  let attempts_in_task = attempts.clone();
  let flaky = TaskDefinition::builder("s3_flaky")
    .handler(move |_input| {
      let attempts = attempts_in_task.clone();
      async move {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
          Err("暂时性失败".into())
        } else {
          Ok(json!("ok"))
        }
      }
    })
    .with_retries(3)
    .with_retry_backoff(0.1)
    .with_retry_jitter(0.0)
    .build();

  let flow =
    Flow::new("flaky_flow", move |b| Ok(b.invoke(&flaky, TaskArgs::new()).into())).with_runtime(runtime);

  let started = Instant::now();
  let result = flow.run(RunOptions::default()).await.unwrap();
  let elapsed = started.elapsed();

  assert_eq!(result, json!("ok"));
  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  // 0.1 · 2^0 + 0.1 · 2^1
  assert!(elapsed >= Duration::from_millis(300), "elapsed: {:?}", elapsed);

  let log = events.lock().unwrap();
  assert_eq!(
    log.as_slice(),
    &["task_started", "task_retry", "task_started", "task_retry", "task_started", "task_succeeded"]
  );
}

/// fail_fast：B 先失败，A 在挂起点被取消，运行在排空后立刻返回
#[tokio::test]
async fn test_fail_fast_cancels_in_flight() {
  let (runtime, _metrics) = test_runtime();

  let slow = TaskDefinition::builder("s4_slow")
    .handler(|_input| async {
      tokio::time::sleep(Duration::from_secs(1)).await;
      Ok(json!("done"))
    })
    .build();
  let boom = TaskDefinition::builder("s4_boom")
    .handler(|_input| async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Err("炸了".into())
    })
    .build();
  let join = TaskDefinition::builder("s4_join").handler(|_input| async { Ok(JsonValue::Null) }).build();

  let flow = Flow::new("fail_fast_flow", move |b| {
    let a = b.invoke(&slow, TaskArgs::new());
    let c = b.invoke(&boom, TaskArgs::new());
    Ok(b.invoke(&join, TaskArgs::new().arg(&a).arg(&c)).into())
  })
  .with_runtime(runtime);

  let started = Instant::now();
  let options = RunOptions::builder().failure_policy(FailurePolicy::FailFast).max_concurrency(2).build();
  let (result, summary) = flow.run_with_summary(options).await;
  let elapsed = started.elapsed();

  let error = result.unwrap_err();
  match &error {
    FlowRunError::Task(f) => {
      assert_eq!(f.task(), Some("s4_boom"));
      assert!(matches!(f.as_ref(), TaskFailure::Execution(_)));
    }
    other => panic!("期望 Task 失败，实际: {:?}", other),
  }

  assert_eq!(summary.node_states.get(&luoshu_core::NodeName::from("s4_slow:0")), Some(&NodeState::Cancelled));
  assert_eq!(summary.node_states.get(&luoshu_core::NodeName::from("s4_join:2")), Some(&NodeState::Cancelled));
  // A 的 1 秒睡眠在取消点被放弃
  assert!(elapsed < Duration::from_millis(900), "elapsed: {:?}", elapsed);
}

/// aggregate：两个失败按声明顺序聚合，失败的下游不派发
#[tokio::test]
async fn test_aggregate_policy_collects_failures() {
  let (runtime, metrics) = test_runtime();

  let bad1 = TaskDefinition::builder("s5_bad1").handler(|_input| async { Err("第一个失败".into()) }).build();
  let bad2 = TaskDefinition::builder("s5_bad2").handler(|_input| async { Err("第二个失败".into()) }).build();
  let good = TaskDefinition::builder("s5_good").handler(|_input| async { Ok(json!(1)) }).build();
  let collect = TaskDefinition::builder("s5_collect").handler(|_input| async { Ok(JsonValue::Null) }).build();

  let flow = Flow::new("aggregate_flow", move |b| {
    let a = b.invoke(&bad1, TaskArgs::new());
    let c = b.invoke(&bad2, TaskArgs::new());
    let d = b.invoke(&good, TaskArgs::new());
    Ok(b.invoke(&collect, TaskArgs::new().arg(&a).arg(&c).arg(&d)).into())
  })
  .with_runtime(runtime);

  let options = RunOptions::builder().failure_policy(FailurePolicy::Aggregate).build();
  let (result, summary) = flow.run_with_summary(options).await;

  match result.unwrap_err() {
    FlowRunError::Aggregate(aggregate) => {
      assert_eq!(aggregate.failures.len(), 2);
      let tasks: Vec<_> = aggregate.failures.iter().map(|f| f.task().unwrap().to_string()).collect();
      assert_eq!(tasks, vec!["s5_bad1", "s5_bad2"]);
    }
    other => panic!("期望 Aggregate 失败，实际: {:?}", other),
  }

  assert_eq!(summary.node_states.get(&luoshu_core::NodeName::from("s5_collect:3")), Some(&NodeState::Skipped));
  assert_eq!(metrics.counter(TASKS_FAILED), 2);
  assert_eq!(metrics.counter(TASKS_SUCCEEDED), 1);
}

/// 缓存与单飞：两个并发运行共享同一份昂贵计算。恰好执行一次，
/// cache_hits + dedup_joins == 1
#[tokio::test]
async fn test_cache_and_single_flight_across_runs() {
  let (runtime, metrics) = test_runtime();

  let executions = Arc::new(AtomicU32::new(0));
  let executions_in_task = executions.clone();
  let expensive = TaskDefinition::builder("s6_expensive")
    .handler(move |input: TaskInput| {
      let executions = executions_in_task.clone();
      async move {
        executions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let x: i64 = input.arg_as(0)?;
        Ok(json!(x * 10))
      }
    })
    .with_cache_ttl(60.0)
    .build();

  let make_flow = |runtime: Runtime, task: TaskDefinition, name: &str| {
    Flow::new(name, move |b| Ok(b.invoke(&task, TaskArgs::new().arg(json!(5))).into())).with_runtime(runtime)
  };
  let flow1 = make_flow(runtime.clone(), expensive.clone(), "expensive_flow_1");
  let flow2 = make_flow(runtime.clone(), expensive.clone(), "expensive_flow_2");

  let (r1, r2) = tokio::join!(flow1.run(RunOptions::default()), flow2.run(RunOptions::default()));
  let (r1, r2) = (r1.unwrap(), r2.unwrap());

  assert_eq!(r1, json!(50));
  assert_eq!(r1, r2);
  assert_eq!(executions.load(Ordering::SeqCst), 1);
  assert_eq!(metrics.counter(CACHE_HITS) + metrics.counter(DEDUP_JOINS), 1);
}

/// 制品交接：生产者持久化大结果，消费者拿到 ArtifactRef 并按需取回
#[tokio::test]
async fn test_artifact_handoff() {
  let store = Arc::new(MemoryArtifactStore::new());
  let runtime = Runtime::builder().with_artifact_store(store.clone()).build();

  let produce = TaskDefinition::builder("s7_produce")
    .handler(|_input| async { Ok(JsonValue::from((0..1000).collect::<Vec<i64>>())) })
    .with_persist(true)
    .build();
  let consume = TaskDefinition::builder("s7_consume")
    .handler(|input: TaskInput| async move {
      // 上游值不自动解引用：收到的是引用本身
      let value = input.arg(0).cloned().unwrap_or(JsonValue::Null);
      let artifact_ref = ArtifactRef::from_value(&value).ok_or("期望 ArtifactRef")?;
      let blob = input.ctx.runtime().artifact_store().get(&artifact_ref).await?;
      Ok(json!(blob.as_array().map(|a| a.len()).unwrap_or(0)))
    })
    .build();

  let flow = Flow::new("artifact_flow", move |b| {
    let blob = b.invoke(&produce, TaskArgs::new());
    Ok(b.invoke(&consume, TaskArgs::new().arg(&blob)).into())
  })
  .with_runtime(runtime);

  let result = flow.run(RunOptions::default()).await.unwrap();
  assert_eq!(result, json!(1000));
  assert_eq!(store.len(), 1);
}

/// continue 策略：失败上游以哨兵值到达下游，下游可容错；运行最终仍聚合失败
#[tokio::test]
async fn test_continue_policy_delivers_sentinel() {
  let (runtime, _metrics) = test_runtime();

  let bad = TaskDefinition::builder("cont_bad").handler(|_input| async { Err("上游失败".into()) }).build();
  let tolerant = TaskDefinition::builder("cont_tolerant")
    .handler(|input: TaskInput| async move {
      let upstream = input.arg(0).cloned().unwrap_or(JsonValue::Null);
      if failure::is_sentinel(&upstream) { Ok(json!("recovered")) } else { Ok(json!("unexpected")) }
    })
    .build();

  let flow = Flow::new("continue_flow", move |b| {
    let a = b.invoke(&bad, TaskArgs::new());
    Ok(b.invoke(&tolerant, TaskArgs::new().arg(&a)).into())
  })
  .with_runtime(runtime);

  let options = RunOptions::builder().failure_policy(FailurePolicy::Continue).build();
  let (result, summary) = flow.run_with_summary(options).await;

  // 下游确实被派发且成功
  assert_eq!(summary.node_states.get(&luoshu_core::NodeName::from("cont_tolerant:1")), Some(&NodeState::Succeeded));
  // 但运行面仍聚合了失败
  match result.unwrap_err() {
    FlowRunError::Aggregate(aggregate) => assert_eq!(aggregate.failures.len(), 1),
    other => panic!("期望 Aggregate 失败，实际: {:?}", other),
  }
}

/// 嵌套扇出：屏障结果作为另一个扇出的源，顺序保持，无特判
#[tokio::test]
async fn test_nested_fan_out() {
  let (runtime, _metrics) = test_runtime();

  let source = TaskDefinition::builder("nest_source").handler(|_input| async { Ok(json!([1, 2, 3])) }).build();
  let echo = TaskDefinition::builder("nest_echo")
    .handler(|input: TaskInput| async move { Ok(input.arg(0).cloned().unwrap_or(JsonValue::Null)) })
    .build();
  let double = TaskDefinition::builder("nest_double")
    .handler(|input: TaskInput| async move {
      let x: i64 = input.arg_as(0)?;
      Ok(json!(x * 2))
    })
    .build();
  let agg = sum_task("nest_agg");

  let flow = Flow::new("nested_fan_out", move |b| {
    let src = b.invoke(&source, TaskArgs::new());
    let first = b.fan_out(&echo, &src, None);
    let second = b.fan_out(&double, &first, None);
    Ok(b.invoke(&agg, TaskArgs::new().arg(&second)).into())
  })
  .with_runtime(runtime);

  let result = flow.run(RunOptions::default()).await.unwrap();
  assert_eq!(result, json!(12));
}

/// 外部取消：令牌触发后取消在途任务并尽快返回
#[tokio::test]
async fn test_external_cancellation() {
  let (runtime, _metrics) = test_runtime();

  let slow = TaskDefinition::builder("cancel_slow")
    .handler(|_input| async {
      tokio::time::sleep(Duration::from_secs(1)).await;
      Ok(json!("done"))
    })
    .build();
  let flow =
    Flow::new("cancel_flow", move |b| Ok(b.invoke(&slow, TaskArgs::new()).into())).with_runtime(runtime);

  let token = tokio_util::sync::CancellationToken::new();
  let trigger = token.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.cancel();
  });

  let started = Instant::now();
  let options = RunOptions::builder().cancel(token).build();
  let result = flow.run(options).await;

  assert!(matches!(result.unwrap_err(), FlowRunError::Cancelled));
  assert!(started.elapsed() < Duration::from_millis(500));
}
