use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::context::RunContext;
use crate::error::{FlowBuildError, FlowRunError};
use crate::observability::{EventKind, EventPayload};
use crate::runtime::Runtime;
use crate::scheduler::{NodeState, Scheduler};
use crate::types::{FailurePolicy, JsonValue, NodeName, ParamsMap, RunId};

use super::{Dag, FanOut, FlowBuilder, Invocation};

type FlowBody = dyn Fn(&mut FlowBuilder) -> Result<FlowOutput, FlowBuildError> + Send + Sync;

/// 流体的返回值：根占位。运行结果即根节点的产出
pub struct FlowOutput {
  pub(crate) root: NodeName,
}

impl From<Invocation> for FlowOutput {
  fn from(invocation: Invocation) -> Self {
    Self { root: invocation.node_name().clone() }
  }
}

impl From<&Invocation> for FlowOutput {
  fn from(invocation: &Invocation) -> Self {
    Self { root: invocation.node_name().clone() }
  }
}

impl From<FanOut> for FlowOutput {
  fn from(fan_out: FanOut) -> Self {
    Self { root: fan_out.node_name().clone() }
  }
}

impl From<&FanOut> for FlowOutput {
  fn from(fan_out: &FanOut) -> Self {
    Self { root: fan_out.node_name().clone() }
  }
}

/// 一次运行的选项
#[derive(Clone, Default, TypedBuilder)]
pub struct RunOptions {
  #[builder(default)]
  pub params: ParamsMap,

  #[builder(default)]
  pub failure_policy: FailurePolicy,

  /// 并发上限（含动态展开的子任务）。缺省不限制
  #[builder(default, setter(strip_option))]
  pub max_concurrency: Option<usize>,

  /// 外部取消令牌。触发后运行取消所有在途任务并在排空后返回
  #[builder(default, setter(strip_option))]
  pub cancel: Option<CancellationToken>,
}

/// 一次运行的汇总：节点终态与耗时
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
  pub run_id: RunId,
  pub flow: String,
  pub node_states: BTreeMap<NodeName, NodeState>,
  pub duration_ms: u64,
}

/// 流：以流体函数声明的任务 DAG。
///
/// 流体在每次运行（以及 `describe`/导出）时重新执行，构建出的调用与
/// DAG 归属该次运行，结束即丢弃；[TaskDefinition](crate::task::TaskDefinition)
/// 则跨运行存活。
pub struct Flow {
  name: String,
  body: Arc<FlowBody>,
  runtime: Option<Runtime>,
}

impl Flow {
  pub fn new<F>(name: impl Into<String>, body: F) -> Self
  where
    F: Fn(&mut FlowBuilder) -> Result<FlowOutput, FlowBuildError> + Send + Sync + 'static,
  {
    Self { name: name.into(), body: Arc::new(body), runtime: None }
  }

  /// 绑定显式 Runtime（测试与可重入场景）。缺省使用进程级默认实例
  pub fn with_runtime(mut self, runtime: Runtime) -> Self {
    self.runtime = Some(runtime);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  fn effective_runtime(&self) -> Runtime {
    self.runtime.clone().unwrap_or_else(Runtime::global)
  }

  /// 以空参数构建 DAG（导出与校验用）
  pub fn build(&self) -> Result<Dag, FlowBuildError> {
    self.build_with_params(&ParamsMap::new())
  }

  pub fn build_with_params(&self, params: &ParamsMap) -> Result<Dag, FlowBuildError> {
    let mut builder = FlowBuilder::new(params.clone());
    let output = (self.body)(&mut builder)?;
    Dag::build(self.name.clone(), builder.into_nodes(), output.root)
  }

  /// 邻接 JSON 描述
  pub fn describe(&self) -> Result<JsonValue, FlowBuildError> {
    Ok(self.build()?.to_adjacency_json())
  }

  pub fn export_graph(&self) -> Result<JsonValue, FlowBuildError> {
    self.describe()
  }

  pub fn export_dot(&self) -> Result<String, FlowBuildError> {
    Ok(self.build()?.to_dot())
  }

  /// 执行流，返回根节点的产出
  pub async fn run(&self, options: RunOptions) -> Result<JsonValue, FlowRunError> {
    self.run_with_summary(options).await.0
  }

  /// 执行流，同时返回运行汇总（节点终态）
  pub async fn run_with_summary(&self, options: RunOptions) -> (Result<JsonValue, FlowRunError>, RunSummary) {
    let runtime = self.effective_runtime();
    let started = Instant::now();

    let dag = match self.build_with_params(&options.params) {
      Ok(dag) => dag,
      Err(e) => {
        let summary = RunSummary {
          run_id: RunId::now_v7(),
          flow: self.name.clone(),
          node_states: BTreeMap::new(),
          duration_ms: 0,
        };
        return (Err(e.into()), summary);
      }
    };

    let cancel = options.cancel.as_ref().map(|t| t.child_token()).unwrap_or_default();
    let ctx = RunContext::new(runtime.clone(), self.name.clone(), options.params, options.failure_policy, cancel);
    let run_id = ctx.run_id().clone();

    let span = runtime.tracer().span(&format!("flow:{}", self.name), &[("run_id", run_id.to_string())]);
    runtime.emit(EventKind::FlowStarted, flow_payload(&self.name, &run_id, None));

    let scheduler = Scheduler::new(runtime.clone(), dag, ctx, options.max_concurrency);
    let (result, node_states) = scheduler.run().await;

    let status = if result.is_ok() { "succeeded" } else { "failed" };
    runtime.emit(EventKind::FlowCompleted, flow_payload(&self.name, &run_id, Some(status)));
    drop(span);

    let summary = RunSummary {
      run_id,
      flow: self.name.clone(),
      node_states,
      duration_ms: started.elapsed().as_millis() as u64,
    };
    (result, summary)
  }
}

fn flow_payload(flow: &str, run_id: &RunId, status: Option<&str>) -> EventPayload {
  let mut payload = EventPayload::new();
  payload.insert("flow".to_string(), JsonValue::from(flow));
  payload.insert("run_id".to_string(), JsonValue::from(run_id.to_string()));
  if let Some(status) = status {
    payload.insert("status".to_string(), JsonValue::from(status));
  }
  payload
}
