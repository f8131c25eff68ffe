//! 调度器：单次运行的驱动器。
//!
//! 单一协作循环：按 `(-priority, build_counter)` 从就绪堆选节点，在并发上限内
//! 派发到执行管道，挂起等待下一个完成；完成后更新入度并晋升新就绪节点。
//! 扇出屏障在上游成功后原位展开；失败按策略处理（fail_fast 取消并排空、
//! continue 哨兵继续、aggregate 跳过下游）。

mod state;

use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

use ahash::HashMap;
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};

use crate::context::{self, RunContext};
use crate::error::{AggregateTaskError, DynamicExpansionError, FlowRunError, TaskFailure, TaskResult};
use crate::flow::dag::DagNodeKind;
use crate::flow::{ArgValue, Dag, TaskArgs};
use crate::runtime::Runtime;
use crate::task::TaskInput;
use crate::types::{FailurePolicy, JsonValue, NodeName, failure};

pub use state::NodeState;
pub(crate) use state::{NodeOutcome, ReadyEntry};

type CompletionFuture = futures::future::BoxFuture<'static, (NodeName, TaskResult)>;

pub(crate) struct Scheduler {
  runtime: Runtime,
  dag: Dag,
  ctx: RunContext,
  policy: FailurePolicy,
  max_concurrency: Option<usize>,
  max_dynamic_tasks: usize,
  states: HashMap<NodeName, NodeState>,
  outcomes: HashMap<NodeName, NodeOutcome>,
  in_degrees: HashMap<NodeName, usize>,
  ready: BinaryHeap<ReadyEntry>,
  running: FuturesUnordered<CompletionFuture>,
  /// 本次运行已创建的动态子任务总数（护栏按运行累计）
  dynamic_children: usize,
  /// 终态失败，附声明序号以保证聚合时的声明顺序
  failures: Vec<(u64, Arc<TaskFailure>)>,
}

impl Scheduler {
  pub fn new(runtime: Runtime, dag: Dag, ctx: RunContext, max_concurrency: Option<usize>) -> Self {
    let max_dynamic_tasks = runtime.setting().max_dynamic_tasks;
    let policy = ctx.failure_policy();
    Self {
      runtime,
      dag,
      ctx,
      policy,
      max_concurrency,
      max_dynamic_tasks,
      states: HashMap::default(),
      outcomes: HashMap::default(),
      in_degrees: HashMap::default(),
      ready: BinaryHeap::new(),
      running: FuturesUnordered::new(),
      dynamic_children: 0,
      failures: Vec::new(),
    }
  }

  pub async fn run(mut self) -> (Result<JsonValue, FlowRunError>, BTreeMap<NodeName, NodeState>) {
    self.in_degrees = self.dag.in_degrees();
    for name in self.dag.node_names() {
      self.states.insert(name.clone(), NodeState::Pending);
    }

    let seeds: Vec<NodeName> =
      self.dag.node_names().iter().filter(|n| self.in_degrees.get(*n).copied().unwrap_or(0) == 0).cloned().collect();
    for node in seeds {
      if let Err(e) = self.on_node_unblocked(&node) {
        return self.abort(e).await;
      }
    }

    loop {
      while self.has_capacity()
        && let Some(entry) = self.ready.pop()
      {
        if let Err(e) = self.dispatch(entry) {
          return self.abort(e).await;
        }
      }
      if self.running.is_empty() {
        break;
      }

      // 挂起等待下一个完成或运行级取消（唯一的调度挂起点）
      let completed = tokio::select! {
        _ = self.ctx.cancel_token().cancelled() => None,
        completed = self.running.next() => completed,
      };
      match completed {
        None => {
          if self.ctx.is_cancelled() {
            return self.abort(FlowRunError::Cancelled).await;
          }
        }
        Some((node, result)) => {
          if let Err(e) = self.handle_completion(node, result) {
            return self.abort(e).await;
          }
        }
      }
    }

    if let Some(stalled) = self.dag.node_names().iter().find(|n| !self.state(n).is_terminal()) {
      let error = FlowRunError::Internal(format!("调度停滞于节点 {}", stalled));
      return (Err(error), self.states_snapshot());
    }

    if !self.failures.is_empty() && self.policy != FailurePolicy::FailFast {
      self.failures.sort_by_key(|(seq, _)| *seq);
      let failures = self.failures.iter().map(|(_, f)| f.clone()).collect();
      return (Err(AggregateTaskError { failures }.into()), self.states_snapshot());
    }

    let result = match self.outcomes.get(self.dag.root()) {
      Some(NodeOutcome::Succeeded(value)) => Ok(value.clone()),
      other => Err(FlowRunError::Internal(format!("根节点 {} 没有成功产出: {:?}", self.dag.root(), other))),
    };
    (result, self.states_snapshot())
  }

  /// 致命终止：取消在途任务并排空（等待其自然结束，结果丢弃），
  /// 未到终态的节点记为 cancelled
  async fn abort(mut self, error: FlowRunError) -> (Result<JsonValue, FlowRunError>, BTreeMap<NodeName, NodeState>) {
    self.ctx.cancel_token().cancel();
    while let Some((node, _discarded)) = self.running.next().await {
      self.states.insert(node, NodeState::Cancelled);
    }
    for name in self.dag.node_names() {
      if !self.state(name).is_terminal() {
        self.states.insert(name.clone(), NodeState::Cancelled);
      }
    }
    (Err(error), self.states_snapshot())
  }

  fn has_capacity(&self) -> bool {
    match self.max_concurrency {
      Some(limit) => self.running.len() < limit.max(1),
      None => true,
    }
  }

  fn state(&self, node: &NodeName) -> NodeState {
    self.states.get(node).copied().unwrap_or(NodeState::Pending)
  }

  fn states_snapshot(&self) -> BTreeMap<NodeName, NodeState> {
    self.states.iter().map(|(k, v)| (k.clone(), *v)).collect()
  }

  fn dispatch(&mut self, entry: ReadyEntry) -> Result<(), FlowRunError> {
    let node = entry.node;
    let (task, args) = match self.dag.node(&node).map(|n| &n.kind) {
      Some(DagNodeKind::Task { task, args }) => (task.clone(), args.clone()),
      _ => return Err(FlowRunError::Internal(format!("就绪堆中出现非任务节点: {}", node))),
    };

    let input = self.resolve_input(&args)?;
    self.states.insert(node.clone(), NodeState::Running);
    debug!("Dispatching node {} (task {})", node, task.name());

    let runtime = self.runtime.clone();
    let ctx = self.ctx.clone();
    let fut = async move {
      let result = context::with_context(ctx, crate::execution::execute_node(runtime, task, node.clone(), input)).await;
      (node, result)
    }
    .boxed();
    self.running.push(fut);
    Ok(())
  }

  fn handle_completion(&mut self, node: NodeName, result: TaskResult) -> Result<(), FlowRunError> {
    match result {
      Ok(value) => self.record_success(node, value),
      Err(failure) => self.record_failure(node, failure),
    }
  }

  fn record_success(&mut self, node: NodeName, value: JsonValue) -> Result<(), FlowRunError> {
    self.states.insert(node.clone(), NodeState::Succeeded);
    self.outcomes.insert(node.clone(), NodeOutcome::Succeeded(value));
    self.resolve_dependents(&node)
  }

  fn record_failure(&mut self, node: NodeName, failure: Arc<TaskFailure>) -> Result<(), FlowRunError> {
    // 运行级取消与任务级取消竞争时，以运行级语义为准
    if matches!(failure.as_ref(), TaskFailure::Cancelled { .. }) && self.ctx.is_cancelled() {
      return Err(FlowRunError::Cancelled);
    }
    self.fail_node(&node, failure)
  }

  fn fail_node(&mut self, node: &NodeName, failure: Arc<TaskFailure>) -> Result<(), FlowRunError> {
    warn!("Node {} failed: {}", node, failure);
    self.states.insert(node.clone(), NodeState::Failed);
    self.outcomes.insert(node.clone(), NodeOutcome::Failed(failure.clone()));
    self.failures.push((self.dag.seq_of(node), failure.clone()));

    match self.policy {
      FailurePolicy::FailFast => Err(FlowRunError::Task(failure)),
      FailurePolicy::Continue => self.resolve_dependents(node),
      FailurePolicy::Aggregate => {
        self.skip_dependents(node);
        Ok(())
      }
    }
  }

  /// 一个依赖到达终态：更新下游入度，入度归零者晋升
  fn resolve_dependents(&mut self, node: &NodeName) -> Result<(), FlowRunError> {
    let dependents: Vec<NodeName> = self.dag.dependents(node).to_vec();
    for dependent in dependents {
      let st = self.state(&dependent);
      if !matches!(st, NodeState::Pending | NodeState::Expanding) {
        continue;
      }
      let degree = self.in_degrees.entry(dependent.clone()).or_insert(0);
      *degree = degree.saturating_sub(1);
      if *degree > 0 {
        continue;
      }
      match st {
        NodeState::Pending => self.on_node_unblocked(&dependent)?,
        NodeState::Expanding => self.complete_barrier(&dependent)?,
        _ => {}
      }
    }
    Ok(())
  }

  /// `aggregate` 策略：依赖失败（或被跳过）的节点不派发，传递性标记为 skipped
  fn skip_dependents(&mut self, node: &NodeName) {
    let mut stack: Vec<NodeName> = self.dag.dependents(node).to_vec();
    while let Some(next) = stack.pop() {
      if self.state(&next).is_terminal() {
        continue;
      }
      self.states.insert(next.clone(), NodeState::Skipped);
      self.outcomes.insert(next.clone(), NodeOutcome::Skipped);
      stack.extend(self.dag.dependents(&next).iter().cloned());
    }
  }

  /// 入度归零的待调度节点：任务入就绪堆，未展开的扇出屏障进入展开
  fn on_node_unblocked(&mut self, node: &NodeName) -> Result<(), FlowRunError> {
    match self.dag.node(node).map(|n| &n.kind) {
      Some(DagNodeKind::Task { task, .. }) => {
        let entry = ReadyEntry { priority: task.priority(), seq: self.dag.seq_of(node), node: node.clone() };
        self.states.insert(node.clone(), NodeState::Ready);
        self.ready.push(entry);
        Ok(())
      }
      Some(DagNodeKind::FanOut { .. }) => self.expand_fan_out(node),
      None => Err(FlowRunError::Internal(format!("未知节点: {}", node))),
    }
  }

  /// 扇出展开：读取上游数组结果，创建子调用并接线 `source → child_i → barrier`。
  /// 嵌套扇出无需特判：任何屏障完成后产出有序列表，作为源时同样按元素展开。
  fn expand_fan_out(&mut self, barrier: &NodeName) -> Result<(), FlowRunError> {
    self.states.insert(barrier.clone(), NodeState::Expanding);

    let source = match self.dag.node(barrier).map(|n| &n.kind) {
      Some(DagNodeKind::FanOut { source, .. }) => source.clone(),
      _ => return Err(FlowRunError::Internal(format!("展开非扇出节点: {}", barrier))),
    };
    let source_value = self
      .resolved_value_of(&source)
      .ok_or_else(|| FlowRunError::Internal(format!("扇出 {} 的上游 {} 没有产出", barrier, source)))?;

    let values = match source_value.as_array() {
      Some(values) => values.clone(),
      None => {
        let failure = Arc::new(TaskFailure::Expansion(DynamicExpansionError::SourceNotIterable { node: barrier.clone() }));
        return self.fail_node(barrier, failure);
      }
    };

    let actual = self.dynamic_children + values.len();
    if actual > self.max_dynamic_tasks {
      let failure = Arc::new(TaskFailure::Expansion(DynamicExpansionError::GuardrailExceeded {
        node: barrier.clone(),
        limit: self.max_dynamic_tasks,
        actual,
      }));
      return self.fail_node(barrier, failure);
    }
    self.dynamic_children = actual;

    let children = self.dag.splice_fan_out(barrier, &values);
    debug!("Expanded fan-out {} into {} children", barrier, children.len());

    self.in_degrees.insert(barrier.clone(), children.len());
    if children.is_empty() {
      return self.complete_barrier(barrier);
    }
    for child in children {
      self.states.insert(child.clone(), NodeState::Pending);
      self.in_degrees.insert(child.clone(), 0);
      self.on_node_unblocked(&child)?;
    }
    Ok(())
  }

  /// 屏障完成：有序收集子任务结果作为屏障的值
  fn complete_barrier(&mut self, barrier: &NodeName) -> Result<(), FlowRunError> {
    let children: Vec<NodeName> = self.dag.fan_out_children(barrier).to_vec();
    let mut items = Vec::with_capacity(children.len());
    for child in &children {
      match self.resolved_value_of(child) {
        Some(value) => items.push(value),
        None => return Err(FlowRunError::Internal(format!("扇出 {} 的子任务 {} 没有产出", barrier, child))),
      }
    }
    self.record_success(barrier.clone(), JsonValue::Array(items))
  }

  fn resolve_input(&self, args: &TaskArgs) -> Result<TaskInput, FlowRunError> {
    let mut positional = Vec::with_capacity(args.args.len());
    for arg in &args.args {
      positional.push(self.resolve_arg(arg)?);
    }
    let mut kwargs = std::collections::BTreeMap::new();
    for (name, arg) in &args.kwargs {
      kwargs.insert(name.clone(), self.resolve_arg(arg)?);
    }
    Ok(TaskInput::new(positional, kwargs, self.ctx.clone()))
  }

  fn resolve_arg(&self, arg: &ArgValue) -> Result<JsonValue, FlowRunError> {
    match arg {
      ArgValue::Literal(value) => Ok(value.clone()),
      ArgValue::Ref(node) | ArgValue::FanOutRef(node) => {
        self.resolved_value_of(node).ok_or_else(|| FlowRunError::Internal(format!("依赖 {} 尚未到达终态", node)))
      }
      ArgValue::List(items) => {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
          values.push(self.resolve_arg(item)?);
        }
        Ok(JsonValue::Array(values))
      }
    }
  }

  /// 节点在参数位置上的取值：成功为其产出，失败为哨兵对象
  fn resolved_value_of(&self, node: &NodeName) -> Option<JsonValue> {
    match self.outcomes.get(node)? {
      NodeOutcome::Succeeded(value) => Some(value.clone()),
      NodeOutcome::Failed(f) => Some(failure::sentinel(node, f.task().unwrap_or(""), &f.to_string())),
      NodeOutcome::Skipped => None,
    }
  }
}
