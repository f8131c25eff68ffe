use crate::task::TaskDefinition;
use crate::types::{JsonValue, NodeName, ParamsMap};

use super::{FanOut, Invocation, TaskArgs};

/// 流体内创建占位节点的构建器。
///
/// 节点 ID 在一次构建内稳定：任务节点 `<task_name>:<build_counter>`，
/// 扇出屏障 `fanout:<n>`。
pub struct FlowBuilder {
  params: ParamsMap,
  nodes: Vec<BuilderNode>,
  counter: u64,
}

pub(crate) struct BuilderNode {
  pub name: NodeName,
  pub seq: u64,
  pub kind: BuilderNodeKind,
}

pub(crate) enum BuilderNodeKind {
  Task { task: TaskDefinition, args: TaskArgs },
  FanOut { source: NodeName, child_task: TaskDefinition, max_concurrency: Option<usize> },
}

/// 动态扇出的上游：任务调用或另一个扇出屏障
pub struct FanOutSource(NodeName);

impl From<&Invocation> for FanOutSource {
  fn from(invocation: &Invocation) -> Self {
    Self(invocation.node_name().clone())
  }
}

impl From<&FanOut> for FanOutSource {
  fn from(fan_out: &FanOut) -> Self {
    Self(fan_out.node_name().clone())
  }
}

impl FlowBuilder {
  pub(crate) fn new(params: ParamsMap) -> Self {
    Self { params, nodes: Vec::new(), counter: 0 }
  }

  /// 本次运行的参数
  pub fn params(&self) -> &ParamsMap {
    &self.params
  }

  pub fn param(&self, name: &str) -> Option<&JsonValue> {
    self.params.get(name)
  }

  /// 构建期调用任务：不执行任务体，返回占位
  pub fn invoke(&mut self, task: &TaskDefinition, args: TaskArgs) -> Invocation {
    let seq = self.next_seq();
    let name = NodeName::from(format!("{}:{}", task.name(), seq));
    self.nodes.push(BuilderNode { name: name.clone(), seq, kind: BuilderNodeKind::Task { task: task.clone(), args } });
    Invocation::new(name)
  }

  /// 声明动态扇出：上游成功后，调度器按其数组结果逐元素创建 `child_task` 子任务。
  ///
  /// `max_concurrency` 目前仅作为提示记录，不强制执行；全局并发上限仍然约束子任务。
  pub fn fan_out(
    &mut self,
    child_task: &TaskDefinition,
    source: impl Into<FanOutSource>,
    max_concurrency: Option<usize>,
  ) -> FanOut {
    let seq = self.next_seq();
    let name = NodeName::from(format!("fanout:{}", seq));
    self.nodes.push(BuilderNode {
      name: name.clone(),
      seq,
      kind: BuilderNodeKind::FanOut { source: source.into().0, child_task: child_task.clone(), max_concurrency },
    });
    FanOut::new(name)
  }

  /// 静态扇出：集合在构建期已知，逐元素创建调用并返回有序占位列表
  pub fn fan_out_values(&mut self, task: &TaskDefinition, values: Vec<JsonValue>) -> Vec<Invocation> {
    values.into_iter().map(|value| self.invoke(task, TaskArgs::new().arg(value))).collect()
  }

  fn next_seq(&mut self) -> u64 {
    let seq = self.counter;
    self.counter += 1;
    seq
  }

  pub(crate) fn into_nodes(self) -> Vec<BuilderNode> {
    self.nodes
  }
}
