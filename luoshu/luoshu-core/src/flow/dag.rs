use ahash::HashMap;

use crate::error::FlowBuildError;
use crate::task::TaskDefinition;
use crate::types::{JsonValue, NodeName};

use super::TaskArgs;
use super::builder::{BuilderNode, BuilderNodeKind};

#[derive(Debug)]
pub(crate) enum DagNodeKind {
  Task {
    task: TaskDefinition,
    args: TaskArgs,
  },
  FanOut {
    source: NodeName,
    child_task: TaskDefinition,
    /// 仅作为提示记录并随 describe 导出，当前不强制执行
    max_concurrency: Option<usize>,
    /// 运行期展开后填充，保持上游数组的顺序
    children: Vec<NodeName>,
  },
}

#[derive(Debug)]
pub(crate) struct DagNode {
  pub name: NodeName,
  pub seq: u64,
  pub kind: DagNodeKind,
}

/// 一次运行的图制品：调用与扇出屏障的节点集合 + 依赖边。
///
/// 构建自流体返回的根占位：只保留从根可达的节点（树摇），未被引用的
/// 占位被有意省略。扇出的下游只依赖屏障，绝不直连其上游。
/// 运行期扇出展开通过 [Dag::splice_fan_out] 原位改写图。
#[derive(Debug)]
pub struct Dag {
  flow: String,
  nodes: HashMap<NodeName, DagNode>,
  /// 邻接表。 key: 上游节点, value: 下游节点列表
  adjacency: HashMap<NodeName, Vec<NodeName>>,
  /// 每个节点的父节点列表
  parents: HashMap<NodeName, Vec<NodeName>>,
  /// 保留节点的声明顺序
  order: Vec<NodeName>,
  root: NodeName,
  next_seq: u64,
}

impl Dag {
  pub(crate) fn build(flow: impl Into<String>, all_nodes: Vec<BuilderNode>, root: NodeName) -> Result<Self, FlowBuildError> {
    let mut specs: HashMap<NodeName, BuilderNode> = HashMap::default();
    for node in all_nodes {
      specs.insert(node.name.clone(), node);
    }
    if !specs.contains_key(&root) {
      return Err(FlowBuildError::UnknownPlaceholder { node: root });
    }

    // 从根出发的可达性遍历（树摇），同时校验所有引用存在
    let mut reachable: Vec<NodeName> = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(name) = stack.pop() {
      if reachable.contains(&name) {
        continue;
      }
      let spec = specs.get(&name).ok_or_else(|| FlowBuildError::UnknownPlaceholder { node: name.clone() })?;
      reachable.push(name);
      for dep in node_dependencies(&spec.kind) {
        if !specs.contains_key(&dep) {
          return Err(FlowBuildError::UnknownPlaceholder { node: dep });
        }
        stack.push(dep);
      }
    }

    // 按声明顺序整理保留节点
    let mut order: Vec<NodeName> = reachable;
    order.sort_by_key(|name| specs.get(name).map(|s| s.seq).unwrap_or(u64::MAX));

    let mut nodes: HashMap<NodeName, DagNode> = HashMap::default();
    let mut adjacency: HashMap<NodeName, Vec<NodeName>> = HashMap::default();
    let mut parents: HashMap<NodeName, Vec<NodeName>> = HashMap::default();
    let mut next_seq = 0u64;

    for name in &order {
      adjacency.insert(name.clone(), Vec::new());
      parents.insert(name.clone(), Vec::new());
    }

    for name in &order {
      let spec = specs.remove(name).expect("reachable node must exist in specs");
      next_seq = next_seq.max(spec.seq + 1);

      for dep in node_dependencies(&spec.kind) {
        if let Some(children) = adjacency.get_mut(&dep)
          && !children.iter().any(|v| v == name)
        {
          children.push(name.clone());
        }
        if let Some(parent_nodes) = parents.get_mut(name)
          && !parent_nodes.iter().any(|v| v == &dep)
        {
          parent_nodes.push(dep.clone());
        }
      }

      let kind = match spec.kind {
        BuilderNodeKind::Task { task, args } => DagNodeKind::Task { task, args },
        BuilderNodeKind::FanOut { source, child_task, max_concurrency } => {
          DagNodeKind::FanOut { source, child_task, max_concurrency, children: Vec::new() }
        }
      };
      nodes.insert(name.clone(), DagNode { name: name.clone(), seq: spec.seq, kind });
    }

    let dag = Self { flow: flow.into(), nodes, adjacency, parents, order, root, next_seq };
    if let Some(cycle) = dag.find_cycle() {
      return Err(FlowBuildError::WorkflowHasCycles { cycle });
    }
    Ok(dag)
  }

  pub fn flow(&self) -> &str {
    &self.flow
  }

  pub fn root(&self) -> &NodeName {
    &self.root
  }

  pub fn node_count(&self) -> usize {
    self.order.len()
  }

  pub fn node_names(&self) -> &[NodeName] {
    &self.order
  }

  pub fn contains(&self, name: &NodeName) -> bool {
    self.nodes.contains_key(name)
  }

  pub(crate) fn node(&self, name: &NodeName) -> Option<&DagNode> {
    self.nodes.get(name)
  }

  pub(crate) fn seq_of(&self, name: &NodeName) -> u64 {
    self.nodes.get(name).map(|n| n.seq).unwrap_or(u64::MAX)
  }

  /// 下游节点
  pub(crate) fn dependents(&self, name: &NodeName) -> &[NodeName] {
    self.adjacency.get(name).map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// 上游节点
  pub(crate) fn dependencies(&self, name: &NodeName) -> &[NodeName] {
    self.parents.get(name).map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// 计算每个节点的入度
  pub(crate) fn in_degrees(&self) -> HashMap<NodeName, usize> {
    let mut degrees: HashMap<NodeName, usize> = HashMap::default();
    for name in &self.order {
      degrees.insert(name.clone(), self.dependencies(name).len());
    }
    degrees
  }

  /// 扇出屏障的有序子节点（展开后非空）
  pub(crate) fn fan_out_children(&self, barrier: &NodeName) -> &[NodeName] {
    match self.nodes.get(barrier).map(|n| &n.kind) {
      Some(DagNodeKind::FanOut { children, .. }) => children,
      _ => &[],
    }
  }

  /// 运行期展开扇出：为上游数组的每个元素创建子调用，
  /// 接入边 `source → child_i → barrier`，返回有序的子节点名。
  pub(crate) fn splice_fan_out(&mut self, barrier: &NodeName, values: &[JsonValue]) -> Vec<NodeName> {
    let (source, child_task) = match self.nodes.get(barrier).map(|n| &n.kind) {
      Some(DagNodeKind::FanOut { source, child_task, .. }) => (source.clone(), child_task.clone()),
      _ => return Vec::new(),
    };

    let mut children = Vec::with_capacity(values.len());
    for value in values {
      let seq = self.next_seq;
      self.next_seq += 1;
      let name = NodeName::from(format!("{}:{}", child_task.name(), seq));

      self.nodes.insert(
        name.clone(),
        DagNode {
          name: name.clone(),
          seq,
          kind: DagNodeKind::Task { task: child_task.clone(), args: TaskArgs::new().arg(value.clone()) },
        },
      );
      self.order.push(name.clone());
      self.parents.insert(name.clone(), vec![source.clone()]);
      self.adjacency.insert(name.clone(), vec![barrier.clone()]);
      if let Some(source_children) = self.adjacency.get_mut(&source) {
        source_children.push(name.clone());
      }
      children.push(name.clone());
    }

    // 屏障的入边从上游改写为子任务集合
    if let Some(source_children) = self.adjacency.get_mut(&source) {
      source_children.retain(|n| n != barrier);
    }
    self.parents.insert(barrier.clone(), children.clone());
    if let Some(DagNodeKind::FanOut { children: slot, .. }) = self.nodes.get_mut(barrier).map(|n| &mut n.kind) {
      slot.clone_from(&children);
    }
    children
  }

  /// 三色 DFS 循环检测，返回循环路径
  fn find_cycle(&self) -> Option<Vec<NodeName>> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    let mut colors: HashMap<NodeName, u8> = HashMap::default();
    let mut path: Vec<NodeName> = Vec::new();

    fn dfs(
      node: &NodeName,
      adjacency: &HashMap<NodeName, Vec<NodeName>>,
      colors: &mut HashMap<NodeName, u8>,
      path: &mut Vec<NodeName>,
    ) -> Option<Vec<NodeName>> {
      colors.insert(node.clone(), GRAY);
      path.push(node.clone());

      if let Some(children) = adjacency.get(node) {
        for child in children {
          match colors.get(child).copied().unwrap_or(WHITE) {
            WHITE => {
              if let Some(cycle) = dfs(child, adjacency, colors, path) {
                return Some(cycle);
              }
            }
            GRAY => {
              // 回边：从路径上 child 的位置截取循环
              let start = path.iter().position(|n| n == child).unwrap_or(0);
              let mut cycle: Vec<NodeName> = path[start..].to_vec();
              cycle.push(child.clone());
              return Some(cycle);
            }
            _ => {}
          }
        }
      }

      path.pop();
      colors.insert(node.clone(), BLACK);
      None
    }

    for node in &self.order {
      if colors.get(node).copied().unwrap_or(WHITE) == WHITE
        && let Some(cycle) = dfs(node, &self.adjacency, &mut colors, &mut path)
      {
        return Some(cycle);
      }
    }
    None
  }
}

fn node_dependencies(kind: &BuilderNodeKind) -> Vec<NodeName> {
  match kind {
    BuilderNodeKind::Task { args, .. } => args.dependencies(),
    BuilderNodeKind::FanOut { source, .. } => vec![source.clone()],
  }
}
