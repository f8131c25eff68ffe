use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TaskFailure;
use crate::types::{JsonValue, NodeName};

/// 节点在一次运行内的状态。
///
/// 迁移：`pending → ready → running → succeeded|failed|cancelled`；
/// 扇出屏障在上游成功与子任务创建之间有附加的 `expanding` 状态；
/// `aggregate` 策略下失败节点的下游记为 `skipped`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeState {
  Pending,
  Ready,
  Running,
  Expanding,
  Succeeded,
  Failed,
  Cancelled,
  Skipped,
}

impl NodeState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, NodeState::Succeeded | NodeState::Failed | NodeState::Cancelled | NodeState::Skipped)
  }
}

/// 节点的终态产出。结果存活到运行返回为止
#[derive(Debug, Clone)]
pub(crate) enum NodeOutcome {
  Succeeded(JsonValue),
  Failed(Arc<TaskFailure>),
  Skipped,
}

/// 就绪堆条目。排序键 `(-priority, build_counter)`：
/// 高优先级先派发，同优先级按声明顺序
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReadyEntry {
  pub priority: i32,
  pub seq: u64,
  pub node: NodeName,
}

impl Ord for ReadyEntry {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    // BinaryHeap 为大顶堆：优先级高者为大；同优先级时 seq 小者为大
    self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for ReadyEntry {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}
