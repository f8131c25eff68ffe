use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 工作流中流动的基本数据单元
pub type JsonValue = serde_json::Value;

/// 参数映射。 key: 参数名, value: 参数值
pub type ParamsMap = serde_json::Map<String, JsonValue>;

/// 节点唯一标识符。构建期分配，形如 `<task_name>:<build_counter>`，扇出屏障为 `fanout:<n>`
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  derive_more::Constructor,
  derive_more::Display,
  derive_more::From,
  derive_more::Into,
  derive_more::AsRef,
)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for NodeName {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

/// 运行唯一标识符
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  derive_more::Constructor,
  derive_more::Display,
  derive_more::From,
  derive_more::Into,
  derive_more::AsRef,
)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
  pub fn now_v7() -> Self {
    Self(Uuid::now_v7())
  }

  pub fn new_v4() -> Self {
    Self(Uuid::new_v4())
  }
}

impl std::str::FromStr for RunId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self(Uuid::from_str(s)?))
  }
}

/// 失败策略。控制运行中的任务与待调度节点如何响应任务失败
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
  /// 首个失败即取消所有在途任务并终止运行
  #[default]
  FailFast,
  /// 失败节点以哨兵值参与下游参数，运行继续
  Continue,
  /// 失败不中断其它工作，但失败节点的下游被跳过；运行结束时聚合根因
  Aggregate,
}

/// `continue` 策略下的失败哨兵值。
///
/// 失败的上游节点在下游任务的参数位置上被替换为
/// `{"$failed": {"node": ..., "task": ..., "error": ...}}`，
/// 下游任务可通过 [is_sentinel] 识别并自行决定容错逻辑。
pub mod failure {
  use super::{JsonValue, NodeName};

  pub const SENTINEL_KEY: &str = "$failed";

  pub fn sentinel(node: &NodeName, task: &str, error: &str) -> JsonValue {
    serde_json::json!({ "$failed": { "node": node, "task": task, "error": error } })
  }

  pub fn is_sentinel(value: &JsonValue) -> bool {
    value.as_object().is_some_and(|m| m.contains_key(SENTINEL_KEY))
  }

  /// 提取哨兵中记录的错误消息
  pub fn sentinel_error(value: &JsonValue) -> Option<&str> {
    value.get(SENTINEL_KEY)?.get("error")?.as_str()
  }
}
