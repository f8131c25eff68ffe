use std::collections::BTreeMap;

use crate::types::{JsonValue, NodeName};

/// 参数绑定。字面值、对其它占位节点的引用，或嵌套了引用的列表。
///
/// 构建后不可变；节点的入边依赖集合由绑定推导。
#[derive(Debug, Clone)]
pub enum ArgValue {
  /// 字面 JSON 值
  Literal(JsonValue),
  /// 引用另一个任务调用的结果
  Ref(NodeName),
  /// 引用扇出屏障：执行时交付有序的子任务结果列表
  FanOutRef(NodeName),
  /// 可嵌套引用的列表
  List(Vec<ArgValue>),
}

impl ArgValue {
  /// 收集此绑定引用的上游节点
  pub(crate) fn collect_dependencies(&self, out: &mut Vec<NodeName>) {
    match self {
      ArgValue::Literal(_) => {}
      ArgValue::Ref(node) | ArgValue::FanOutRef(node) => {
        if !out.contains(node) {
          out.push(node.clone());
        }
      }
      ArgValue::List(items) => {
        for item in items {
          item.collect_dependencies(out);
        }
      }
    }
  }
}

impl From<JsonValue> for ArgValue {
  fn from(value: JsonValue) -> Self {
    ArgValue::Literal(value)
  }
}

impl From<&Invocation> for ArgValue {
  fn from(invocation: &Invocation) -> Self {
    ArgValue::Ref(invocation.node_name().clone())
  }
}

impl From<Invocation> for ArgValue {
  fn from(invocation: Invocation) -> Self {
    ArgValue::Ref(invocation.into_node_name())
  }
}

impl From<&FanOut> for ArgValue {
  fn from(fan_out: &FanOut) -> Self {
    ArgValue::FanOutRef(fan_out.node_name().clone())
  }
}

impl From<FanOut> for ArgValue {
  fn from(fan_out: FanOut) -> Self {
    ArgValue::FanOutRef(fan_out.into_node_name())
  }
}

impl From<Vec<ArgValue>> for ArgValue {
  fn from(items: Vec<ArgValue>) -> Self {
    ArgValue::List(items)
  }
}

/// 一次任务调用的参数绑定：位置参数 + 关键字参数
#[derive(Debug, Clone, Default)]
pub struct TaskArgs {
  pub(crate) args: Vec<ArgValue>,
  pub(crate) kwargs: BTreeMap<String, ArgValue>,
}

impl TaskArgs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
    self.args.push(value.into());
    self
  }

  pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
    self.kwargs.insert(name.into(), value.into());
    self
  }

  /// 此绑定集引用的上游节点（去重，出现顺序）
  pub(crate) fn dependencies(&self) -> Vec<NodeName> {
    let mut out = Vec::new();
    for arg in &self.args {
      arg.collect_dependencies(&mut out);
    }
    for value in self.kwargs.values() {
      value.collect_dependencies(&mut out);
    }
    out
  }
}

/// 构建期占位：代表一次未执行的任务调用，站在其未来结果的位置上。
/// 轻量只读句柄，传入其它任务的参数即建立依赖边。
#[derive(Debug, Clone)]
pub struct Invocation {
  node_name: NodeName,
}

impl Invocation {
  pub(crate) fn new(node_name: NodeName) -> Self {
    Self { node_name }
  }

  pub fn node_name(&self) -> &NodeName {
    &self.node_name
  }

  fn into_node_name(self) -> NodeName {
    self.node_name
  }
}

/// 扇出占位：声明一个在运行期由上游可迭代结果派生的动态子任务集。
/// 本身没有值；下游消费方收到有序的子任务结果列表。
#[derive(Debug, Clone)]
pub struct FanOut {
  node_name: NodeName,
}

impl FanOut {
  pub(crate) fn new(node_name: NodeName) -> Self {
    Self { node_name }
  }

  pub fn node_name(&self) -> &NodeName {
    &self.node_name
  }

  fn into_node_name(self) -> NodeName {
    self.node_name
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_dependencies_from_bindings() {
    let a = Invocation::new(NodeName::from("a:0"));
    let b = Invocation::new(NodeName::from("b:1"));
    let fo = FanOut::new(NodeName::from("fanout:2"));

    let args = TaskArgs::new()
      .arg(json!(1))
      .arg(&a)
      .arg(ArgValue::List(vec![ArgValue::from(&b), ArgValue::from(json!("x"))]))
      .kwarg("children", &fo)
      .kwarg("again", &a);

    let deps = args.dependencies();
    assert_eq!(deps, vec![NodeName::from("a:0"), NodeName::from("b:1"), NodeName::from("fanout:2")]);
  }
}
