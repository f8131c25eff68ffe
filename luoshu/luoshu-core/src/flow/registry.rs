use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use super::Flow;

/// 链接期流注册项。任意源文件均可通过 `inventory::submit!` 登记流，
/// 无需集中清单；CLI 按名寻址注册表中的流。
pub struct FlowProvider {
  pub name: &'static str,
  pub build: fn() -> Flow,
}

inventory::collect!(FlowProvider);

type FlowFactory = Arc<dyn Fn() -> Flow + Send + Sync>;

/// 进程级流注册表。启动时收集 `inventory` 登记项，也可在运行期显式注册
#[derive(Default)]
pub struct FlowRegistry {
  flows: DashMap<String, FlowFactory>,
}

static GLOBAL_FLOW_REGISTRY: OnceLock<FlowRegistry> = OnceLock::new();

impl FlowRegistry {
  pub fn global() -> &'static FlowRegistry {
    GLOBAL_FLOW_REGISTRY.get_or_init(|| {
      let registry = FlowRegistry::default();
      for provider in inventory::iter::<FlowProvider> {
        registry.register(provider.name, provider.build);
      }
      registry
    })
  }

  pub fn register<F>(&self, name: impl Into<String>, factory: F)
  where
    F: Fn() -> Flow + Send + Sync + 'static,
  {
    self.flows.insert(name.into(), Arc::new(factory));
  }

  /// 按名构建流。未注册返回 None
  pub fn get(&self, name: &str) -> Option<Flow> {
    let factory = self.flows.get(name)?.value().clone();
    Some(factory())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.flows.contains_key(name)
  }

  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.flows.iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use crate::flow::TaskArgs;
  use crate::task::TaskDefinition;

  use super::*;

  #[test]
  fn test_register_and_build() {
    let registry = FlowRegistry::default();
    registry.register("probe", || {
      Flow::new("probe", |b| {
        let one = TaskDefinition::builder("one").handler(|_input| async { Ok(json!(1)) }).build();
        Ok(b.invoke(&one, TaskArgs::new()).into())
      })
    });

    assert!(registry.contains("probe"));
    assert_eq!(registry.names(), vec!["probe".to_string()]);
    let flow = registry.get("probe").expect("registered flow must build");
    assert_eq!(flow.name(), "probe");
    assert!(registry.get("missing").is_none());
  }
}
