use std::sync::OnceLock;

use dashmap::DashMap;
use log::debug;

use super::TaskDefinition;

/// 进程级任务注册表。
///
/// [TaskDefinition](super::TaskDefinition) 构建时自动注册；进程模式的
/// 工作端与运行期按名调用依赖它解析任务。同名重复构建时后者覆盖前者。
#[derive(Default)]
pub struct TaskRegistry {
  tasks: DashMap<String, TaskDefinition>,
}

static GLOBAL_TASK_REGISTRY: OnceLock<TaskRegistry> = OnceLock::new();

impl TaskRegistry {
  pub fn global() -> &'static TaskRegistry {
    GLOBAL_TASK_REGISTRY.get_or_init(TaskRegistry::default)
  }

  pub fn register(&self, task: TaskDefinition) {
    let name = task.name().to_string();
    if self.tasks.insert(name.clone(), task).is_some() {
      debug!("Task definition replaced in registry: {}", name);
    }
  }

  pub fn get(&self, name: &str) -> Option<TaskDefinition> {
    self.tasks.get(name).map(|entry| entry.value().clone())
  }

  pub fn names(&self) -> Vec<String> {
    self.tasks.iter().map(|entry| entry.key().clone()).collect()
  }
}
