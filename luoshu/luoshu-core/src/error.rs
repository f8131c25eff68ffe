use std::sync::Arc;

use thiserror::Error;

use crate::types::NodeName;

/// 任务体（以及中间件）返回的错误。
///
/// `kind` 区分普通失败、超时与取消：超时与取消由执行管道在任务体外侧注入，
/// 中间件可以包装消息但不得吞掉失败。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaskError {
  kind: TaskErrorKind,
  message: String,
  #[source]
  source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
  /// 任务体执行失败，可按策略重试
  Failed,
  /// 单次尝试超时，可按策略重试
  Timeout,
  /// 协作式取消，不重试
  Cancelled,
  /// 不可恢复失败（如进程模式序列化失败），不重试
  Fatal,
}

impl TaskError {
  pub fn msg(message: impl Into<String>) -> Self {
    Self { kind: TaskErrorKind::Failed, message: message.into(), source: None }
  }

  pub fn with_source(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self { kind: TaskErrorKind::Failed, message: message.into(), source: Some(Box::new(source)) }
  }

  pub(crate) fn timeout() -> Self {
    Self { kind: TaskErrorKind::Timeout, message: "任务执行超时".to_string(), source: None }
  }

  pub(crate) fn cancelled() -> Self {
    Self { kind: TaskErrorKind::Cancelled, message: "任务已取消".to_string(), source: None }
  }

  pub(crate) fn fatal(message: impl Into<String>) -> Self {
    Self { kind: TaskErrorKind::Fatal, message: message.into(), source: None }
  }

  pub fn kind(&self) -> TaskErrorKind {
    self.kind
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl From<String> for TaskError {
  fn from(value: String) -> Self {
    TaskError::msg(value)
  }
}

impl From<&str> for TaskError {
  fn from(value: &str) -> Self {
    TaskError::msg(value)
  }
}

impl From<serde_json::Error> for TaskError {
  fn from(value: serde_json::Error) -> Self {
    TaskError::with_source("JSON 处理失败", value)
  }
}

impl From<std::io::Error> for TaskError {
  fn from(value: std::io::Error) -> Self {
    TaskError::with_source("IO 错误", value)
  }
}

impl From<ArtifactError> for TaskError {
  fn from(value: ArtifactError) -> Self {
    TaskError::with_source("制品存储错误", value)
  }
}

/// DAG 构建失败
#[derive(Debug, Error)]
pub enum FlowBuildError {
  #[error("工作流存在循环依赖: {}", format_cycle(.cycle))]
  WorkflowHasCycles { cycle: Vec<NodeName> },

  #[error("引用了未知的占位节点: {node}")]
  UnknownPlaceholder { node: NodeName },

  #[error("扇出声明无效: {node}, {message}")]
  InvalidFanOut { node: NodeName, message: String },

  #[error("工作流结构无效: {0}")]
  InvalidStructure(String),
}

fn format_cycle(cycle: &[NodeName]) -> String {
  cycle.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(" -> ")
}

/// 任务执行失败。记录任务名与节点 ID，并链上原始原因
#[derive(Debug, Error)]
#[error("任务执行失败: {task}|{node}")]
pub struct TaskExecutionError {
  pub task: String,
  pub node: NodeName,
  #[source]
  pub source: TaskError,
}

/// 任务单次尝试超时
#[derive(Debug, Error)]
#[error("任务执行超时: {task}|{node}, timeout_seconds: {timeout}")]
pub struct TaskTimeoutError {
  pub task: String,
  pub node: NodeName,
  pub timeout: f64,
}

/// 最后一次尝试仍失败，重试预算耗尽
#[derive(Debug, Error)]
#[error("重试次数耗尽: {task}|{node}, attempts: {attempts}")]
pub struct RetryExhaustedError {
  pub task: String,
  pub node: NodeName,
  pub attempts: u32,
  #[source]
  pub last: Box<TaskFailure>,
}

/// 动态扇出展开失败
#[derive(Debug, Error)]
pub enum DynamicExpansionError {
  #[error("扇出源结果不是有限数组: {node}")]
  SourceNotIterable { node: NodeName },

  #[error("动态任务数量超过上限: {node}, limit: {limit}, actual: {actual}")]
  GuardrailExceeded { node: NodeName, limit: usize, actual: usize },
}

/// 结果缓存后端错误。不自动重试
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("缓存 IO 错误: {0}")]
  Io(#[from] std::io::Error),

  #[error("缓存序列化错误: {0}")]
  Serialization(String),
}

/// 制品存储后端错误。不自动重试
#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("制品不存在: {id}")]
  NotFound { id: String },

  #[error("制品 IO 错误: {0}")]
  Io(#[from] std::io::Error),

  #[error("制品序列化错误: {0}")]
  Serialization(String),
}

/// 单个节点的终态失败。聚合错误与失败哨兵均引用它
#[derive(Debug, Error)]
pub enum TaskFailure {
  #[error(transparent)]
  Execution(#[from] TaskExecutionError),

  #[error(transparent)]
  Timeout(#[from] TaskTimeoutError),

  #[error(transparent)]
  RetryExhausted(#[from] RetryExhaustedError),

  #[error(transparent)]
  Expansion(#[from] DynamicExpansionError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error("任务已取消: {node}")]
  Cancelled { node: NodeName },
}

impl TaskFailure {
  /// 失败发生的节点
  pub fn node(&self) -> Option<&NodeName> {
    match self {
      TaskFailure::Execution(e) => Some(&e.node),
      TaskFailure::Timeout(e) => Some(&e.node),
      TaskFailure::RetryExhausted(e) => Some(&e.node),
      TaskFailure::Expansion(DynamicExpansionError::SourceNotIterable { node }) => Some(node),
      TaskFailure::Expansion(DynamicExpansionError::GuardrailExceeded { node, .. }) => Some(node),
      TaskFailure::Cancelled { node } => Some(node),
      TaskFailure::Cache(_) | TaskFailure::Artifact(_) => None,
    }
  }

  /// 失败的任务名
  pub fn task(&self) -> Option<&str> {
    match self {
      TaskFailure::Execution(e) => Some(&e.task),
      TaskFailure::Timeout(e) => Some(&e.task),
      TaskFailure::RetryExhausted(e) => Some(&e.task),
      _ => None,
    }
  }
}

/// 一次任务派发的结果。失败以 `Arc` 共享：同一失败同时被
/// 失败哨兵、聚合错误与单飞跟随者引用
pub type TaskResult = Result<crate::types::JsonValue, Arc<TaskFailure>>;

/// `continue`/`aggregate` 策略运行结束时的聚合错误，按声明顺序保留各终态失败
#[derive(Debug, Error)]
#[error("运行结束时存在 {} 个任务失败", .failures.len())]
pub struct AggregateTaskError {
  pub failures: Vec<Arc<TaskFailure>>,
}

/// `Flow::run` 的错误面
#[derive(Debug, Error)]
pub enum FlowRunError {
  #[error(transparent)]
  Build(#[from] FlowBuildError),

  /// fail_fast 策略下首个终态失败（在途任务排空之后）
  #[error("{0}")]
  Task(Arc<TaskFailure>),

  #[error(transparent)]
  Aggregate(#[from] AggregateTaskError),

  #[error("运行已取消")]
  Cancelled,

  /// 调度器不变量被破坏。致命，不参与聚合
  #[error("调度器内部错误: {0}")]
  Internal(String),
}

impl FlowRunError {
  /// fail_fast 表面错误的便捷判别
  pub fn as_task_failure(&self) -> Option<&TaskFailure> {
    match self {
      FlowRunError::Task(f) => Some(f),
      _ => None,
    }
  }
}

/// 配置加载失败
#[derive(Debug, Error)]
pub enum SettingError {
  #[error("配置加载失败: {0}")]
  Load(#[from] config::ConfigError),
}
