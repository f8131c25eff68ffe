use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{TaskError, TaskResult};
use crate::flow::TaskArgs;
use crate::runtime::Runtime;
use crate::setting::LuoshuSetting;
use crate::types::JsonValue;

use super::{TaskCallable, TaskInput, TaskRegistry};

/// 任务执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunMode {
  /// 在调度器的协作线程上直接 await
  Async,
  /// 派发到共享线程池
  Thread,
  /// 派发到工作进程（参数与返回值必须可序列化）
  Process,
}

/// 自定义缓存键函数：(任务名, 位置参数, 关键字参数) → 稳定字符串
pub type CacheKeyFn = Arc<dyn Fn(&str, &[JsonValue], &BTreeMap<String, JsonValue>) -> String + Send + Sync>;

pub(crate) struct TaskDefinitionInner {
  name: String,
  callable: TaskCallable,
  run_in: Option<RunMode>,
  retries: u32,
  retry_backoff: f64,
  retry_jitter: f64,
  timeout: Option<f64>,
  cache_ttl: Option<f64>,
  cache_key_fn: Option<CacheKeyFn>,
  persist: bool,
  priority: i32,
  tags: BTreeSet<String>,
}

/// 任务的不可变描述符：可调用体 + 执行策略。声明后不再变化，克隆廉价。
///
/// 构建时会注册进进程级 [TaskRegistry]（进程模式与按名查找依赖它）。
#[derive(Clone)]
pub struct TaskDefinition(Arc<TaskDefinitionInner>);

impl TaskDefinition {
  pub fn builder(name: impl Into<String>) -> TaskDefinitionBuilder {
    TaskDefinitionBuilder {
      name: name.into(),
      callable: None,
      run_in: None,
      retries: 0,
      retry_backoff: 0.0,
      retry_jitter: 0.0,
      timeout: None,
      cache_ttl: None,
      cache_key_fn: None,
      persist: false,
      priority: 0,
      tags: BTreeSet::new(),
    }
  }

  /// 任务名。缓存与指标的唯一键
  pub fn name(&self) -> &str {
    &self.0.name
  }

  pub fn callable(&self) -> &TaskCallable {
    &self.0.callable
  }

  pub fn run_in(&self) -> Option<RunMode> {
    self.0.run_in
  }

  /// 实际执行模式：显式声明 > 配置的 default_executor > 按可调用体类型推断
  pub fn effective_run_in(&self, setting: &LuoshuSetting) -> RunMode {
    self
      .0
      .run_in
      .or(setting.default_executor)
      .unwrap_or(if self.0.callable.is_async() { RunMode::Async } else { RunMode::Thread })
  }

  pub fn retries(&self) -> u32 {
    self.0.retries
  }

  pub fn retry_backoff(&self) -> f64 {
    self.0.retry_backoff
  }

  pub fn retry_jitter(&self) -> f64 {
    self.0.retry_jitter
  }

  pub fn timeout(&self) -> Option<f64> {
    self.0.timeout
  }

  pub fn cache_ttl(&self) -> Option<f64> {
    self.0.cache_ttl
  }

  pub fn persist(&self) -> bool {
    self.0.persist
  }

  pub fn priority(&self) -> i32 {
    self.0.priority
  }

  pub fn tags(&self) -> &BTreeSet<String> {
    &self.0.tags
  }

  /// 计算缓存键。未配置自定义函数时使用稳定的默认键：
  /// 任务名 + (args, kwargs) 规范化 JSON 的 SHA-256 摘要。
  ///
  /// 已知局限：默认键不包含任务体的代码指纹，TTL 内修改任务函数会复用旧缓存。
  pub fn cache_key(&self, args: &[JsonValue], kwargs: &BTreeMap<String, JsonValue>) -> String {
    if let Some(f) = &self.0.cache_key_fn {
      return f(&self.0.name, args, kwargs);
    }
    let payload = serde_json::to_string(&(args, kwargs)).unwrap_or_default();
    let digest = Sha256::digest(payload.as_bytes());
    format!("{}:{:x}", self.0.name, digest)
  }

  /// 在流之外直接执行任务：走与调度派发完全相同的执行管道（缓存、重试、
  /// 超时、持久化），使用全局 [Runtime] 与中性上下文。参数必须全部为字面值。
  pub async fn call(&self, args: TaskArgs) -> TaskResult {
    self.call_with_runtime(Runtime::global(), args).await
  }

  pub async fn call_with_runtime(&self, runtime: Runtime, args: TaskArgs) -> TaskResult {
    crate::execution::call_task(runtime, self.clone(), args).await
  }

  /// 以已解析输入调用可调用体（不经过执行管道）。进程工作端使用
  pub(crate) async fn invoke_callable(&self, input: TaskInput) -> Result<JsonValue, TaskError> {
    match &self.0.callable {
      TaskCallable::Async(f) => f(input).await,
      TaskCallable::Blocking(f) => f(input),
    }
  }
}

impl std::fmt::Debug for TaskDefinition {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskDefinition")
      .field("name", &self.0.name)
      .field("callable", &self.0.callable)
      .field("run_in", &self.0.run_in)
      .field("retries", &self.0.retries)
      .field("priority", &self.0.priority)
      .finish()
  }
}

/// [TaskDefinition] 的构建器
pub struct TaskDefinitionBuilder {
  name: String,
  callable: Option<TaskCallable>,
  run_in: Option<RunMode>,
  retries: u32,
  retry_backoff: f64,
  retry_jitter: f64,
  timeout: Option<f64>,
  cache_ttl: Option<f64>,
  cache_key_fn: Option<CacheKeyFn>,
  persist: bool,
  priority: i32,
  tags: BTreeSet<String>,
}

impl TaskDefinitionBuilder {
  /// 设置异步任务体
  pub fn handler<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(TaskInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, TaskError>> + Send + 'static,
  {
    self.callable = Some(TaskCallable::from_async(f));
    self
  }

  /// 设置阻塞任务体
  pub fn blocking_handler<F>(mut self, f: F) -> Self
  where
    F: Fn(TaskInput) -> Result<JsonValue, TaskError> + Send + Sync + 'static,
  {
    self.callable = Some(TaskCallable::from_blocking(f));
    self
  }

  pub fn with_run_in(mut self, run_in: RunMode) -> Self {
    self.run_in = Some(run_in);
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  /// 重试基础退避（秒）。第 k 次重试前睡 `backoff · 2^(k-1) + uniform[0, jitter)`
  pub fn with_retry_backoff(mut self, seconds: f64) -> Self {
    self.retry_backoff = seconds;
    self
  }

  pub fn with_retry_jitter(mut self, seconds: f64) -> Self {
    self.retry_jitter = seconds;
    self
  }

  pub fn with_timeout(mut self, seconds: f64) -> Self {
    self.timeout = Some(seconds);
    self
  }

  pub fn with_cache_ttl(mut self, seconds: f64) -> Self {
    self.cache_ttl = Some(seconds);
    self
  }

  pub fn with_cache_key_fn(mut self, f: CacheKeyFn) -> Self {
    self.cache_key_fn = Some(f);
    self
  }

  /// 结果写入制品存储，任务值替换为 ArtifactRef
  pub fn with_persist(mut self, persist: bool) -> Self {
    self.persist = persist;
    self
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.insert(tag.into());
    self
  }

  pub fn build(self) -> TaskDefinition {
    let callable = self.callable.expect("Task callable is required: call handler() or blocking_handler()");
    let def = TaskDefinition(Arc::new(TaskDefinitionInner {
      name: self.name,
      callable,
      run_in: self.run_in,
      retries: self.retries,
      retry_backoff: self.retry_backoff,
      retry_jitter: self.retry_jitter,
      timeout: self.timeout,
      cache_ttl: self.cache_ttl,
      cache_key_fn: self.cache_key_fn,
      persist: self.persist,
      priority: self.priority,
      tags: self.tags,
    }));
    TaskRegistry::global().register(def.clone());
    def
  }
}
