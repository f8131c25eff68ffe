use std::sync::{Arc, OnceLock, RwLock};

use arc_swap::ArcSwap;
use log::warn;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::artifact::{ArtifactStore, FilesystemArtifactStore, MemoryArtifactStore};
use crate::cache::{FilesystemResultCache, MemoryResultCache, ResultCache, SingleFlight};
use crate::error::{SettingError, TaskError};
use crate::execution::Middleware;
use crate::observability::{EventBus, EventKind, EventPayload, InMemoryMetrics, LogTracer, MetricsProvider, Tracer};
use crate::secrets::{EnvSecretsProvider, SecretsProvider};
use crate::setting::{LuoshuSetting, StoreBackend};

/// 运行时：把原本全局可变的子系统（配置、结果缓存、制品存储、单飞表、
/// 事件总线、指标、追踪、机密、中间件、进程池）集中为一个显式值。
///
/// 常规使用走进程级默认实例 [Runtime::global]；测试与可重入场景通过
/// [Runtime::builder] 构建独立实例。克隆廉价。
#[derive(Clone)]
pub struct Runtime(Arc<RuntimeInner>);

struct RuntimeInner {
  setting: ArcSwap<LuoshuSetting>,
  result_cache: Arc<dyn ResultCache>,
  artifact_store: Arc<dyn ArtifactStore>,
  single_flight: SingleFlight,
  event_bus: EventBus,
  metrics: RwLock<Arc<dyn MetricsProvider>>,
  tracer: RwLock<Arc<dyn Tracer>>,
  secrets: RwLock<Arc<dyn SecretsProvider>>,
  /// 注册顺序即洋葱层顺序（最外层在前）。运行中可变更，
  /// 只影响变更之后开始的派发
  middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
  process_slots: Arc<Semaphore>,
}

static GLOBAL_RUNTIME: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
  pub fn builder() -> RuntimeBuilder {
    RuntimeBuilder::default()
  }

  /// 进程级默认实例。首次访问时从配置源加载；加载失败回退内置默认并告警
  pub fn global() -> Runtime {
    GLOBAL_RUNTIME
      .get_or_init(|| {
        let setting = LuoshuSetting::load().unwrap_or_else(|e| {
          warn!("Failed to load setting, falling back to defaults: {}", e);
          LuoshuSetting::default()
        });
        Runtime::builder().with_setting(setting).build()
      })
      .clone()
  }

  /// 当前配置快照
  pub fn setting(&self) -> Arc<LuoshuSetting> {
    self.0.setting.load_full()
  }

  /// 重新加载配置并替换快照（清除记忆化的配置）。
  /// 存储后端在运行时构建时选定，重载不重建后端。
  pub fn reload_setting(&self) -> Result<(), SettingError> {
    let setting = LuoshuSetting::load()?;
    self.0.setting.store(Arc::new(setting));
    Ok(())
  }

  pub fn result_cache(&self) -> Arc<dyn ResultCache> {
    self.0.result_cache.clone()
  }

  pub fn artifact_store(&self) -> Arc<dyn ArtifactStore> {
    self.0.artifact_store.clone()
  }

  pub(crate) fn single_flight(&self) -> &SingleFlight {
    &self.0.single_flight
  }

  /// 订阅事件。处理函数错误被吞掉，绝不中断核心执行
  pub fn subscribe<F>(&self, kind: EventKind, handler: F)
  where
    F: Fn(&EventPayload) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
  {
    self.0.event_bus.subscribe(kind, handler);
  }

  pub fn emit(&self, kind: EventKind, payload: EventPayload) {
    self.0.event_bus.emit(kind, payload);
  }

  pub fn metrics(&self) -> Arc<dyn MetricsProvider> {
    self.0.metrics.read().expect("metrics lock poisoned").clone()
  }

  pub fn set_metrics_provider(&self, provider: Arc<dyn MetricsProvider>) {
    *self.0.metrics.write().expect("metrics lock poisoned") = provider;
  }

  pub fn tracer(&self) -> Arc<dyn Tracer> {
    self.0.tracer.read().expect("tracer lock poisoned").clone()
  }

  pub fn set_tracer(&self, tracer: Arc<dyn Tracer>) {
    *self.0.tracer.write().expect("tracer lock poisoned") = tracer;
  }

  pub fn secrets(&self) -> Arc<dyn SecretsProvider> {
    self.0.secrets.read().expect("secrets lock poisoned").clone()
  }

  pub fn set_secrets_provider(&self, provider: Arc<dyn SecretsProvider>) {
    *self.0.secrets.write().expect("secrets lock poisoned") = provider;
  }

  /// 注册中间件（追加为最内层新增之前的最后一层，即按注册顺序组合）
  pub fn register_middleware(&self, middleware: Arc<dyn Middleware>) {
    self.0.middlewares.write().expect("middleware lock poisoned").push(middleware);
  }

  /// 当前中间件链快照。派发开始时取用，之后的注册不影响在途派发
  pub(crate) fn middleware_chain(&self) -> Vec<Arc<dyn Middleware>> {
    self.0.middlewares.read().expect("middleware lock poisoned").clone()
  }

  pub(crate) async fn acquire_process_slot(&self) -> Result<OwnedSemaphorePermit, TaskError> {
    self.0.process_slots.clone().acquire_owned().await.map_err(|_| TaskError::msg("进程池已关闭"))
  }
}

impl std::fmt::Debug for Runtime {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Runtime").field("setting", &self.0.setting.load()).finish()
  }
}

/// [Runtime] 的构建器。未指定的子系统按配置构建
#[derive(Default)]
pub struct RuntimeBuilder {
  setting: Option<LuoshuSetting>,
  result_cache: Option<Arc<dyn ResultCache>>,
  artifact_store: Option<Arc<dyn ArtifactStore>>,
  metrics: Option<Arc<dyn MetricsProvider>>,
  tracer: Option<Arc<dyn Tracer>>,
  secrets: Option<Arc<dyn SecretsProvider>>,
}

impl RuntimeBuilder {
  pub fn with_setting(mut self, setting: LuoshuSetting) -> Self {
    self.setting = Some(setting);
    self
  }

  pub fn with_result_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
    self.result_cache = Some(cache);
    self
  }

  pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
    self.artifact_store = Some(store);
    self
  }

  pub fn with_metrics(mut self, metrics: Arc<dyn MetricsProvider>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
    self.tracer = Some(tracer);
    self
  }

  pub fn with_secrets(mut self, secrets: Arc<dyn SecretsProvider>) -> Self {
    self.secrets = Some(secrets);
    self
  }

  pub fn build(self) -> Runtime {
    let setting = self.setting.unwrap_or_default();

    let result_cache = self.result_cache.unwrap_or_else(|| match setting.result_cache {
      StoreBackend::Memory => Arc::new(MemoryResultCache::new(setting.result_cache_max_entries)),
      StoreBackend::Filesystem => Arc::new(FilesystemResultCache::new(setting.result_cache_path.clone())),
    });
    let artifact_store = self.artifact_store.unwrap_or_else(|| match setting.artifact_store {
      StoreBackend::Memory => Arc::new(MemoryArtifactStore::new()),
      StoreBackend::Filesystem => {
        Arc::new(FilesystemArtifactStore::new(setting.artifact_store_path.clone(), setting.artifact_serializer.into()))
      }
    });

    let metrics = self.metrics.unwrap_or_else(|| Arc::new(InMemoryMetrics::new()));
    let tracer = self.tracer.unwrap_or_else(|| Arc::new(LogTracer));
    let secrets = self.secrets.unwrap_or_else(|| Arc::new(EnvSecretsProvider));
    let process_slots = Arc::new(Semaphore::new(setting.process_pool_max_workers.max(1)));

    Runtime(Arc::new(RuntimeInner {
      setting: ArcSwap::from_pointee(setting),
      result_cache,
      artifact_store,
      single_flight: SingleFlight::new(),
      event_bus: EventBus::new(),
      metrics: RwLock::new(metrics),
      tracer: RwLock::new(tracer),
      secrets: RwLock::new(secrets),
      middlewares: RwLock::new(Vec::new()),
      process_slots,
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builder_defaults() {
    let runtime = Runtime::builder().build();
    assert_eq!(runtime.setting().max_dynamic_tasks, 2048);
    assert!(runtime.middleware_chain().is_empty());
  }

  #[test]
  fn test_swappable_providers() {
    let runtime = Runtime::builder().build();

    let metrics = Arc::new(InMemoryMetrics::new());
    runtime.set_metrics_provider(metrics.clone());
    runtime.metrics().increment_counter(crate::observability::TASKS_SUCCEEDED, 1);
    assert_eq!(metrics.counter(crate::observability::TASKS_SUCCEEDED), 1);
  }

  #[test]
  fn test_global_is_shared() {
    let a = Runtime::global();
    let b = Runtime::global();
    assert!(Arc::ptr_eq(&a.0, &b.0));
  }
}
