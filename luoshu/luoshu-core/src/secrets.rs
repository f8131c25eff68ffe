//! 机密提供者：协作方接口，核心只读消费

/// 可替换的机密提供者
pub trait SecretsProvider: Send + Sync {
  /// 按名称读取机密。不存在返回 None
  fn get(&self, name: &str) -> Option<String>;
}

/// 默认实现：从环境变量读取
pub struct EnvSecretsProvider;

impl SecretsProvider for EnvSecretsProvider {
  fn get(&self, name: &str) -> Option<String> {
    std::env::var(name).ok()
  }
}
