use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::SettingError;
use crate::task::RunMode;

/// 引擎配置。
///
/// 加载顺序：内置默认值 → 可选的 `luoshu.toml`（或 `LUOSHU_CONFIG_FILE` 指定的文件）
/// → `LUOSHU_` 前缀的环境变量（如 `LUOSHU_RESULT_CACHE=filesystem`）。
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LuoshuSetting {
  /// 未显式指定 `run_in` 的任务使用的默认执行模式
  pub default_executor: Option<RunMode>,

  /// 日志级别。仅由日志协作方（CLI 初始化）消费
  pub log_level: String,

  /// 单次运行中动态扇出子任务总数的护栏
  pub max_dynamic_tasks: usize,

  /// 制品存储后端
  pub artifact_store: StoreBackend,

  /// 文件系统制品存储的根目录
  pub artifact_store_path: PathBuf,

  /// 制品序列化格式
  pub artifact_serializer: ArtifactSerializerKind,

  /// 结果缓存后端
  pub result_cache: StoreBackend,

  /// 文件系统结果缓存的根目录
  pub result_cache_path: PathBuf,

  /// 内存结果缓存的 LRU 上限。None 表示不限制
  pub result_cache_max_entries: Option<usize>,

  /// 进程模式工作进程数上限
  pub process_pool_max_workers: usize,
}

impl Default for LuoshuSetting {
  fn default() -> Self {
    Self {
      default_executor: None,
      log_level: "info".to_string(),
      max_dynamic_tasks: 2048,
      artifact_store: StoreBackend::Memory,
      artifact_store_path: PathBuf::from(".luoshu/artifacts"),
      artifact_serializer: ArtifactSerializerKind::Json,
      result_cache: StoreBackend::Memory,
      result_cache_path: PathBuf::from(".luoshu/result-cache"),
      result_cache_max_entries: None,
      process_pool_max_workers: num_cpus::get(),
    }
  }
}

impl LuoshuSetting {
  /// 从配置文件与环境变量加载配置
  pub fn load() -> Result<Self, SettingError> {
    let mut b = Config::builder();

    let default_file = Path::new("luoshu.toml");
    if default_file.exists() {
      b = b.add_source(File::from(default_file));
    }
    if let Ok(file) = std::env::var("LUOSHU_CONFIG_FILE") {
      let path = Path::new(&file);
      if path.exists() {
        b = b.add_source(File::from(path));
      }
    }

    b = b.add_source(Environment::with_prefix("LUOSHU"));

    let c = b.build()?;
    let setting = c.try_deserialize()?;
    Ok(setting)
  }
}

/// 存储后端类型（结果缓存与制品存储共用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StoreBackend {
  #[default]
  Memory,
  Filesystem,
}

/// 制品序列化格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactSerializerKind {
  /// 人类可读，所有流值均为 JSON 兼容
  #[default]
  Json,
  /// 紧凑二进制编码
  Bincode,
}
