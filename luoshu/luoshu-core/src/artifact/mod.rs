//! 制品存储：大结果的句柄式 blob 存储。
//!
//! `persist` 任务的返回值写入制品存储，任务值被替换为 [ArtifactRef]。
//! 下游任务收到的是引用本身（不自动解引用），按需通过存储取回。

mod filesystem;
mod memory;
mod serializer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use filesystem::FilesystemArtifactStore;
pub use memory::MemoryArtifactStore;
pub use serializer::ArtifactSerializer;

use crate::error::ArtifactError;
use crate::types::JsonValue;

const REF_KEY: &str = "$artifact";

/// 标识一个已存储 blob 的不透明句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
  id: String,
}

impl ArtifactRef {
  pub(crate) fn generate() -> Self {
    Self { id: uuid::Uuid::now_v7().to_string() }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// 在流值中的表示：`{"$artifact": "<id>"}`
  pub fn to_value(&self) -> JsonValue {
    serde_json::json!({ REF_KEY: self.id })
  }

  /// 从流值解析引用。非引用值返回 None
  pub fn from_value(value: &JsonValue) -> Option<Self> {
    let id = value.as_object()?.get(REF_KEY)?.as_str()?;
    Some(Self { id: id.to_string() })
  }
}

/// 制品存储抽象。实现必须线程安全
#[async_trait]
pub trait ArtifactStore: Send + Sync {
  /// 存储值并返回引用
  async fn put(&self, value: JsonValue) -> Result<ArtifactRef, ArtifactError>;

  /// 按引用取回值
  async fn get(&self, artifact_ref: &ArtifactRef) -> Result<JsonValue, ArtifactError>;

  /// 删除引用指向的 blob
  async fn delete(&self, artifact_ref: &ArtifactRef) -> Result<(), ArtifactError>;

  /// 检查引用是否存在
  async fn exists(&self, artifact_ref: &ArtifactRef) -> Result<bool, ArtifactError>;
}
