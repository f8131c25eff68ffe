use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
use crate::setting::ArtifactSerializerKind;
use crate::types::JsonValue;

/// 制品的字节编码。
///
/// bincode 不是自描述格式，无法直接反序列化 `serde_json::Value`（其
/// Deserialize 依赖 `deserialize_any`），因此经由具体的 [CanonicalValue]
/// 镜像类型编解码。
#[derive(Debug, Clone, Copy)]
pub enum ArtifactSerializer {
  Json,
  Bincode,
}

impl From<ArtifactSerializerKind> for ArtifactSerializer {
  fn from(kind: ArtifactSerializerKind) -> Self {
    match kind {
      ArtifactSerializerKind::Json => ArtifactSerializer::Json,
      ArtifactSerializerKind::Bincode => ArtifactSerializer::Bincode,
    }
  }
}

impl ArtifactSerializer {
  pub fn encode(&self, value: &JsonValue) -> Result<Vec<u8>, ArtifactError> {
    match self {
      ArtifactSerializer::Json => serde_json::to_vec(value).map_err(|e| ArtifactError::Serialization(e.to_string())),
      ArtifactSerializer::Bincode => {
        let canonical = CanonicalValue::from(value.clone());
        bincode::serialize(&canonical).map_err(|e| ArtifactError::Serialization(e.to_string()))
      }
    }
  }

  pub fn decode(&self, bytes: &[u8]) -> Result<JsonValue, ArtifactError> {
    match self {
      ArtifactSerializer::Json => {
        serde_json::from_slice(bytes).map_err(|e| ArtifactError::Serialization(e.to_string()))
      }
      ArtifactSerializer::Bincode => {
        let canonical: CanonicalValue =
          bincode::deserialize(bytes).map_err(|e| ArtifactError::Serialization(e.to_string()))?;
        Ok(canonical.into())
      }
    }
  }

  /// 文件扩展名（文件系统后端使用）
  pub fn extension(&self) -> &'static str {
    match self {
      ArtifactSerializer::Json => "json",
      ArtifactSerializer::Bincode => "bin",
    }
  }
}

/// JSON 值的具体镜像。带标签，可在非自描述格式中往返
#[derive(Debug, Clone, Serialize, Deserialize)]
enum CanonicalValue {
  Null,
  Bool(bool),
  Int(i64),
  UInt(u64),
  Float(f64),
  Str(String),
  Array(Vec<CanonicalValue>),
  Object(Vec<(String, CanonicalValue)>),
}

impl From<JsonValue> for CanonicalValue {
  fn from(value: JsonValue) -> Self {
    match value {
      JsonValue::Null => CanonicalValue::Null,
      JsonValue::Bool(b) => CanonicalValue::Bool(b),
      JsonValue::Number(n) => {
        if let Some(i) = n.as_i64() {
          CanonicalValue::Int(i)
        } else if let Some(u) = n.as_u64() {
          CanonicalValue::UInt(u)
        } else {
          CanonicalValue::Float(n.as_f64().unwrap_or(f64::NAN))
        }
      }
      JsonValue::String(s) => CanonicalValue::Str(s),
      JsonValue::Array(items) => CanonicalValue::Array(items.into_iter().map(CanonicalValue::from).collect()),
      JsonValue::Object(map) => CanonicalValue::Object(map.into_iter().map(|(k, v)| (k, CanonicalValue::from(v))).collect()),
    }
  }
}

impl From<CanonicalValue> for JsonValue {
  fn from(value: CanonicalValue) -> Self {
    match value {
      CanonicalValue::Null => JsonValue::Null,
      CanonicalValue::Bool(b) => JsonValue::Bool(b),
      CanonicalValue::Int(i) => JsonValue::from(i),
      CanonicalValue::UInt(u) => JsonValue::from(u),
      CanonicalValue::Float(f) => serde_json::Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
      CanonicalValue::Str(s) => JsonValue::String(s),
      CanonicalValue::Array(items) => JsonValue::Array(items.into_iter().map(JsonValue::from).collect()),
      CanonicalValue::Object(pairs) => {
        JsonValue::Object(pairs.into_iter().map(|(k, v)| (k, JsonValue::from(v))).collect())
      }
    }
  }
}
