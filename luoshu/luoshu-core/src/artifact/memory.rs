use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::ArtifactError;
use crate::types::JsonValue;

use super::{ArtifactRef, ArtifactStore};

/// 内存制品存储。句柄到值的映射
#[derive(Default)]
pub struct MemoryArtifactStore {
  blobs: DashMap<String, JsonValue>,
}

impl MemoryArtifactStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.blobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blobs.is_empty()
  }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
  async fn put(&self, value: JsonValue) -> Result<ArtifactRef, ArtifactError> {
    let artifact_ref = ArtifactRef::generate();
    self.blobs.insert(artifact_ref.id().to_string(), value);
    Ok(artifact_ref)
  }

  async fn get(&self, artifact_ref: &ArtifactRef) -> Result<JsonValue, ArtifactError> {
    match self.blobs.get(artifact_ref.id()) {
      Some(entry) => Ok(entry.value().clone()),
      None => Err(ArtifactError::NotFound { id: artifact_ref.id().to_string() }),
    }
  }

  async fn delete(&self, artifact_ref: &ArtifactRef) -> Result<(), ArtifactError> {
    match self.blobs.remove(artifact_ref.id()) {
      Some(_) => Ok(()),
      None => Err(ArtifactError::NotFound { id: artifact_ref.id().to_string() }),
    }
  }

  async fn exists(&self, artifact_ref: &ArtifactRef) -> Result<bool, ArtifactError> {
    Ok(self.blobs.contains_key(artifact_ref.id()))
  }
}
