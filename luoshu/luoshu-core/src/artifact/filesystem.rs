use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ArtifactError;
use crate::types::JsonValue;

use super::{ArtifactRef, ArtifactSerializer, ArtifactStore};

/// 文件系统制品存储。每个句柄一个 blob 文件。
///
/// `put` 之后不在内存中保留副本，值只存在于磁盘上。
pub struct FilesystemArtifactStore {
  root: PathBuf,
  serializer: ArtifactSerializer,
}

impl FilesystemArtifactStore {
  pub fn new(root: impl Into<PathBuf>, serializer: ArtifactSerializer) -> Self {
    Self { root: root.into(), serializer }
  }

  fn blob_path(&self, artifact_ref: &ArtifactRef) -> PathBuf {
    self.root.join(format!("{}.{}", artifact_ref.id(), self.serializer.extension()))
  }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
  async fn put(&self, value: JsonValue) -> Result<ArtifactRef, ArtifactError> {
    tokio::fs::create_dir_all(&self.root).await?;

    let artifact_ref = ArtifactRef::generate();
    let bytes = self.serializer.encode(&value)?;

    let path = self.blob_path(&artifact_ref);
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(artifact_ref)
  }

  async fn get(&self, artifact_ref: &ArtifactRef) -> Result<JsonValue, ArtifactError> {
    let path = self.blob_path(artifact_ref);
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(ArtifactError::NotFound { id: artifact_ref.id().to_string() });
      }
      Err(e) => return Err(ArtifactError::Io(e)),
    };
    self.serializer.decode(&bytes)
  }

  async fn delete(&self, artifact_ref: &ArtifactRef) -> Result<(), ArtifactError> {
    let path = self.blob_path(artifact_ref);
    match tokio::fs::remove_file(&path).await {
      Ok(_) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(ArtifactError::NotFound { id: artifact_ref.id().to_string() })
      }
      Err(e) => Err(ArtifactError::Io(e)),
    }
  }

  async fn exists(&self, artifact_ref: &ArtifactRef) -> Result<bool, ArtifactError> {
    Ok(tokio::fs::try_exists(self.blob_path(artifact_ref)).await?)
  }
}
