use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::types::JsonValue;

use super::{CachedEntry, ResultCache};

/// 文件系统结果缓存。每个键一个文件，负载为序列化的（时间戳, 值）。
///
/// 写入是原子的：先写临时文件再重命名。读取容忍缺失或损坏的文件，返回 None。
pub struct FilesystemResultCache {
  root: PathBuf,
}

impl FilesystemResultCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn entry_path(&self, key: &str) -> PathBuf {
    // 键可能含任意字符，文件名使用键的 SHA-256 十六进制摘要
    let digest = Sha256::digest(key.as_bytes());
    self.root.join(format!("{:x}.json", digest))
  }

  async fn ensure_root(&self) -> Result<(), CacheError> {
    tokio::fs::create_dir_all(&self.root).await?;
    Ok(())
  }
}

#[async_trait]
impl ResultCache for FilesystemResultCache {
  async fn get(&self, key: &str, ttl: f64) -> Result<Option<JsonValue>, CacheError> {
    let path = self.entry_path(key);
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(_) => return Ok(None),
    };
    let entry: CachedEntry = match serde_json::from_slice(&bytes) {
      Ok(entry) => entry,
      Err(e) => {
        debug!("Discarding corrupt cache entry {}: {}", path.display(), e);
        return Ok(None);
      }
    };
    if entry.is_fresh(ttl) { Ok(Some(entry.value)) } else { Ok(None) }
  }

  async fn set(&self, key: &str, value: JsonValue) -> Result<(), CacheError> {
    self.ensure_root().await?;
    let entry = CachedEntry::now(value);
    let bytes = serde_json::to_vec(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;

    let path = self.entry_path(key);
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
  }

  async fn clear(&self) -> Result<(), CacheError> {
    if !Path::new(&self.root).exists() {
      return Ok(());
    }
    let mut dir = tokio::fs::read_dir(&self.root).await?;
    while let Some(entry) = dir.next_entry().await? {
      if entry.file_type().await?.is_file() {
        tokio::fs::remove_file(entry.path()).await?;
      }
    }
    Ok(())
  }
}
