//! 本地目录传输：把一个本地（或挂载的网络共享）目录当作远程根目录

use super::{Connector, RemoteEntry, Transport};
use crate::error::{DeployError, Result};
use crate::models::Credentials;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;

pub struct LocalTransport {
    base_path: PathBuf,
    name: String,
}

impl LocalTransport {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| DeployError::local_io(&base_path, e))?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

fn mtime_secs(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[async_trait]
impl Transport for LocalTransport {
    async fn ensure_directory(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| DeployError::from_io(&format!("mkdir {}", path), e))
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let full_path = self.resolve_path(remote_path);
        let local = local_path.to_path_buf();

        // 复制后保留源文件修改时间，便于下次 smart 比较
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let source_meta =
                std::fs::metadata(&local).map_err(|e| DeployError::local_io(&local, e))?;
            let bytes = std::fs::copy(&local, &full_path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound && !local.exists() {
                    DeployError::local_io(&local, e)
                } else {
                    DeployError::from_io(&format!("upload {}", full_path.display()), e)
                }
            })?;

            if let Ok(modified) = source_meta.modified() {
                if let Ok(file) = std::fs::OpenOptions::new().write(true).open(&full_path) {
                    let _ = file.set_modified(modified);
                }
            }

            Ok(bytes)
        })
        .await
        .map_err(|e| DeployError::Remote(format!("upload task failed: {}", e)))?
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let full_path = self.resolve_path(path);
        let mut reader = fs::read_dir(&full_path)
            .await
            .map_err(|e| DeployError::from_io(&format!("list {}", path), e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| DeployError::from_io(&format!("list {}", path), e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("跳过无法读取的条目 {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                mtime: mtime_secs(&metadata),
                is_dir: metadata.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::from_io(&format!("delete {}", path), e)),
        }
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        fs::remove_dir(self.resolve_path(path))
            .await
            .map_err(|e| DeployError::from_io(&format!("rmdir {}", path), e))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve_path(path))
            .await
            .map_err(|e| DeployError::from_io(&format!("read {}", path), e))
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        fs::write(self.resolve_path(path), data)
            .await
            .map_err(|e| DeployError::from_io(&format!("write {}", path), e))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 忽略凭据，始终连接到同一个本地目录
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn Transport>> {
        Ok(Box::new(LocalTransport::new(&self.root)?))
    }
}
