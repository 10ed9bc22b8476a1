pub mod ftp;
pub mod local;
pub mod retry;
pub mod sftp;

use crate::config::EngineConfig;
use crate::error::{DeployError, Result};
use crate::models::{Credentials, Protocol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use ftp::FtpTransport;
pub use local::{LocalConnector, LocalTransport};
pub use retry::{retry_transient, RetryPolicy};
pub use sftp::SftpTransport;

/// 目录列表中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    /// 修改时间（Unix 秒）
    pub mtime: f64,
    pub is_dir: bool,
}

/// 远程传输抽象（一次部署只打开一个会话，所有操作顺序执行）
#[async_trait]
pub trait Transport: Send + Sync {
    /// 确保目录存在（幂等，逐级创建）
    async fn ensure_directory(&self, path: &str) -> Result<()>;

    /// 上传本地文件并覆盖远程文件，返回写入的字节数
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64>;

    /// 列出目录的直接子项；目录不存在时返回 `NotFound`
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// 删除文件
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// 删除空目录
    async fn remove_directory(&self, path: &str) -> Result<()>;

    /// 读取整个远程文件
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个远程文件（父目录需已存在）
    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 服务器端复制整个目录树
    async fn copy_tree(&self, from: &str, _to: &str) -> Result<()> {
        Err(DeployError::Unsupported(format!(
            "server-side copy of {} on {}",
            from,
            self.name()
        )))
    }

    /// 重建会话（瞬时错误重试前调用）
    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }

    /// 关闭会话
    async fn close(&self) -> Result<()>;

    /// 传输名称（用于日志）
    fn name(&self) -> &str;
}

/// 会话工厂
#[async_trait]
pub trait Connector: Send + Sync {
    /// 建立会话：凭据错误返回 `Authentication`，主机不可达返回 `Connection`
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Transport>>;
}

/// 按协议创建 FTP / SFTP 会话
#[derive(Debug, Clone, Default)]
pub struct ProtocolConnector {
    config: EngineConfig,
}

impl ProtocolConnector {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for ProtocolConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Transport>> {
        tracing::info!(
            "连接 {}://{}:{}",
            credentials.protocol,
            credentials.host,
            credentials.effective_port()
        );

        match credentials.protocol {
            Protocol::Ftp => Ok(Box::new(FtpTransport::connect(credentials, &self.config).await?)),
            Protocol::Sftp => Ok(Box::new(SftpTransport::connect(credentials, &self.config).await?)),
        }
    }
}

/// 拼接远程路径：`join_remote("/www", "css/a.css") == "/www/css/a.css"`
pub fn join_remote(base: &str, relative: &str) -> String {
    let relative = relative.trim_matches('/');
    let base = base.trim_end_matches('/');

    match (base.is_empty(), relative.is_empty()) {
        (_, true) if base.is_empty() => "/".to_string(),
        (_, true) => base.to_string(),
        (true, false) => format!("/{}", relative),
        (false, false) => format!("{}/{}", base, relative),
    }
}

/// 远程路径的父目录
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}
