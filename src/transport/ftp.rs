use super::{RemoteEntry, Transport};
use crate::config::EngineConfig;
use crate::error::{DeployError, Result};
use crate::models::Credentials;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// 上传时每次写入的块大小
const UPLOAD_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// 基于 opendal FTP 服务的传输（内部维护连接池，断线后自动重连）
pub struct FtpTransport {
    operator: Operator,
    name: String,
}

impl FtpTransport {
    pub async fn connect(credentials: &Credentials, config: &EngineConfig) -> Result<Self> {
        use opendal::services::Ftp;

        let endpoint = format!(
            "ftp://{}:{}",
            credentials.host,
            credentials.effective_port()
        );

        let builder = Ftp::default()
            .endpoint(&endpoint)
            .user(&credentials.username)
            .password(&credentials.password)
            .root("/");

        let operator = Operator::new(builder)
            .map_err(|e| DeployError::InvalidConfig(e.to_string()))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(config.connect_timeout())
                    .with_io_timeout(config.io_timeout()),
            )
            .finish();

        let name = format!("ftp://{}@{}", credentials.username, endpoint.trim_start_matches("ftp://"));

        // opendal 延迟建立连接，这里列一次根目录以尽早暴露认证和网络错误
        operator
            .list("/")
            .await
            .map_err(|e| classify_connect_error(&endpoint, e))?;

        tracing::info!("FTP 连接成功: {}", name);
        Ok(Self { operator, name })
    }

    fn file_path(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    fn dir_path(path: &str) -> String {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", trimmed)
        }
    }
}

/// 连接阶段的错误：除登录被拒外一律视为连接失败
fn classify_connect_error(endpoint: &str, err: opendal::Error) -> DeployError {
    let message = format!("connect {}: {}", endpoint, err);
    if is_login_rejected(&err.to_string()) {
        DeployError::Authentication(message)
    } else {
        DeployError::Connection(message)
    }
}

/// 只看服务器回复，不看路径：路径里可能恰好带有 530
fn is_login_rejected(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    lower.contains("[530]")
        || lower.starts_with("530 ")
        || lower.contains(" 530 ")
        || lower.contains("login incorrect")
        || lower.contains("not logged in")
        || lower.contains("notloggedin")
}

/// 550 既用于文件不存在，也用于拒绝访问，只能从回复文本区分
fn is_denied(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    lower.contains("denied") || lower.contains("permission") || lower.contains("not permitted")
}

fn classify(context: &str, err: opendal::Error) -> DeployError {
    let reply = err.to_string();
    let message = format!("{}: {}", context, reply);
    let lower = reply.to_lowercase();

    match err.kind() {
        opendal::ErrorKind::NotFound if is_denied(&reply) => DeployError::Permission(message),
        opendal::ErrorKind::NotFound => DeployError::NotFound(message),
        opendal::ErrorKind::PermissionDenied => DeployError::Permission(message),
        opendal::ErrorKind::Unsupported => DeployError::Unsupported(message),
        opendal::ErrorKind::ConfigInvalid => DeployError::InvalidConfig(message),
        _ if lower.contains("connection refused") => DeployError::Connection(message),
        _ if err.is_temporary()
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("connection reset")
            || lower.contains("broken pipe") =>
        {
            DeployError::TransientTransfer(message)
        }
        _ => DeployError::Remote(message),
    }
}

/// 写入类操作：父目录已确保存在，此时的 550 只能是拒绝写入
fn classify_write(context: &str, err: opendal::Error) -> DeployError {
    match classify(context, err) {
        DeployError::NotFound(message) => DeployError::Permission(message),
        e => e,
    }
}

/// 删除返回 550 后用 stat 确认：文件已不在才算成功，仍在说明删除被拒
fn confirm_deleted(
    target: &str,
    err: opendal::Error,
    stat: opendal::Result<opendal::Metadata>,
) -> Result<()> {
    match stat {
        Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify(&format!("stat {}", target), e)),
        Ok(_) => Err(DeployError::Permission(format!("delete {}: {}", target, err))),
    }
}

/// create_dir 会忽略 MKD 的 550，创建后必须确认目录确实存在
fn confirm_created(dir: &str, stat: opendal::Result<opendal::Metadata>) -> Result<()> {
    match stat {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DeployError::Remote(format!(
            "mkdir {}: a file with the same name exists",
            dir
        ))),
        Err(e) if e.kind() == opendal::ErrorKind::NotFound => Err(DeployError::Permission(
            format!("mkdir {}: directory was not created: {}", dir, e),
        )),
        Err(e) => Err(classify(&format!("stat {}", dir), e)),
    }
}

#[async_trait]
impl Transport for FtpTransport {
    async fn ensure_directory(&self, path: &str) -> Result<()> {
        let dir = Self::dir_path(path);
        if dir == "/" {
            return Ok(());
        }

        // opendal 的 FTP create_dir 会逐级创建并忽略已存在的目录
        self.operator
            .create_dir(&dir)
            .await
            .map_err(|e| classify_write(&format!("mkdir {}", dir), e))?;

        confirm_created(&dir, self.operator.stat(&dir).await)
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let target = Self::file_path(remote_path);
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| DeployError::local_io(local_path, e))?;

        let mut writer = self
            .operator
            .writer(&target)
            .await
            .map_err(|e| classify_write(&format!("upload {}", target), e))?;

        let mut total = 0u64;
        loop {
            let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| DeployError::local_io(local_path, e))?;
            if n == 0 {
                break;
            }
            buffer.truncate(n);
            writer
                .write(buffer)
                .await
                .map_err(|e| classify_write(&format!("upload {}", target), e))?;
            total += n as u64;
        }

        writer
            .close()
            .await
            .map_err(|e| classify_write(&format!("upload {}", target), e))?;

        Ok(total)
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = Self::dir_path(path);
        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(|e| classify(&format!("list {}", dir), e))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| classify(&format!("list {}", dir), e))?
        {
            // 跳过目录自身
            if entry.path() == dir || entry.path().trim_matches('/') == dir.trim_matches('/') {
                continue;
            }

            let name = entry.name().trim_end_matches('/').to_string();
            if name.is_empty() || name == "." || name == ".." {
                continue;
            }

            let meta = entry.metadata();
            entries.push(RemoteEntry {
                name,
                size: if meta.is_dir() { 0 } else { meta.content_length() },
                mtime: meta
                    .last_modified()
                    .map_or(0.0, |t| t.timestamp_millis() as f64 / 1000.0),
                is_dir: meta.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let target = Self::file_path(path);
        match self.operator.delete(&target).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound && !is_denied(&e.to_string()) => {
                confirm_deleted(&target, e, self.operator.stat(&target).await)
            }
            Err(e) => Err(classify(&format!("delete {}", target), e)),
        }
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        let dir = Self::dir_path(path);
        self.operator
            .delete(&dir)
            .await
            .map_err(|e| classify(&format!("rmdir {}", dir), e))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let target = Self::file_path(path);
        let data = self
            .operator
            .read(&target)
            .await
            .map_err(|e| classify(&format!("read {}", target), e))?;
        Ok(data.to_vec())
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let target = Self::file_path(path);
        self.operator
            .write(&target, data)
            .await
            .map(|_| ())
            .map_err(|e| classify_write(&format!("write {}", target), e))
    }

    async fn close(&self) -> Result<()> {
        // 连接池中的连接随 Operator 一起释放
        tracing::debug!("关闭 FTP 会话: {}", self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
