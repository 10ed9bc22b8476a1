use super::{RemoteEntry, Transport};
use crate::config::EngineConfig;
use crate::error::{DeployError, Result};
use crate::models::Credentials;
use async_trait::async_trait;
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

// libssh2 / SFTP 错误码
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;
const SFTP_NO_CONNECTION: i32 = 6;
const SFTP_CONNECTION_LOST: i32 = 7;
const SFTP_NO_SUCH_PATH: i32 = 10;
const SFTP_WRITE_PROTECT: i32 = 12;
const SESSION_SOCKET_SEND: i32 = -7;
const SESSION_TIMEOUT: i32 = -9;
const SESSION_SOCKET_DISCONNECT: i32 = -13;
const SESSION_AUTHENTICATION_FAILED: i32 = -18;
const SESSION_EAGAIN: i32 = -37;
const SESSION_SOCKET_RECV: i32 = -43;

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

/// 基于 ssh2 的 SFTP 传输，阻塞调用在 blocking 线程池中执行
pub struct SftpTransport {
    inner: Arc<Mutex<Option<SftpSession>>>,
    credentials: Credentials,
    config: EngineConfig,
    name: String,
}

impl SftpTransport {
    pub async fn connect(credentials: &Credentials, config: &EngineConfig) -> Result<Self> {
        let creds = credentials.clone();
        let cfg = config.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&creds, &cfg))
            .await
            .map_err(|e| DeployError::Connection(format!("connect task failed: {}", e)))??;

        let name = format!(
            "sftp://{}@{}:{}",
            credentials.username,
            credentials.host,
            credentials.effective_port()
        );
        tracing::info!("SFTP 连接成功: {}", name);

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(session))),
            credentials: credentials.clone(),
            config: config.clone(),
            name,
        })
    }

    /// 在 blocking 线程中使用当前会话
    async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SftpSession) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = inner
                .lock()
                .map_err(|_| DeployError::Remote("sftp session lock poisoned".into()))?;
            match guard.as_ref() {
                Some(session) => op(session),
                None => Err(DeployError::TransientTransfer("sftp session is closed".into())),
            }
        })
        .await
        .map_err(|e| DeployError::Remote(format!("sftp task failed: {}", e)))?
    }
}

fn open_session(credentials: &Credentials, config: &EngineConfig) -> Result<SftpSession> {
    let host = credentials.host.as_str();
    let port = credentials.effective_port();

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| DeployError::Connection(format!("resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| DeployError::Connection(format!("no address for {}:{}", host, port)))?;

    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout())
        .map_err(|e| DeployError::Connection(format!("connect {}:{}: {}", host, port, e)))?;
    let _ = tcp.set_read_timeout(Some(config.io_timeout()));
    let _ = tcp.set_write_timeout(Some(config.io_timeout()));

    let mut session = Session::new().map_err(|e| DeployError::Connection(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(config.io_timeout().as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| DeployError::Connection(format!("ssh handshake with {}: {}", host, e)))?;

    session
        .userauth_password(&credentials.username, &credentials.password)
        .map_err(|e| DeployError::Authentication(format!("{}@{}: {}", credentials.username, host, e)))?;
    if !session.authenticated() {
        return Err(DeployError::Authentication(format!(
            "{}@{}: password rejected",
            credentials.username, host
        )));
    }

    let sftp = session
        .sftp()
        .map_err(|e| DeployError::Connection(format!("sftp subsystem: {}", e)))?;

    Ok(SftpSession { session, sftp })
}

fn classify(context: &str, err: ssh2::Error) -> DeployError {
    let message = format!("{}: {}", context, err);
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH) => {
            DeployError::NotFound(message)
        }
        ErrorCode::SFTP(SFTP_PERMISSION_DENIED) | ErrorCode::SFTP(SFTP_WRITE_PROTECT) => {
            DeployError::Permission(message)
        }
        ErrorCode::SFTP(SFTP_NO_CONNECTION)
        | ErrorCode::SFTP(SFTP_CONNECTION_LOST)
        | ErrorCode::Session(SESSION_SOCKET_SEND)
        | ErrorCode::Session(SESSION_TIMEOUT)
        | ErrorCode::Session(SESSION_SOCKET_DISCONNECT)
        | ErrorCode::Session(SESSION_EAGAIN)
        | ErrorCode::Session(SESSION_SOCKET_RECV) => DeployError::TransientTransfer(message),
        ErrorCode::Session(SESSION_AUTHENTICATION_FAILED) => DeployError::Authentication(message),
        _ => DeployError::Remote(message),
    }
}

fn create_dir_recursive(sftp: &Sftp, path: &str) -> Result<()> {
    let absolute = path.starts_with('/');
    let mut current = String::new();

    for part in path.split('/').filter(|s| !s.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);

        let dir = Path::new(&current);
        if sftp.stat(dir).is_ok() {
            continue;
        }

        if let Err(e) = sftp.mkdir(dir, 0o755) {
            // 可能被并发创建
            if sftp.stat(dir).is_ok() {
                continue;
            }
            return Err(classify(&format!("mkdir {}", current), e));
        }
    }

    Ok(())
}

/// 单引号转义，用于远程 shell 命令
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[async_trait]
impl Transport for SftpTransport {
    async fn ensure_directory(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_session(move |s| create_dir_recursive(&s.sftp, &path))
            .await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let local = local_path.to_path_buf();
        let remote = PathBuf::from(remote_path);

        self.with_session(move |s| {
            let mut source =
                std::fs::File::open(&local).map_err(|e| DeployError::local_io(&local, e))?;
            let mtime = source
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs());

            let mut target = s
                .sftp
                .create(&remote)
                .map_err(|e| classify(&format!("create {}", remote.display()), e))?;
            let bytes = std::io::copy(&mut source, &mut target)
                .map_err(|e| DeployError::from_io(&format!("upload {}", remote.display()), e))?;
            drop(target);

            // 保留本地修改时间，失败不影响上传结果
            if let Some(mtime) = mtime {
                let stat = FileStat {
                    size: None,
                    uid: None,
                    gid: None,
                    perm: None,
                    atime: Some(mtime),
                    mtime: Some(mtime),
                };
                if let Err(e) = s.sftp.setstat(&remote, stat) {
                    tracing::debug!("设置远程修改时间失败 {}: {}", remote.display(), e);
                }
            }

            Ok(bytes)
        })
        .await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = PathBuf::from(if path.is_empty() { "/" } else { path });

        self.with_session(move |s| {
            let items = s
                .sftp
                .readdir(&dir)
                .map_err(|e| classify(&format!("list {}", dir.display()), e))?;

            let entries = items
                .into_iter()
                .filter_map(|(path, stat)| {
                    let name = path.file_name()?.to_str()?.to_string();
                    if name == "." || name == ".." {
                        return None;
                    }
                    Some(RemoteEntry {
                        name,
                        size: if stat.is_dir() { 0 } else { stat.size.unwrap_or(0) },
                        mtime: stat.mtime.unwrap_or(0) as f64,
                        is_dir: stat.is_dir(),
                    })
                })
                .collect();

            Ok(entries)
        })
        .await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let target = PathBuf::from(path);
        self.with_session(move |s| match s.sftp.unlink(&target) {
            Ok(()) => Ok(()),
            Err(e) => match classify(&format!("delete {}", target.display()), e) {
                DeployError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        })
        .await
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        let target = PathBuf::from(path);
        self.with_session(move |s| {
            s.sftp
                .rmdir(&target)
                .map_err(|e| classify(&format!("rmdir {}", target.display()), e))
        })
        .await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let target = PathBuf::from(path);
        self.with_session(move |s| {
            let mut file = s
                .sftp
                .open(&target)
                .map_err(|e| classify(&format!("open {}", target.display()), e))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| DeployError::from_io(&format!("read {}", target.display()), e))?;
            Ok(data)
        })
        .await
    }

    async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let target = PathBuf::from(path);
        self.with_session(move |s| {
            let mut file = s
                .sftp
                .create(&target)
                .map_err(|e| classify(&format!("create {}", target.display()), e))?;
            file.write_all(&data)
                .map_err(|e| DeployError::from_io(&format!("write {}", target.display()), e))
        })
        .await
    }

    /// 通过 exec 通道执行 `cp -a`；仅开放 SFTP 的账户返回 `Unsupported`
    async fn copy_tree(&self, from: &str, to: &str) -> Result<()> {
        let command = format!("cp -a -- {} {}", shell_quote(from), shell_quote(to));

        self.with_session(move |s| {
            let mut channel = s
                .session
                .channel_session()
                .map_err(|e| DeployError::Unsupported(format!("exec channel: {}", e)))?;
            channel
                .exec(&command)
                .map_err(|e| DeployError::Unsupported(format!("exec '{}': {}", command, e)))?;

            let mut stdout = String::new();
            let _ = channel.read_to_string(&mut stdout);
            let mut stderr = String::new();
            let _ = channel.stderr().read_to_string(&mut stderr);
            let _ = channel.wait_close();

            match channel.exit_status() {
                Ok(0) => Ok(()),
                // 命令不存在或不可执行
                Ok(126) | Ok(127) => Err(DeployError::Unsupported(format!(
                    "'{}' unavailable: {}",
                    command,
                    stderr.trim()
                ))),
                Ok(code) => Err(DeployError::Remote(format!(
                    "'{}' exited with code {}: {}",
                    command,
                    code,
                    stderr.trim()
                ))),
                Err(e) => Err(classify(&format!("exec '{}'", command), e)),
            }
        })
        .await
    }

    async fn reconnect(&self) -> Result<()> {
        tracing::info!("重建 SFTP 会话: {}", self.name);
        let creds = self.credentials.clone();
        let cfg = self.config.clone();
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            let fresh = open_session(&creds, &cfg)?;
            let mut guard = inner
                .lock()
                .map_err(|_| DeployError::Remote("sftp session lock poisoned".into()))?;
            // 旧会话可能已断开，直接丢弃
            *guard = Some(fresh);
            Ok(())
        })
        .await
        .map_err(|e| DeployError::Remote(format!("reconnect task failed: {}", e)))?
    }

    async fn close(&self) -> Result<()> {
        let inner = self.inner.clone();
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| DeployError::Remote("sftp session lock poisoned".into()))?;
            if let Some(s) = guard.take() {
                drop(s.sftp);
                if let Err(e) = s.session.disconnect(None, "deployment finished", None) {
                    tracing::debug!("断开 SFTP 会话失败 {}: {}", name, e);
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| DeployError::Remote(format!("close task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/www"), "'/www'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_classify_codes() {
        let err = ssh2::Error::new(ErrorCode::SFTP(SFTP_PERMISSION_DENIED), "denied");
        assert!(matches!(classify("mkdir", err), DeployError::Permission(_)));

        let err = ssh2::Error::new(ErrorCode::SFTP(SFTP_NO_SUCH_FILE), "missing");
        assert!(matches!(classify("list", err), DeployError::NotFound(_)));

        let err = ssh2::Error::new(ErrorCode::Session(SESSION_TIMEOUT), "timeout");
        assert!(classify("upload", err).is_transient());

        let err = ssh2::Error::new(ErrorCode::Session(SESSION_AUTHENTICATION_FAILED), "auth");
        assert!(matches!(classify("auth", err), DeployError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // 端口 1 通常无人监听
        let creds = Credentials::new("127.0.0.1", "u", "p", 1, crate::models::Protocol::Sftp);
        let config = EngineConfig {
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let result = SftpTransport::connect(&creds, &config).await;
        assert!(matches!(result, Err(DeployError::Connection(_))));
    }
}
