//! 部署错误类型

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Transient transfer error: {0}")]
    TransientTransfer(String),

    #[error("Transfer failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Local IO error at {path:?}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote path not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Remote operation failed: {0}")]
    Remote(String),
}

impl DeployError {
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// 可以通过重试恢复的错误（超时、连接重置等）
    pub fn is_transient(&self) -> bool {
        matches!(self, DeployError::TransientTransfer(_))
    }

    /// 必须立即中止整个部署的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeployError::Connection(_)
                | DeployError::Authentication(_)
                | DeployError::Permission(_)
                | DeployError::RetriesExhausted { .. }
        )
    }

    /// 将 IO 错误按类型归类：瞬时网络错误可重试，其余按语义映射
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock => DeployError::TransientTransfer(format!("{}: {}", context, err)),
            ErrorKind::PermissionDenied => DeployError::Permission(format!("{}: {}", context, err)),
            ErrorKind::NotFound => DeployError::NotFound(format!("{}: {}", context, err)),
            ErrorKind::ConnectionRefused | ErrorKind::NotConnected | ErrorKind::AddrNotAvailable => {
                DeployError::Connection(format!("{}: {}", context, err))
            }
            _ => DeployError::Remote(format!("{}: {}", context, err)),
        }
    }
}
