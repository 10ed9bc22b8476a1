use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 传输协议
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Sftp,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Sftp => write!(f, "sftp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "sftp" => Ok(Protocol::Sftp),
            other => Err(format!(
                "Unsupported protocol: {}. Must be 'ftp' or 'sftp'.",
                other
            )),
        }
    }
}

/// 服务器凭据（由外部凭据存储提供，引擎不缓存）
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
    /// 0 表示使用协议默认端口
    #[serde(default)]
    pub port: u16,
    #[serde(deserialize_with = "deserialize_protocol")]
    pub protocol: Protocol,
}

fn deserialize_protocol<'de, D>(deserializer: D) -> Result<Protocol, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        port: u16,
        protocol: Protocol,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            port,
            protocol,
        }
    }

    /// 实际连接端口
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.protocol.default_port()
        } else {
            self.port
        }
    }

    /// 检查必填字段，返回缺失的字段名
    pub fn validate(&self) -> Result<(), String> {
        let missing: Vec<&str> = [
            ("host", self.host.trim().is_empty()),
            ("username", self.username.is_empty()),
            ("password", self.password.is_empty()),
        ]
        .iter()
        .filter(|(_, empty)| *empty)
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("Missing required credentials: {}", missing.join(", ")))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// 同步模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// 上传所有本地文件
    Full,
    /// 仅上传远程不存在的文件
    Incremental,
    /// 上传缺失或内容不同的文件
    #[default]
    Smart,
}

impl SyncMode {
    /// 是否需要扫描远程目录
    pub fn needs_remote_scan(&self) -> bool {
        !matches!(self, SyncMode::Full)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Smart => write!(f, "smart"),
        }
    }
}

/// 默认排除规则：版本控制、系统元数据、依赖目录、环境文件、文档
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    ".git",
    ".github",
    ".gitignore",
    ".svn",
    ".hg",
    ".DS_Store",
    "Thumbs.db",
    "__pycache__",
    "*.pyc",
    "node_modules",
    ".env",
    ".env.local",
    ".env.development",
    ".env.production",
    "README.md",
    "LICENSE",
    "CHANGELOG.md",
];

/// 部署配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_backup")]
    pub backup: bool,
    #[serde(default)]
    pub clean_destination: bool,
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// 远程目标目录
    #[serde(default = "default_destination")]
    pub destination: String,
}

fn default_backup() -> bool {
    true
}

fn default_exclusions() -> Vec<String> {
    DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_destination() -> String {
    "/".to_string()
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            backup: default_backup(),
            clean_destination: false,
            exclusions: default_exclusions(),
            sync_mode: SyncMode::default(),
            destination: default_destination(),
        }
    }
}

/// 待部署的本地项目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFiles {
    pub root: PathBuf,
}

impl ProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// 部署阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Connecting,
    BackingUp,
    Cleaning,
    Scanning,
    Planning,
    Uploading,
    Reporting,
    Succeeded,
    Failed,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployPhase::Connecting => "connecting",
            DeployPhase::BackingUp => "backing_up",
            DeployPhase::Cleaning => "cleaning",
            DeployPhase::Scanning => "scanning",
            DeployPhase::Planning => "planning",
            DeployPhase::Uploading => "uploading",
            DeployPhase::Reporting => "reporting",
            DeployPhase::Succeeded => "succeeded",
            DeployPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 部署统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployStats {
    pub files_uploaded: usize,
    pub files_skipped: usize,
    pub total_files: usize,
    pub bytes_uploaded: u64,
    pub files_deleted: usize,
    pub duration_ms: u64,
}

/// 部署结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub success: bool,
    pub deployment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DeployStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 失败时所处的阶段
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<DeployPhase>,
}

impl DeploymentOutcome {
    pub fn succeeded(
        deployment_id: String,
        stats: DeployStats,
        url: String,
        backup_path: Option<String>,
    ) -> Self {
        Self {
            success: true,
            deployment_id,
            stats: Some(stats),
            url: Some(url),
            backup_path,
            error: None,
            phase: None,
        }
    }

    pub fn failed(
        deployment_id: String,
        phase: DeployPhase,
        error: impl Into<String>,
        stats: Option<DeployStats>,
    ) -> Self {
        Self {
            success: false,
            deployment_id,
            stats,
            url: None,
            backup_path: None,
            error: Some(error.into()),
            phase: Some(phase),
        }
    }
}

/// 部署进度事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployProgress {
    pub deployment_id: String,
    pub phase: DeployPhase,
    pub message: String,
    pub files_total: usize,
    pub files_uploaded: usize,
    pub current_file: String,
}

/// 部署请求（JSON 入口）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub credentials: Credentials,
    pub project_root: PathBuf,
    #[serde(default)]
    pub config: DeploymentConfig,
}

/// 根据主机与目标路径生成站点地址
pub fn deployment_url(host: &str, destination: &str) -> String {
    let path = destination.trim_matches('/');
    if path.is_empty() {
        format!("https://{}", host)
    } else {
        format!("https://{}/{}", host, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_url() {
        assert_eq!(deployment_url("example.com", "/"), "https://example.com");
        assert_eq!(deployment_url("example.com", ""), "https://example.com");
        assert_eq!(
            deployment_url("example.com", "/public_html/app/"),
            "https://example.com/public_html/app"
        );
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: DeploymentConfig = serde_json::from_str("{}").unwrap();
        assert!(config.backup);
        assert!(!config.clean_destination);
        assert_eq!(config.sync_mode, SyncMode::Smart);
        assert_eq!(config.destination, "/");
        assert!(config.exclusions.iter().any(|e| e == ".git"));
        assert!(config.exclusions.iter().any(|e| e == "node_modules"));

        let config: DeploymentConfig =
            serde_json::from_str(r#"{"sync_mode":"incremental","backup":false}"#).unwrap();
        assert_eq!(config.sync_mode, SyncMode::Incremental);
        assert!(!config.backup);
    }

    #[test]
    fn test_credentials_parsing_and_ports() {
        let creds: Credentials = serde_json::from_str(
            r#"{"host":"h","username":"u","password":"p","protocol":"SFTP"}"#,
        )
        .unwrap();
        assert_eq!(creds.protocol, Protocol::Sftp);
        assert_eq!(creds.effective_port(), 22);

        let bad = serde_json::from_str::<Credentials>(
            r#"{"host":"h","username":"u","password":"p","protocol":"scp"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_credentials_validate_and_redact() {
        let creds = Credentials::new("", "user", "", 21, Protocol::Ftp);
        let err = creds.validate().unwrap_err();
        assert!(err.contains("host"));
        assert!(err.contains("password"));
        assert!(!err.contains("username"));

        let creds = Credentials::new("h", "u", "secret", 21, Protocol::Ftp);
        assert!(creds.validate().is_ok());
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
