//! 日志模块 - 文件日志（按大小轮转）与 tracing 初始化

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

const LOG_FILE_NAME: &str = "hostsync.log";
const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// 日志配置（config.json 中的 `log` 段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 单个日志文件上限（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    pub fn load(config_dir: &Path) -> Self {
        fs::read_to_string(config_dir.join("config.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("log").cloned())
            .and_then(|log| serde_json::from_value::<LogConfig>(log).ok())
            .map(LogConfig::normalized)
            .unwrap_or_default()
    }

    /// 保存日志配置（保留文件中的其他段落）
    pub fn save(&self, config_dir: &Path) -> anyhow::Result<()> {
        let config_file = config_dir.join("config.json");

        let mut config: serde_json::Value = match fs::read_to_string(&config_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({})),
            Err(e) if e.kind() == io::ErrorKind::NotFound => serde_json::json!({}),
            Err(e) => return Err(e.into()),
        };

        config["log"] = serde_json::to_value(self.clone().normalized())?;
        fs::create_dir_all(config_dir)?;
        fs::write(&config_file, serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }

    /// 设置日志级别，无效级别返回错误
    pub fn set_level(&mut self, level: &str) -> anyhow::Result<()> {
        let level = level.trim().to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            anyhow::bail!("Invalid log level: {}", level);
        }
        self.level = level;
        Ok(())
    }

    // 文件大小限制在 1-100 MB
    fn normalized(mut self) -> Self {
        self.max_size_mb = self.max_size_mb.clamp(1, 100);
        self
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

struct LogFile {
    file: File,
    written: u64,
}

/// 按大小轮转的日志写入器：超过上限时把当前文件改名为 `.1` 并重新打开
#[derive(Clone)]
pub struct SizeRotatingWriter {
    path: PathBuf,
    max_size: u64,
    state: Arc<Mutex<LogFile>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_limit(log_dir, u64::from(max_size_mb.max(1)) * 1024 * 1024)
    }

    fn with_limit(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(LOG_FILE_NAME);

        let existing = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            rotate(&path)?;
        }

        let state = LogFile {
            file: open_append(&path)?,
            written: if existing > max_size { 0 } else { existing },
        };

        Ok(Self {
            path,
            max_size,
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogFile> {
        // 写日志的线程 panic 不应让日志整体失效
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_record(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();

        if state.written > 0 && state.written + buf.len() as u64 > self.max_size {
            state.file.flush()?;
            rotate(&self.path)?;
            state.file = open_append(&self.path)?;
            state.written = 0;
        }

        state.file.write_all(buf)?;
        state.written += buf.len() as u64;
        Ok(buf.len())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotate(path: &Path) -> io::Result<()> {
    let rotated = path.with_extension("log.1");
    match fs::remove_file(&rotated) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(path, rotated)
}

/// 单条日志记录的写入句柄
pub struct RotatingHandle {
    writer: SizeRotatingWriter,
}

impl Write for RotatingHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = RotatingHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingHandle {
            writer: self.clone(),
        }
    }
}

/// 数据目录：`<config_dir>/hostsync`
pub fn data_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("hostsync"))
        .unwrap_or_else(|| PathBuf::from(".hostsync"))
}

pub fn log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}

/// 初始化全局 tracing subscriber
///
/// 文件日志始终启用（除非配置关闭），debug 构建额外输出到 stderr。
pub fn init_logging(config_dir: &Path) {
    let config = LogConfig::load(config_dir);

    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(config.tracing_level().into())
        .from_env_lossy();

    let file_layer = match SizeRotatingWriter::new(&log_dir(config_dir), config.max_size_mb) {
        Ok(writer) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        ),
        Err(e) => {
            eprintln!("无法创建日志文件，仅输出到控制台: {}", e);
            None
        }
    };

    let console_layer = (cfg!(debug_assertions) || file_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_roundtrip_keeps_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), r#"{"engine":{"maxAttempts":5}}"#).unwrap();

        let mut config = LogConfig::default();
        config.set_level("DEBUG").unwrap();
        config.max_size_mb = 500;
        config.save(dir.path()).unwrap();

        let loaded = LogConfig::load(dir.path());
        assert_eq!(loaded.level, "debug");
        assert_eq!(loaded.max_size_mb, 100);
        assert_eq!(loaded.tracing_level(), tracing::Level::DEBUG);

        let raw = fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert!(raw.contains("maxAttempts"));
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut config = LogConfig::default();
        assert!(config.set_level("verbose").is_err());
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_writer_rotates_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SizeRotatingWriter::with_limit(dir.path(), 16).unwrap();

        let mut handle = writer.make_writer();
        handle.write_all(b"first line 1234\n").unwrap();
        handle.write_all(b"second line\n").unwrap();
        handle.flush().unwrap();

        let current = fs::read_to_string(dir.path().join("hostsync.log")).unwrap();
        let rotated = fs::read_to_string(dir.path().join("hostsync.log.1")).unwrap();
        assert_eq!(current, "second line\n");
        assert_eq!(rotated, "first line 1234\n");
    }

    #[test]
    fn test_init_logging_writes_under_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        init_logging(dir.path());

        assert_eq!(log_dir(dir.path()), dir.path().join("logs"));
        assert!(dir.path().join("logs").join("hostsync.log").is_file());
    }
}
