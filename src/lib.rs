pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod models;
pub mod transport;

pub use crate::core::{Deployer, DeployPreview};
pub use config::EngineConfig;
pub use error::{DeployError, Result};
pub use models::{
    Credentials, DeployPhase, DeployProgress, DeployStats, DeploymentConfig, DeploymentOutcome,
    DeploymentRequest, ProjectFiles, Protocol, SyncMode,
};

// 不引入 dirs crate，按平台约定取配置目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var_os("APPDATA").map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var_os("HOME")
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var_os("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .filter(|p| p.is_absolute())
                .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        }
    }
}
