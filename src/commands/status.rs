//! 部署状态：检查目标目录中是否存在站点入口文件

use crate::error::DeployError;
use crate::models::Credentials;
use crate::transport::{Connector, Transport};
use serde::Serialize;
use tracing::{debug, error};

const INDEX_FILES: [&str; 3] = ["index.html", "index.php", "index.htm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteState {
    /// 目标目录不存在
    NotDeployed,
    /// 存在入口文件
    Deployed,
    /// 目录存在但没有入口文件
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SiteState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentStatus {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            status: None,
            host: None,
            path: None,
            message: None,
            error: Some(error),
        }
    }
}

pub async fn deployment_status(
    connector: &dyn Connector,
    credentials: &Credentials,
    destination: &str,
) -> DeploymentStatus {
    if let Err(e) = credentials.validate() {
        return DeploymentStatus::failed(e);
    }

    let transport = match connector.connect(credentials).await {
        Ok(t) => t,
        Err(e) => return DeploymentStatus::failed(format!("Failed to connect: {}", e)),
    };

    let destination = if destination.trim().is_empty() {
        "/"
    } else {
        destination
    };
    let state = inspect(transport.as_ref(), destination).await;

    if let Err(e) = transport.close().await {
        tracing::warn!("关闭会话失败: {}", e);
    }

    let state = match state {
        Ok(s) => s,
        Err(e) => {
            error!("检查部署状态失败: {}", e);
            return DeploymentStatus::failed(format!("Failed to check deployment status: {}", e));
        }
    };

    let location = format!("{}/{}", credentials.host, destination.trim_start_matches('/'));
    let message = match state {
        SiteState::NotDeployed => format!("Directory {} does not exist", destination),
        SiteState::Deployed => format!("Site appears to be deployed at {}", location),
        SiteState::Partial => format!("Directory exists but no index file found at {}", location),
    };

    DeploymentStatus {
        success: true,
        status: Some(state),
        host: Some(credentials.host.clone()),
        path: Some(destination.to_string()),
        message: Some(message),
        error: None,
    }
}

async fn inspect(transport: &dyn Transport, destination: &str) -> crate::error::Result<SiteState> {
    let entries = match transport.list_directory(destination).await {
        Ok(entries) => entries,
        Err(DeployError::NotFound(_)) => return Ok(SiteState::NotDeployed),
        Err(e) => return Err(e),
    };

    debug!("{} 下共 {} 项", destination, entries.len());
    let deployed = entries
        .iter()
        .any(|e| !e.is_dir && INDEX_FILES.contains(&e.name.as_str()));

    Ok(if deployed {
        SiteState::Deployed
    } else {
        SiteState::Partial
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use crate::transport::LocalConnector;
    use std::fs;

    fn credentials() -> Credentials {
        Credentials::new("example.com", "deploy", "secret", 0, Protocol::Sftp)
    }

    #[tokio::test]
    async fn test_status_states() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("site/assets")).unwrap();
        fs::write(dir.path().join("site/assets/app.js"), "x").unwrap();
        let connector = LocalConnector::new(dir.path());

        let missing = deployment_status(&connector, &credentials(), "/nowhere").await;
        assert!(missing.success);
        assert_eq!(missing.status, Some(SiteState::NotDeployed));

        let partial = deployment_status(&connector, &credentials(), "/site").await;
        assert_eq!(partial.status, Some(SiteState::Partial));

        fs::write(dir.path().join("site/index.php"), "<?php").unwrap();
        let deployed = deployment_status(&connector, &credentials(), "/site").await;
        assert_eq!(deployed.status, Some(SiteState::Deployed));
        assert_eq!(
            deployed.message.as_deref(),
            Some("Site appears to be deployed at example.com/site")
        );

        let json = serde_json::to_value(&deployed).unwrap();
        assert_eq!(json["status"], "deployed");
    }

    #[tokio::test]
    async fn test_status_root_destination() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "hi").unwrap();
        let status =
            deployment_status(&LocalConnector::new(dir.path()), &credentials(), "").await;
        assert_eq!(status.status, Some(SiteState::Deployed));
        assert_eq!(status.path.as_deref(), Some("/"));
    }
}
