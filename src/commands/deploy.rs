//! JSON 部署入口：请求文档 -> 部署结果文档

use crate::core::Deployer;
use crate::models::{DeployPhase, DeploymentOutcome, DeploymentRequest, ProjectFiles};
use tracing::error;

/// 解析 `DeploymentRequest` 并执行部署，返回结果 JSON
pub async fn run_request(deployer: &Deployer, request_json: &str) -> String {
    let outcome = match serde_json::from_str::<DeploymentRequest>(request_json) {
        Ok(request) => {
            deployer
                .deploy(
                    &ProjectFiles::new(request.project_root),
                    &request.credentials,
                    &request.config,
                )
                .await
        }
        Err(e) => {
            error!("无效的部署请求: {}", e);
            let mut outcome = DeploymentOutcome::failed(
                uuid::Uuid::new_v4().to_string(),
                DeployPhase::Connecting,
                format!("Invalid deployment request: {}", e),
                None,
            );
            outcome.phase = None;
            outcome
        }
    };

    serde_json::to_string_pretty(&outcome).unwrap_or_else(|e| {
        format!(
            r#"{{"success": false, "deployment_id": "{}", "error": "failed to encode outcome: {}"}}"#,
            outcome.deployment_id, e
        )
    })
}
