use crate::config::EngineConfig;
use crate::core::backup::BackupManager;
use crate::core::exclusion::ExclusionMatcher;
use crate::core::file_record::FileTree;
use crate::core::planner::{self, PlanSummary};
use crate::core::scanner::{LocalScanner, RemoteScanner};
use crate::error::{DeployError, Result};
use crate::models::{
    deployment_url, Credentials, DeployPhase, DeployProgress, DeployStats, DeploymentConfig,
    DeploymentOutcome, ProjectFiles, SyncMode,
};
use crate::transport::{
    join_remote, remote_parent, retry_transient, Connector, ProtocolConnector, RetryPolicy,
    Transport,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 预览结果：不修改远程目录，只给出将要上传的文件
#[derive(Debug, Clone, Serialize)]
pub struct DeployPreview {
    pub sync_mode: SyncMode,
    pub destination: String,
    pub summary: PlanSummary,
    /// 按路径排序
    pub uploads: Vec<String>,
}

/// 单次部署的运行状态
struct DeployRun {
    deployment_id: String,
    progress_tx: Option<mpsc::Sender<DeployProgress>>,
    phase: DeployPhase,
    stats: DeployStats,
    backup_path: Option<String>,
    started: Instant,
}

impl DeployRun {
    async fn enter(&mut self, phase: DeployPhase, message: impl Into<String>) {
        self.phase = phase;
        let message = message.into();
        info!("[{}] {}: {}", self.deployment_id, phase, message);
        self.emit(message, String::new()).await;
    }

    async fn emit(&self, message: String, current_file: String) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx
                .send(DeployProgress {
                    deployment_id: self.deployment_id.clone(),
                    phase: self.phase,
                    message,
                    files_total: self.stats.total_files,
                    files_uploaded: self.stats.files_uploaded,
                    current_file,
                })
                .await;
        }
    }

    fn finish_stats(&mut self) -> DeployStats {
        self.stats.files_skipped = self
            .stats
            .total_files
            .saturating_sub(self.stats.files_uploaded);
        self.stats.duration_ms = self.started.elapsed().as_millis() as u64;
        self.stats.clone()
    }
}

/// 部署引擎
pub struct Deployer {
    connector: Arc<dyn Connector>,
    config: EngineConfig,
}

impl Deployer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            connector: Arc::new(ProtocolConnector::new(config.clone())),
            config,
        }
    }

    pub fn with_connector(connector: Arc<dyn Connector>, config: EngineConfig) -> Self {
        Self { connector, config }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config)
    }

    /// 执行部署；任何失败都体现在返回的结果中
    pub async fn deploy(
        &self,
        project: &ProjectFiles,
        credentials: &Credentials,
        config: &DeploymentConfig,
    ) -> DeploymentOutcome {
        self.deploy_with_progress(project, credentials, config, None)
            .await
    }

    /// 执行部署并通过 channel 发送进度
    pub async fn deploy_with_progress(
        &self,
        project: &ProjectFiles,
        credentials: &Credentials,
        config: &DeploymentConfig,
        progress_tx: Option<mpsc::Sender<DeployProgress>>,
    ) -> DeploymentOutcome {
        let mut run = DeployRun {
            deployment_id: uuid::Uuid::new_v4().to_string(),
            progress_tx,
            phase: DeployPhase::Connecting,
            stats: DeployStats::default(),
            backup_path: None,
            started: Instant::now(),
        };

        info!(
            "[{}] 开始部署 {:?} -> {}://{}{} (mode: {})",
            run.deployment_id,
            project.root,
            credentials.protocol,
            credentials.host,
            config.destination,
            config.sync_mode
        );

        // 连接前的检查，失败时不发起任何网络请求
        let matcher = match self.prepare(project, credentials, config).await {
            Ok(m) => m,
            Err(e) => {
                error!("[{}] 部署前检查失败: {}", run.deployment_id, e);
                return self.fail(&mut run, e, false).await;
            }
        };

        run.enter(
            DeployPhase::Connecting,
            format!("正在连接 {}", credentials.host),
        )
        .await;

        let transport = match self.connector.connect(credentials).await {
            Ok(t) => t,
            Err(e) => {
                error!("[{}] 连接失败: {}", run.deployment_id, e);
                return self.fail(&mut run, e, false).await;
            }
        };

        let result = self
            .run_connected(transport.as_ref(), &mut run, project, config, &matcher)
            .await;

        if let Err(e) = transport.close().await {
            warn!("[{}] 关闭会话失败: {}", run.deployment_id, e);
        }

        match result {
            Ok(()) => {
                run.enter(DeployPhase::Reporting, "正在汇总结果").await;
                let stats = run.finish_stats();
                let url = deployment_url(&credentials.host, &config.destination);

                info!(
                    "[{}] 部署完成: 上传 {} 个, 跳过 {} 个, 删除 {} 个, {} 字节, 耗时 {}ms",
                    run.deployment_id,
                    stats.files_uploaded,
                    stats.files_skipped,
                    stats.files_deleted,
                    stats.bytes_uploaded,
                    stats.duration_ms
                );

                run.phase = DeployPhase::Succeeded;
                run.emit(format!("部署完成: {}", url), String::new()).await;

                DeploymentOutcome::succeeded(
                    run.deployment_id.clone(),
                    stats,
                    url,
                    run.backup_path.clone(),
                )
            }
            Err(e) => {
                error!("[{}] 部署在 {} 阶段失败: {}", run.deployment_id, run.phase, e);
                self.fail(&mut run, e, true).await
            }
        }
    }

    async fn fail(&self, run: &mut DeployRun, err: DeployError, with_stats: bool) -> DeploymentOutcome {
        let failed_phase = run.phase;
        let stats = with_stats.then(|| run.finish_stats());

        run.phase = DeployPhase::Failed;
        run.emit(err.to_string(), String::new()).await;

        let mut outcome =
            DeploymentOutcome::failed(run.deployment_id.clone(), failed_phase, err.to_string(), stats);
        // 失败时仍返回备份位置，便于手动恢复
        outcome.backup_path = run.backup_path.clone();
        outcome
    }

    /// 校验凭据、排除规则与本地目录
    async fn prepare(
        &self,
        project: &ProjectFiles,
        credentials: &Credentials,
        config: &DeploymentConfig,
    ) -> Result<ExclusionMatcher> {
        credentials.validate().map_err(DeployError::InvalidConfig)?;

        let metadata = tokio::fs::metadata(&project.root)
            .await
            .map_err(|e| DeployError::local_io(&project.root, e))?;
        if !metadata.is_dir() {
            return Err(DeployError::local_io(
                &project.root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        ExclusionMatcher::new(&config.exclusions)
    }

    async fn run_connected(
        &self,
        transport: &dyn Transport,
        run: &mut DeployRun,
        project: &ProjectFiles,
        config: &DeploymentConfig,
        matcher: &ExclusionMatcher,
    ) -> Result<()> {
        let policy = self.retry_policy();
        let destination = config.destination.as_str();

        retry_transient(policy, transport, destination, move || {
            transport.ensure_directory(destination)
        })
        .await?;

        let manager = BackupManager::new(policy);

        if config.backup {
            run.enter(DeployPhase::BackingUp, format!("正在备份 {}", destination))
                .await;
            let timestamp = chrono::Utc::now().timestamp();
            match manager.backup(transport, destination, timestamp).await {
                Ok(path) => run.backup_path = path,
                Err(e) => warn!("[{}] 备份失败，继续部署: {}", run.deployment_id, e),
            }
        }

        if config.clean_destination {
            run.enter(DeployPhase::Cleaning, format!("正在清理 {}", destination))
                .await;
            match manager.clean(transport, destination, matcher).await {
                Ok(deleted) => run.stats.files_deleted = deleted,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("[{}] 清理未完成，继续部署: {}", run.deployment_id, e),
            }
        }

        run.enter(DeployPhase::Scanning, "正在扫描文件").await;
        let local = LocalScanner::new(matcher.clone())
            .scan(&project.root)
            .await?;
        let remote = if config.sync_mode.needs_remote_scan() {
            RemoteScanner::new(matcher.clone(), policy)
                .scan(transport, destination)
                .await?
        } else {
            debug!("full 模式不扫描远程目录");
            FileTree::new()
        };

        run.stats.total_files = local.len();
        run.enter(
            DeployPhase::Planning,
            format!("本地 {} 个文件, 远程 {} 个文件", local.len(), remote.len()),
        )
        .await;

        let plan = planner::plan(&local, &remote, config.sync_mode);
        let summary = planner::summarize(&local, &plan);
        info!(
            "[{}] 同步计划: 上传 {} 个 ({} 字节), 跳过 {} 个",
            run.deployment_id, summary.upload_count, summary.upload_bytes, summary.skip_count
        );

        run.enter(
            DeployPhase::Uploading,
            format!("正在上传 {} 个文件", summary.upload_count),
        )
        .await;

        for rel in planner::ordered_paths(&plan) {
            let local_path = project.root.join(rel);
            let remote_path = join_remote(destination, rel);

            // 父目录与上传作为一个整体重试
            let parent = remote_parent(&remote_path);
            let (local_ref, remote_ref) = (local_path.as_path(), remote_path.as_str());
            let bytes = retry_transient(policy, transport, remote_ref, move || async move {
                if let Some(parent) = parent {
                    transport.ensure_directory(parent).await?;
                }
                transport.upload_file(local_ref, remote_ref).await
            })
            .await?;

            debug!("[{}] 已上传 {} ({} 字节)", run.deployment_id, remote_path, bytes);
            run.stats.files_uploaded += 1;
            run.stats.bytes_uploaded += bytes;
            run.emit(format!("已上传 {}", rel), rel.to_string()).await;
        }

        Ok(())
    }

    /// 预览部署：连接、扫描并计算同步计划，不修改远程目录
    pub async fn preview(
        &self,
        project: &ProjectFiles,
        credentials: &Credentials,
        config: &DeploymentConfig,
    ) -> Result<DeployPreview> {
        let matcher = self.prepare(project, credentials, config).await?;
        let transport = self.connector.connect(credentials).await?;

        let result = self
            .plan_remote(transport.as_ref(), project, config, &matcher)
            .await;

        if let Err(e) = transport.close().await {
            warn!("关闭会话失败: {}", e);
        }

        let (summary, uploads) = result?;
        Ok(DeployPreview {
            sync_mode: config.sync_mode,
            destination: config.destination.clone(),
            summary,
            uploads,
        })
    }

    async fn plan_remote(
        &self,
        transport: &dyn Transport,
        project: &ProjectFiles,
        config: &DeploymentConfig,
        matcher: &ExclusionMatcher,
    ) -> Result<(PlanSummary, Vec<String>)> {
        let local = LocalScanner::new(matcher.clone())
            .scan(&project.root)
            .await?;
        let remote = if config.sync_mode.needs_remote_scan() {
            RemoteScanner::new(matcher.clone(), self.retry_policy())
                .scan(transport, &config.destination)
                .await?
        } else {
            FileTree::new()
        };

        let plan = planner::plan(&local, &remote, config.sync_mode);
        let uploads = planner::ordered_paths(&plan)
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok((planner::summarize(&local, &plan), uploads))
    }
}
