//! 同步计划：根据同步模式决定需要上传的文件

use crate::core::file_record::FileTree;
use crate::models::SyncMode;
use serde::Serialize;

/// 需要上传的文件（值为本地记录）
pub type SyncPlan = FileTree;

/// 计算同步计划（纯函数）
pub fn plan(local: &FileTree, remote: &FileTree, mode: SyncMode) -> SyncPlan {
    local
        .iter()
        .filter(|(path, record)| match mode {
            SyncMode::Full => true,
            SyncMode::Incremental => !remote.contains_key(*path),
            SyncMode::Smart => match remote.get(*path) {
                Some(existing) => !record.same_content(existing),
                None => true,
            },
        })
        .map(|(path, record)| (path.clone(), record.clone()))
        .collect()
}

/// 计划统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub total_files: usize,
    pub upload_count: usize,
    pub skip_count: usize,
    pub upload_bytes: u64,
}

pub fn summarize(local: &FileTree, plan: &SyncPlan) -> PlanSummary {
    PlanSummary {
        total_files: local.len(),
        upload_count: plan.len(),
        skip_count: local.len().saturating_sub(plan.len()),
        upload_bytes: plan.values().map(|r| r.size()).sum(),
    }
}

/// 按路径排序的上传顺序，保证日志稳定
pub fn ordered_paths(plan: &SyncPlan) -> Vec<&str> {
    let mut paths: Vec<&str> = plan.keys().map(String::as_str).collect();
    paths.sort_unstable();
    paths
}
