//! 备份与清理：部署前对远程目标目录做快照，按排除规则清理旧文件

use crate::core::exclusion::ExclusionMatcher;
use crate::core::scanner::RemoteScanner;
use crate::error::{DeployError, Result};
use crate::transport::{join_remote, retry_transient, RetryPolicy, Transport};
use tracing::{debug, info, warn};

/// 生成备份目录名：`/www` + 1700000000 -> `/www_backup_1700000000`
pub fn backup_path(destination: &str, timestamp: i64) -> String {
    format!("{}_backup_{}", destination.trim_end_matches('/'), timestamp)
}

fn is_root(destination: &str) -> bool {
    destination.trim_matches('/').is_empty()
}

pub struct BackupManager {
    retry: RetryPolicy,
}

impl BackupManager {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// 备份目标目录，返回备份路径
    ///
    /// 目标为服务器根目录、不存在或为空时跳过并返回 `None`。
    /// 优先使用服务器端复制，不支持时通过会话逐个文件中转。
    pub async fn backup(
        &self,
        transport: &dyn Transport,
        destination: &str,
        timestamp: i64,
    ) -> Result<Option<String>> {
        if is_root(destination) {
            warn!("目标为服务器根目录，跳过备份: {}", destination);
            return Ok(None);
        }

        let scanner = RemoteScanner::new(ExclusionMatcher::empty(), self.retry);
        let walk = scanner.walk(transport, destination).await?;
        if walk.files.is_empty() && walk.dirs.is_empty() {
            info!("目标目录不存在或为空，无需备份: {}", destination);
            return Ok(None);
        }

        let target = backup_path(destination, timestamp);
        info!("开始备份 {} -> {}", destination, target);

        match transport.copy_tree(destination, &target).await {
            Ok(()) => {
                info!("服务器端复制完成: {}", target);
                return Ok(Some(target));
            }
            Err(DeployError::Unsupported(reason)) => {
                debug!("不支持服务器端复制，改为中转复制: {}", reason);
            }
            Err(e) => return Err(e),
        }

        transport.ensure_directory(&target).await?;

        let mut dirs = walk.dirs.clone();
        dirs.sort();
        for dir in &dirs {
            transport.ensure_directory(&join_remote(&target, dir)).await?;
        }

        for (rel, _) in &walk.files {
            let from = join_remote(destination, rel);
            let to = join_remote(&target, rel);
            let (from, to) = (from.as_str(), to.as_str());

            let data = retry_transient(self.retry, transport, from, move || {
                transport.read_file(from)
            })
            .await?;
            let data = &data;
            retry_transient(self.retry, transport, to, move || {
                transport.write_file(to, data.clone())
            })
            .await?;
        }

        if !walk.retained.is_empty() {
            warn!("备份时跳过 {} 个无法读取的目录", walk.retained.len());
        }

        info!("中转备份完成: {} 个文件 -> {}", walk.files.len(), target);
        Ok(Some(target))
    }

    /// 清理目标目录中未被排除的文件，再自深向浅删除空目录，返回删除的文件数
    ///
    /// 权限、连接、认证错误及重试耗尽直接返回；其他单项错误记录警告后继续。
    pub async fn clean(
        &self,
        transport: &dyn Transport,
        destination: &str,
        matcher: &ExclusionMatcher,
    ) -> Result<usize> {
        info!("开始清理远程目录: {}", destination);

        let scanner = RemoteScanner::new(matcher.clone(), self.retry);
        let walk = scanner.walk(transport, destination).await?;

        let mut deleted = 0usize;
        let mut failed: Vec<String> = Vec::new();

        for (rel, _) in &walk.files {
            let path = join_remote(destination, rel);
            let target = path.as_str();
            match retry_transient(self.retry, transport, target, move || {
                transport.delete_file(target)
            })
            .await
            {
                Ok(()) => {
                    debug!("已删除: {}", path);
                    deleted += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("删除文件失败，跳过 {}: {}", path, e);
                    failed.push(rel.clone());
                }
            }
        }

        // 最深的目录先删
        let mut dirs = walk.dirs.clone();
        dirs.sort_by(|a, b| {
            b.matches('/')
                .count()
                .cmp(&a.matches('/').count())
                .then_with(|| b.cmp(a))
        });

        let mut kept = 0usize;
        for dir in &dirs {
            let prefix = format!("{}/", dir);
            let has_kept_children = walk
                .retained
                .iter()
                .chain(failed.iter())
                .any(|p| p.starts_with(&prefix));
            if has_kept_children {
                kept += 1;
                failed.push(dir.clone());
                continue;
            }

            let path = join_remote(destination, dir);
            match transport.remove_directory(&path).await {
                Ok(()) => debug!("已删除目录: {}", path),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("删除目录失败，跳过 {}: {}", path, e);
                    failed.push(dir.clone());
                }
            }
        }

        info!(
            "清理完成: 删除 {} 个文件, 保留 {} 项, {} 个目录含保留内容",
            deleted,
            walk.retained.len(),
            kept
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LocalTransport, RemoteEntry};
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 删除时返回指定错误的传输
    struct FailingDeletes {
        inner: LocalTransport,
        error: fn(&str) -> DeployError,
        deletes: AtomicU32,
    }

    #[async_trait]
    impl Transport for FailingDeletes {
        async fn ensure_directory(&self, path: &str) -> Result<()> {
            self.inner.ensure_directory(path).await
        }

        async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
            self.inner.upload_file(local_path, remote_path).await
        }

        async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
            self.inner.list_directory(path).await
        }

        async fn delete_file(&self, path: &str) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Err((self.error)(path))
        }

        async fn remove_directory(&self, path: &str) -> Result<()> {
            self.inner.remove_directory(path).await
        }

        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.inner.read_file(path).await
        }

        async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
            self.inner.write_file(path, data).await
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "failing-deletes"
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn manager() -> BackupManager {
        BackupManager::new(RetryPolicy::default())
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(backup_path("/www", 1700000000), "/www_backup_1700000000");
        assert_eq!(backup_path("/www/", 42), "/www_backup_42");
        assert_eq!(backup_path("public_html", 1), "public_html_backup_1");
    }

    #[tokio::test]
    async fn test_backup_relays_files_when_copy_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "www/index.html", "v1");
        write(dir.path(), "www/css/site.css", "body{}");
        fs::create_dir_all(dir.path().join("www/empty")).unwrap();

        let transport = LocalTransport::new(dir.path()).unwrap();
        let path = manager()
            .backup(&transport, "/www", 1700000000)
            .await
            .unwrap();

        assert_eq!(path.as_deref(), Some("/www_backup_1700000000"));
        let backup = dir.path().join("www_backup_1700000000");
        assert_eq!(fs::read_to_string(backup.join("index.html")).unwrap(), "v1");
        assert_eq!(fs::read_to_string(backup.join("css/site.css")).unwrap(), "body{}");
        assert!(backup.join("empty").is_dir());
        // 原目录不变
        assert_eq!(fs::read_to_string(dir.path().join("www/index.html")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_backup_skips_root_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "v1");
        let transport = LocalTransport::new(dir.path()).unwrap();

        assert_eq!(manager().backup(&transport, "/", 1).await.unwrap(), None);
        assert_eq!(manager().backup(&transport, "/missing", 1).await.unwrap(), None);

        fs::create_dir_all(dir.path().join("blank")).unwrap();
        assert_eq!(manager().backup(&transport, "/blank", 1).await.unwrap(), None);
        assert!(!dir.path().join("blank_backup_1").exists());
    }

    #[tokio::test]
    async fn test_clean_keeps_excluded_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "site/app.log", "log");
        write(dir.path(), "site/index.html", "old");

        let transport = LocalTransport::new(dir.path()).unwrap();
        let matcher = ExclusionMatcher::new(&["*.log"]).unwrap();
        let deleted = manager().clean(&transport, "/site", &matcher).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(dir.path().join("site/app.log").exists());
        assert!(!dir.path().join("site/index.html").exists());
    }

    #[tokio::test]
    async fn test_clean_removes_empty_dirs_and_keeps_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "site/a/b/c.txt", "x");
        write(dir.path(), "site/a/d.txt", "x");
        write(dir.path(), "site/logs/keep.log", "x");
        write(dir.path(), "site/.well-known/acme", "token");

        let transport = LocalTransport::new(dir.path()).unwrap();
        let matcher = ExclusionMatcher::new(&["*.log", ".well-known"]).unwrap();
        let deleted = manager().clean(&transport, "/site", &matcher).await.unwrap();

        assert_eq!(deleted, 2);
        assert!(!dir.path().join("site/a").exists());
        assert!(dir.path().join("site/logs/keep.log").exists());
        assert!(dir.path().join("site/.well-known/acme").exists());
        assert!(dir.path().join("site").is_dir());
    }

    #[tokio::test]
    async fn test_clean_missing_destination_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path()).unwrap();
        let deleted = manager()
            .clean(&transport, "/nothing", &ExclusionMatcher::empty())
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_clean_aborts_on_fatal_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "site/a.html", "a");
        write(dir.path(), "site/b.html", "b");

        let fatal: [fn(&str) -> DeployError; 3] = [
            |p| DeployError::Connection(format!("session dropped before {}", p)),
            |p| DeployError::Authentication(format!("530 while deleting {}", p)),
            |p| DeployError::Permission(format!("550 {}", p)),
        ];
        for error in fatal {
            let transport = FailingDeletes {
                inner: LocalTransport::new(dir.path()).unwrap(),
                error,
                deletes: AtomicU32::new(0),
            };
            let result = manager()
                .clean(&transport, "/site", &ExclusionMatcher::empty())
                .await;

            assert!(result.as_ref().is_err_and(|e| e.is_fatal()), "{:?}", result);
            // 第一个文件失败即停止
            assert_eq!(transport.deletes.load(Ordering::SeqCst), 1);
        }
        assert!(dir.path().join("site/a.html").exists());
    }

    #[tokio::test]
    async fn test_clean_skips_entries_with_other_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "site/a/x.html", "x");
        write(dir.path(), "site/b.html", "b");

        let transport = FailingDeletes {
            inner: LocalTransport::new(dir.path()).unwrap(),
            error: |p| DeployError::Remote(format!("450 {} busy", p)),
            deletes: AtomicU32::new(0),
        };
        let deleted = manager()
            .clean(&transport, "/site", &ExclusionMatcher::empty())
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(transport.deletes.load(Ordering::SeqCst), 2);
        // 含删除失败文件的目录保留
        assert!(dir.path().join("site/a/x.html").exists());
    }
}
