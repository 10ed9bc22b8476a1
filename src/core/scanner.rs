use crate::core::exclusion::ExclusionMatcher;
use crate::core::file_record::{hash_file, FileRecord, FileTree};
use crate::error::{DeployError, Result};
use crate::transport::{join_remote, retry_transient, RemoteEntry, RetryPolicy, Transport};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 本地目录扫描器：遍历项目目录并计算每个文件的 hash
pub struct LocalScanner {
    matcher: ExclusionMatcher,
}

impl LocalScanner {
    pub fn new(matcher: ExclusionMatcher) -> Self {
        Self { matcher }
    }

    /// 扫描本地目录，返回相对路径 -> 文件记录
    ///
    /// 根目录不存在或不是目录时返回 `LocalIo`；单个文件读取失败只记录警告并跳过。
    pub async fn scan(&self, root: &Path) -> Result<FileTree> {
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|e| DeployError::local_io(root, e))?;
        if !metadata.is_dir() {
            return Err(DeployError::local_io(
                root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        info!("开始扫描本地目录: {:?}", root);

        let root = root.to_path_buf();
        let matcher = self.matcher.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let tree = tokio::task::spawn_blocking(move || scan_blocking(&root, &matcher))
            .await
            .map_err(|e| DeployError::Remote(format!("scan task failed: {}", e)))?;

        info!("本地扫描完成: {} 个文件", tree.len());
        Ok(tree)
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

fn scan_blocking(root: &PathBuf, matcher: &ExclusionMatcher) -> FileTree {
    let mut tree = FileTree::new();
    let mut special_count = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            // 被排除的目录整棵跳过
            match relative_path(root, entry.path()) {
                Some(rel) if !rel.is_empty() => !matcher.is_excluded(&rel),
                _ => true,
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("跳过无法访问的路径: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            if entry.depth() > 0 && !entry.file_type().is_dir() {
                special_count += 1;
            }
            continue;
        }

        let rel = match relative_path(root, entry.path()) {
            Some(rel) => rel,
            None => {
                warn!("跳过非 UTF-8 路径: {:?}", entry.path());
                continue;
            }
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("读取文件元数据失败，跳过 {}: {}", rel, e);
                continue;
            }
        };

        let hash = match hash_file(entry.path()) {
            Ok(h) => h,
            Err(e) => {
                warn!("读取文件失败，跳过 {}: {}", rel, e);
                continue;
            }
        };

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        tree.insert(rel.clone(), FileRecord::new(rel, metadata.len(), mtime, Some(hash)));
    }

    if special_count > 0 {
        debug!("跳过 {} 个非普通文件", special_count);
    }

    tree
}

/// 远程目录遍历结果
#[derive(Debug, Default)]
pub struct RemoteWalk {
    /// 未被排除的文件（相对路径, 列表项）
    pub files: Vec<(String, RemoteEntry)>,
    /// 未被排除且成功列出的目录（相对路径）
    pub dirs: Vec<String>,
    /// 被排除或无法列出的条目，清理时必须保留
    pub retained: Vec<String>,
}

/// 远程目录扫描器：通过传输层递归列目录，不计算 hash
pub struct RemoteScanner {
    matcher: ExclusionMatcher,
    retry: RetryPolicy,
}

impl RemoteScanner {
    pub fn new(matcher: ExclusionMatcher, retry: RetryPolicy) -> Self {
        Self { matcher, retry }
    }

    /// 扫描远程目录；根目录不存在时返回空树
    pub async fn scan(&self, transport: &dyn Transport, root: &str) -> Result<FileTree> {
        info!("开始扫描远程目录: {} {}", transport.name(), root);

        let walk = self.walk(transport, root).await?;
        let tree: FileTree = walk
            .files
            .into_iter()
            .map(|(rel, entry)| {
                let record = FileRecord::new(rel.clone(), entry.size, entry.mtime, None);
                (rel, record)
            })
            .collect();

        info!(
            "远程扫描完成: {} 个文件, {} 个目录, {} 个保留项",
            tree.len(),
            walk.dirs.len(),
            walk.retained.len()
        );
        Ok(tree)
    }

    /// 递归遍历远程目录
    ///
    /// 子目录无权限或已消失时跳过并记录警告；连接、认证错误中止遍历。
    pub async fn walk(&self, transport: &dyn Transport, root: &str) -> Result<RemoteWalk> {
        let mut walk = RemoteWalk::default();

        let root_entries = match self.list(transport, root).await {
            Ok(entries) => entries,
            Err(DeployError::NotFound(_)) => {
                debug!("远程目录不存在，视为空目录: {}", root);
                return Ok(walk);
            }
            Err(e) => return Err(e),
        };

        let mut pending: Vec<(String, Vec<RemoteEntry>)> = vec![(String::new(), root_entries)];

        while let Some((prefix, entries)) = pending.pop() {
            for entry in entries {
                let rel = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };

                if self.matcher.is_excluded(&rel) {
                    walk.retained.push(rel);
                    continue;
                }

                if !entry.is_dir {
                    walk.files.push((rel, entry));
                    continue;
                }

                let remote_dir = join_remote(root, &rel);
                match self.list(transport, &remote_dir).await {
                    Ok(children) => {
                        walk.dirs.push(rel.clone());
                        pending.push((rel, children));
                    }
                    Err(e @ DeployError::Permission(_)) | Err(e @ DeployError::NotFound(_)) => {
                        warn!("跳过无法列出的远程目录 {}: {}", remote_dir, e);
                        walk.retained.push(rel);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(walk)
    }

    async fn list(&self, transport: &dyn Transport, path: &str) -> Result<Vec<RemoteEntry>> {
        let what = format!("list {}", path);
        retry_transient(self.retry, transport, &what, move || transport.list_directory(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use async_trait::async_trait;
    use std::fs;

    /// 对指定目录返回 550 的传输
    struct DeniedListing {
        inner: LocalTransport,
        denied: &'static str,
    }

    #[async_trait]
    impl Transport for DeniedListing {
        async fn ensure_directory(&self, path: &str) -> Result<()> {
            self.inner.ensure_directory(path).await
        }

        async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
            self.inner.upload_file(local_path, remote_path).await
        }

        async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
            if path == self.denied {
                return Err(DeployError::Permission(format!("550 {}: Permission denied", path)));
            }
            self.inner.list_directory(path).await
        }

        async fn delete_file(&self, path: &str) -> Result<()> {
            self.inner.delete_file(path).await
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
            "denied-listing"
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_local_scan_hashes_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<html></html>");
        write(dir.path(), "css/site.css", "body{}");
        write(dir.path(), "node_modules/pkg/index.js", "module.exports={}");
        write(dir.path(), ".git/HEAD", "ref: main");
        write(dir.path(), "debug.log", "noise");

        let matcher = ExclusionMatcher::new(&["node_modules", ".git", "*.log"]).unwrap();
        let tree = LocalScanner::new(matcher).scan(dir.path()).await.unwrap();

        let mut paths: Vec<_> = tree.keys().cloned().collect();
        paths.sort();
        assert_eq!(paths, vec!["css/site.css", "index.html"]);

        let record = &tree["css/site.css"];
        assert_eq!(record.size(), 6);
        assert_eq!(
            record.hash(),
            Some(crate::core::file_record::calculate_hash(b"body{}").as_str())
        );
    }

    #[tokio::test]
    async fn test_local_scan_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalScanner::new(ExclusionMatcher::empty())
            .scan(&dir.path().join("missing"))
            .await;
        assert!(matches!(result, Err(DeployError::LocalIo { .. })));
    }

    #[tokio::test]
    async fn test_local_scan_root_is_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "file.txt", "x");
        let result = LocalScanner::new(ExclusionMatcher::empty())
            .scan(&dir.path().join("file.txt"))
            .await;
        assert!(matches!(result, Err(DeployError::LocalIo { .. })));
    }

    #[tokio::test]
    async fn test_remote_scan_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path()).unwrap();
        let scanner = RemoteScanner::new(ExclusionMatcher::empty(), RetryPolicy::default());

        let tree = scanner.scan(&transport, "/not/there").await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn test_remote_scan_has_no_hashes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "www/index.html", "hello");
        write(dir.path(), "www/js/app.js", "console.log(1)");
        write(dir.path(), "www/logs/app.log", "x");

        let transport = LocalTransport::new(dir.path()).unwrap();
        let matcher = ExclusionMatcher::new(&["*.log"]).unwrap();
        let scanner = RemoteScanner::new(matcher, RetryPolicy::default());

        let walk = scanner.walk(&transport, "/www").await.unwrap();
        assert_eq!(walk.retained, vec!["logs/app.log".to_string()]);

        let tree = scanner.scan(&transport, "/www").await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree["js/app.js"].size(), 14);
        assert!(tree.values().all(|r| r.hash().is_none()));
    }

    #[tokio::test]
    async fn test_remote_scan_skips_denied_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "www/index.html", "hello");
        write(dir.path(), "www/private/secret.txt", "s");
        write(dir.path(), "www/js/app.js", "run()");

        let transport = DeniedListing {
            inner: LocalTransport::new(dir.path()).unwrap(),
            denied: "/www/private",
        };
        let scanner = RemoteScanner::new(ExclusionMatcher::empty(), RetryPolicy::default());

        let walk = scanner.walk(&transport, "/www").await.unwrap();
        assert_eq!(walk.retained, vec!["private".to_string()]);
        assert_eq!(walk.dirs, vec!["js".to_string()]);

        let tree = scanner.scan(&transport, "/www").await.unwrap();
        let mut paths: Vec<_> = tree.keys().cloned().collect();
        paths.sort();
        assert_eq!(paths, vec!["index.html", "js/app.js"]);
    }
}
