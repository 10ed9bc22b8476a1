//! 排除规则匹配
//!
//! 不含 `/` 的规则按路径的每一段匹配（`node_modules` 会排除任意层级的 node_modules 目录及其内容，
//! 但不会排除 `my_node_modules_notes.txt`）；含 `/` 的规则按完整相对路径匹配。

use crate::error::{DeployError, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

#[derive(Debug, Clone)]
pub struct ExclusionMatcher {
    segment_set: GlobSet,
    path_set: GlobSet,
    patterns: Vec<String>,
}

impl ExclusionMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut segment_builder = GlobSetBuilder::new();
        let mut path_builder = GlobSetBuilder::new();
        let mut kept = Vec::new();

        for raw in patterns {
            let pattern = raw.as_ref().trim();
            // ".git/**" 与 ".git" 等价
            let pattern = pattern.strip_suffix("/**").unwrap_or(pattern);
            let pattern = pattern.trim_matches('/');
            if pattern.is_empty() {
                continue;
            }

            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    DeployError::InvalidConfig(format!("invalid exclusion '{}': {}", pattern, e))
                })?;

            if pattern.contains('/') {
                path_builder.add(glob);
            } else {
                segment_builder.add(glob);
            }
            kept.push(pattern.to_string());
        }

        let build = |builder: GlobSetBuilder| {
            builder
                .build()
                .map_err(|e| DeployError::InvalidConfig(format!("invalid exclusions: {}", e)))
        };

        Ok(Self {
            segment_set: build(segment_builder)?,
            path_set: build(path_builder)?,
            patterns: kept,
        })
    }

    /// 不排除任何路径
    pub fn empty() -> Self {
        Self {
            segment_set: GlobSet::empty(),
            path_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// 相对路径（`/` 分隔）是否被排除
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let path = relative_path.trim_matches('/');
        if path.is_empty() {
            return false;
        }

        if path.split('/').any(|segment| self.segment_set.is_match(segment)) {
            return true;
        }

        if self.path_set.is_empty() {
            return false;
        }

        // 任一前缀匹配即排除（目录规则作用于其下所有内容）
        let mut prefix_end = 0;
        for segment in path.split('/') {
            prefix_end += segment.len();
            if self.path_set.is_match(&path[..prefix_end]) {
                return true;
            }
            prefix_end += 1;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_matching() {
        let matcher = ExclusionMatcher::new(&["node_modules", "*.log", ".git"]).unwrap();

        assert!(matcher.is_excluded("node_modules/react/index.js"));
        assert!(matcher.is_excluded("packages/web/node_modules/x.js"));
        assert!(matcher.is_excluded("app.log"));
        assert!(matcher.is_excluded("logs/today/app.log"));
        assert!(matcher.is_excluded(".git/HEAD"));

        assert!(!matcher.is_excluded("my_node_modules_notes.txt"));
        assert!(!matcher.is_excluded("catalog/index.html"));
        assert!(!matcher.is_excluded(".github/workflow.yml"));
    }

    #[test]
    fn test_wildcard_does_not_cross_segments() {
        let matcher = ExclusionMatcher::new(&["*.pyc"]).unwrap();
        assert!(matcher.is_excluded("pkg/__init__.pyc"));
        assert!(!matcher.is_excluded("pkg.pyc.d/readme.txt"));
    }

    #[test]
    fn test_path_patterns() {
        let matcher = ExclusionMatcher::new(&["assets/*.map", "build/tmp", ".svn/**"]).unwrap();

        assert!(matcher.is_excluded("assets/app.js.map"));
        assert!(!matcher.is_excluded("assets/app.js"));
        assert!(!matcher.is_excluded("vendor/assets/app.js.map"));
        assert!(matcher.is_excluded("build/tmp/cache.bin"));
        assert!(matcher.is_excluded(".svn/entries"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = ExclusionMatcher::new(&["[unclosed"]);
        assert!(matches!(result, Err(DeployError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_matcher() {
        let matcher = ExclusionMatcher::empty();
        assert!(!matcher.is_excluded("anything/at/all.txt"));
    }
}
