//! 部署日志诊断

use regex::{Regex, RegexSet};
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub id: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: &'static str,
    pub severity: Severity,
}

struct Rule {
    pattern: &'static str,
    issue: Issue,
}

const RULES: &[Rule] = &[
    Rule {
        pattern: r"530 Login incorrect",
        issue: Issue {
            id: "ftp_login_error",
            kind: "auth_error",
            message: "FTP login failed. Check your username and password.",
            severity: Severity::High,
        },
    },
    Rule {
        pattern: r"Connection refused",
        issue: Issue {
            id: "connection_refused",
            kind: "connection_error",
            message: "Connection refused. Verify the hostname and that the server is accepting connections.",
            severity: Severity::High,
        },
    },
    Rule {
        pattern: r"Permission denied",
        issue: Issue {
            id: "permission_denied",
            kind: "permission_error",
            message: "Permission denied. Check that your user has write access to the remote directory.",
            severity: Severity::High,
        },
    },
    Rule {
        pattern: r"No such file",
        issue: Issue {
            id: "no_such_file",
            kind: "path_error",
            message: "Remote directory does not exist. Verify the remote path.",
            severity: Severity::Medium,
        },
    },
    Rule {
        pattern: r"Disk quota exceeded",
        issue: Issue {
            id: "quota_exceeded",
            kind: "quota_error",
            message: "Disk quota exceeded. Free up space or upgrade your hosting plan.",
            severity: Severity::High,
        },
    },
];

const UNKNOWN_ISSUE: Issue = Issue {
    id: "shared_hosting_unknown_error",
    kind: "unknown_error",
    message: "Unknown error occurred during deployment. Check the logs for details.",
    severity: Severity::Medium,
};

fn rule_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(RULES.iter().map(|r| r.pattern)).unwrap_or_else(|_| RegexSet::empty())
    })
}

fn failure_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"(?i)error|failed").ok())
        .as_ref()
}

/// 从部署日志中识别已知问题；无已知问题但日志含错误字样时返回通用问题
pub fn analyze_logs(logs: &str) -> Vec<Issue> {
    let mut issues: Vec<Issue> = rule_set()
        .matches(logs)
        .into_iter()
        .map(|idx| RULES[idx].issue.clone())
        .collect();

    if issues.is_empty() && failure_marker().is_some_and(|re| re.is_match(logs)) {
        issues.push(UNKNOWN_ISSUE);
    }

    issues
}
