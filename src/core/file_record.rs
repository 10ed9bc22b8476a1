//! 文件记录 - 本地与远程文件的统一描述

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::Path;

/// 修改时间容差（秒），远程协议常丢失亚秒精度
pub const MTIME_TOLERANCE_SECS: f64 = 1.0;

/// 相对路径 -> 文件记录
pub type FileTree = HashMap<String, FileRecord>;

/// 单个文件的元数据，构造后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    path: String,
    size: u64,
    mtime: f64,
    hash: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, size: u64, mtime: f64, hash: Option<String>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            size,
            mtime,
            hash,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> f64 {
        self.mtime
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// 判断两条记录是否为相同内容
    ///
    /// 两边都有 hash 时只比较 hash；否则要求路径、大小相同且修改时间相差不足 1 秒。
    pub fn same_content(&self, other: &FileRecord) -> bool {
        if let (Some(a), Some(b)) = (&self.hash, &other.hash) {
            return a == b;
        }

        self.path == other.path
            && self.size == other.size
            && (self.mtime - other.mtime).abs() < MTIME_TOLERANCE_SECS
    }
}

/// 规范化路径分隔符（统一使用 /，去掉首尾分隔符）
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// 计算数据的 BLAKE3 hash
pub fn calculate_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// 流式计算文件 hash，避免将大文件整个读入内存
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
