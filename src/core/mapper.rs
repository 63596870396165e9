//! 路径映射 - 本地源路径到远程目标目录

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 单条映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    pub local_path: PathBuf,
    /// 为空时取本地路径的文件名
    #[serde(default)]
    pub remote_target_dir: String,
}

impl PathMapping {
    pub fn new(local_path: impl Into<PathBuf>, remote_target_dir: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_target_dir: remote_target_dir.into(),
        }
    }

    /// 实际使用的目标目录
    pub fn effective_target(&self) -> String {
        if self.remote_target_dir.trim().is_empty() {
            self.local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            self.remote_target_dir.clone()
        }
    }
}

/// 映射表，按本地路径去重
#[derive(Debug, Clone, Default)]
pub struct PathMap {
    entries: BTreeMap<PathBuf, String>,
}

impl PathMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或覆盖映射；结尾分隔符不同的同一路径视为同一个键
    pub fn insert(&mut self, local_path: impl AsRef<Path>, remote_target: Option<&str>) {
        let key: PathBuf = local_path.as_ref().components().collect();
        self.entries
            .insert(key, remote_target.unwrap_or_default().to_string());
    }

    /// 本次运行的不可变快照
    pub fn snapshot(&self) -> Vec<PathMapping> {
        self.entries
            .iter()
            .map(|(local, target)| PathMapping::new(local.clone(), target.clone()))
            .collect()
    }
}
