//! 差异比较 - 以内容摘要决定哪些文件需要上传

use crate::core::fingerprint::{FingerprintTree, HashAlgorithm};
use crate::core::scanner::{DiscoveredEntry, EntryKind};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 待上传的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    pub source_path: PathBuf,
    pub relative_path: String,
    pub target_path: String,
}

/// 一次运行的计划：完整的新指纹树和上传队列
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub expected_tree: FingerprintTree,
    pub uploads: Vec<UploadItem>,
    /// 遍历到的文件数（不含目录）
    pub files_scanned: usize,
    /// 摘要未变而跳过的文件数
    pub files_unchanged: usize,
    /// 无法读取而跳过的文件数
    pub hash_failures: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }
}

/// 差异比较器
#[derive(Debug, Clone)]
pub struct DiffEngine {
    algorithm: HashAlgorithm,
    current: Arc<FingerprintTree>,
}

impl DiffEngine {
    pub fn new(algorithm: HashAlgorithm, current: Arc<FingerprintTree>) -> Self {
        Self { algorithm, current }
    }

    /// 计算摘要、写入新指纹树并与上次的指纹树比较
    pub fn diff(&self, entries: Vec<DiscoveredEntry>) -> SyncPlan {
        let mut plan = SyncPlan::default();

        for entry in entries {
            match entry.kind {
                EntryKind::Dir => {
                    plan.expected_tree.insert_dir(&entry.target_path);
                }
                EntryKind::File => {
                    plan.files_scanned += 1;

                    // 列出后被删除或不可读的文件直接跳过
                    let digest = match self.algorithm.digest_file(&entry.source_path) {
                        Ok(d) => d,
                        Err(e) => {
                            warn!("计算摘要失败，跳过: {:?} - {}", entry.source_path, e);
                            plan.hash_failures += 1;
                            continue;
                        }
                    };

                    plan.expected_tree.insert_file(&entry.target_path, digest.clone());

                    if self.current.matches(&entry.target_path, &digest) {
                        debug!("文件未变化，跳过: {}", entry.target_path);
                        plan.files_unchanged += 1;
                        continue;
                    }

                    debug!("加入上传队列: {}", entry.target_path);
                    plan.uploads.push(UploadItem {
                        source_path: entry.source_path,
                        relative_path: entry.relative_path,
                        target_path: entry.target_path,
                    });
                }
            }
        }

        info!(
            "比较完成 ({}): {} 个文件, {} 个待上传, {} 个未变化, {} 个读取失败",
            self.algorithm,
            plan.files_scanned,
            plan.uploads.len(),
            plan.files_unchanged,
            plan.hash_failures
        );

        plan
    }
}
