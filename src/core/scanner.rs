//! 目录遍历 - 把映射展开为文件与目录条目

use crate::core::fingerprint::normalize_target;
use crate::core::mapper::PathMapping;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// 遍历得到的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEntry {
    pub kind: EntryKind,
    /// 本地绝对（或调用方给定形式的）路径
    pub source_path: PathBuf,
    /// 相对映射根的路径，`/` 分隔
    pub relative_path: String,
    /// 规范化后的远程目标路径
    pub target_path: String,
}

/// 目录遍历器
///
/// 不跟随目录内部的符号链接，符号链接和特殊文件既不上传也不记录。
#[derive(Debug, Clone, Default)]
pub struct TreeWalker;

impl TreeWalker {
    pub fn new() -> Self {
        Self
    }

    /// 遍历全部映射
    pub fn walk_all(&self, mappings: &[PathMapping]) -> Vec<DiscoveredEntry> {
        let mut entries = Vec::new();
        for mapping in mappings {
            entries.extend(self.walk(mapping));
        }
        entries
    }

    /// 展开单条映射；本地路径不存在时返回空
    pub fn walk(&self, mapping: &PathMapping) -> Vec<DiscoveredEntry> {
        let root = mapping.local_path.as_path();
        let target = mapping.effective_target();

        let metadata = match std::fs::metadata(root) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("本地路径不存在，跳过: {:?}", root);
                return Vec::new();
            }
            Err(e) => {
                warn!("无法访问本地路径，跳过: {:?} - {}", root, e);
                return Vec::new();
            }
        };

        if metadata.is_file() {
            let relative_path = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return vec![DiscoveredEntry {
                kind: EntryKind::File,
                source_path: root.to_path_buf(),
                relative_path,
                target_path: normalize_target(&target),
            }];
        }

        if !metadata.is_dir() {
            debug!("既不是文件也不是目录，跳过: {:?}", root);
            return Vec::new();
        }

        let mut entries = Vec::new();
        let mut skipped = 0usize;

        // walkdir 内部用显式栈遍历，不会因目录过深而递归溢出
        for item in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
        {
            let entry = match item {
                Ok(e) => e,
                Err(e) => {
                    warn!("遍历出错，继续: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let file_type = entry.file_type();
            let kind = if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                debug!("跳过符号链接或特殊文件: {:?}", entry.path());
                skipped += 1;
                continue;
            };

            let relative_path = match entry.path().strip_prefix(root) {
                Ok(rel) => to_slash(rel),
                Err(_) => continue,
            };

            entries.push(DiscoveredEntry {
                kind,
                source_path: entry.path().to_path_buf(),
                target_path: normalize_target(&format!("{}/{}", target, relative_path)),
                relative_path,
            });
        }

        info!(
            "遍历完成: {:?} -> {}, {} 个条目, {} 个跳过",
            root,
            normalize_target(&target),
            entries.len(),
            skipped
        );

        entries
    }
}

/// 相对路径转为 `/` 分隔的字符串
fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
