//! 内容指纹 - 摘要算法与指纹树

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use sha1::Digest as _;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// 目录占位符（目录没有内容摘要）
pub const DIR_MARKER: &str = "";

/// 流式读取的块大小
const READ_CHUNK: usize = 64 * 1024;

/// 摘要算法
///
/// 只用于判断内容是否变化，不提供任何安全保证。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => write!(f, "md5"),
            HashAlgorithm::Sha1 => write!(f, "sha1"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(SyncError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl HashAlgorithm {
    /// 计算任意读取源的摘要（小写十六进制）
    pub fn digest_reader<R: Read>(self, mut reader: R) -> io::Result<String> {
        let mut buf = vec![0u8; READ_CHUNK];
        match self {
            HashAlgorithm::Md5 => {
                let mut ctx = md5::Context::new();
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    ctx.consume(&buf[..n]);
                }
                Ok(format!("{:x}", ctx.compute()))
            }
            HashAlgorithm::Sha1 => {
                let mut hasher = sha1::Sha1::new();
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(format!("{:x}", hasher.finalize()))
            }
            HashAlgorithm::Sha256 => {
                let mut hasher = sha2::Sha256::new();
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(format!("{:x}", hasher.finalize()))
            }
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(hasher.finalize().to_hex().to_string())
            }
        }
    }

    pub fn digest_bytes(self, data: &[u8]) -> String {
        // 内存读取不会失败
        self.digest_reader(data).unwrap_or_default()
    }

    /// 计算文件内容摘要
    pub fn digest_file(self, path: &Path) -> io::Result<String> {
        let file = File::open(path)?;
        self.digest_reader(file)
    }
}

/// 指纹树：规范化目标路径 -> 内容摘要（目录为空占位符）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct FingerprintTree {
    entries: BTreeMap<String, String>,
}

impl FingerprintTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录文件摘要，返回被覆盖的旧值
    pub fn insert_file(&mut self, path: &str, digest: impl Into<String>) -> Option<String> {
        self.entries.insert(normalize_target(path), digest.into())
    }

    pub fn insert_dir(&mut self, path: &str) -> Option<String> {
        self.entries
            .insert(normalize_target(path), DIR_MARKER.to_string())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(&normalize_target(path)).map(String::as_str)
    }

    /// 目标路径是否以完全相同的摘要存在
    pub fn matches(&self, path: &str, digest: &str) -> bool {
        self.get(path) == Some(digest)
    }

    /// 删除条目，下次运行时该路径会重新上传
    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.entries.remove(&normalize_target(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for FingerprintTree {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(k, v)| (normalize_target(k.as_ref()), v.into()))
            .collect();
        Self { entries }
    }
}

impl From<BTreeMap<String, String>> for FingerprintTree {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<FingerprintTree> for BTreeMap<String, String> {
    fn from(tree: FingerprintTree) -> Self {
        tree.entries
    }
}

impl From<std::collections::HashMap<String, String>> for FingerprintTree {
    fn from(map: std::collections::HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// 规范化目标路径：`/` 分隔，以 `/` 开头，无结尾分隔符，去掉空段和 `.`
pub fn normalize_target(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for part in path.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// 拼接远程基础目录与目标路径
pub fn join_remote(base: &str, target: &str) -> String {
    let base = normalize_target(base);
    let target = normalize_target(target);
    match (base.as_str(), target.as_str()) {
        ("/", t) => t.to_string(),
        (b, "/") => b.to_string(),
        (b, t) => format!("{}{}", b, t),
    }
}
