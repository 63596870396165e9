//! 配置模块

use crate::core::fingerprint::HashAlgorithm;
use crate::core::mapper::PathMapping;
use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpOptions {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    /// 私钥文件路径
    ///
    /// 只支持密钥认证：sftp 后端把它作为 ssh 私钥使用，不接受密码。为空时使用 ssh 默认密钥。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_credential: Option<String>,
    /// 远程基础目录，所有目标路径都拼接在它之下
    #[serde(default = "default_remote_base_dir")]
    pub remote_base_dir: String,
    #[serde(default)]
    pub algorithm: HashAlgorithm,
}

fn default_port() -> u16 {
    22
}

fn default_remote_base_dir() -> String {
    "/virtualsftp-tmp-01".to_string()
}

impl Default for SftpOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            auth_credential: None,
            remote_base_dir: default_remote_base_dir(),
            algorithm: HashAlgorithm::default(),
        }
    }
}

impl SftpOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// ssh 目标地址
    pub fn endpoint(&self) -> String {
        format!("ssh://{}:{}", self.host, self.port)
    }
}

/// 传输调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// 最大并发传输数，1 表示严格按顺序上传
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    /// 单个文件的最大重试次数
    #[serde(default)]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_retry_delay() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
            max_retries: 0,
            retry_base_delay_ms: default_retry_delay(),
        }
    }
}

/// 命令行使用的任务文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFile {
    #[serde(default)]
    pub options: SftpOptions,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub paths: Vec<PathMapping>,
    /// 指纹树快照文件，运行前读取、完成后写回
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_file: Option<PathBuf>,
    /// 设置后上传到该本地目录而不是 SFTP 主机
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_mirror: Option<PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let job: JobFile = serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_mirror.is_none() && self.options.host.trim().is_empty() {
            return Err(SyncError::Config("缺少 host".to_string()));
        }
        if self.sync.max_concurrent_transfers == 0 {
            return Err(SyncError::Config(
                "maxConcurrentTransfers 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}
