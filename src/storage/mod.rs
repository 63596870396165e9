pub mod local;
#[cfg(test)]
pub(crate) mod mock;
pub mod sftp;

use crate::config::SftpOptions;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub use local::LocalTransport;
pub use sftp::SftpTransport;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- 连接检查、建目录等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 写文件
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 传输客户端：每次运行建立一个会话
#[async_trait]
pub trait Transport: Send + Sync {
    /// 建立会话
    async fn connect(&self, options: &SftpOptions) -> Result<Box<dyn TransferSession>>;
}

/// 已建立的传输会话
#[async_trait]
pub trait TransferSession: Send + Sync {
    /// 上传本地文件到远程路径，返回写入的字节数
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64>;

    /// 关闭会话
    async fn close(&self) -> Result<()>;

    /// 会话名称（用于日志）
    fn name(&self) -> &str;
}

/// 远程路径的各级父目录（不含根），例如 `/a/b/c.txt` -> `a/`, `a/b/`
pub(crate) fn parent_dirs(remote_path: &str) -> Vec<String> {
    let trimmed = remote_path.trim_start_matches('/');
    let parts: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    let mut dirs = Vec::new();
    let mut current = String::new();
    for part in parts.iter().take(parts.len().saturating_sub(1)) {
        current.push_str(part);
        current.push('/');
        dirs.push(current.clone());
    }
    dirs
}
