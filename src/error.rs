//! 错误类型

use thiserror::Error;

/// 同步过程中对外可见的错误
///
/// 丢失的本地路径和无法读取的文件不在此列：它们在扫描阶段被吸收，只记录日志。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 传输会话建立失败或中途断开
    #[error("连接失败: {0}")]
    Connection(String),

    /// 单个文件上传失败
    #[error("上传失败 {target}: {message}")]
    Transfer { target: String, message: String },

    /// 不在 tokio 运行时内，无法启动后台运行
    #[error("运行时不可用: {0}")]
    Runtime(String),

    /// 不支持的摘要算法
    #[error("不支持的摘要算法: {0}")]
    UnsupportedAlgorithm(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// 从底层传输错误构造，保留完整的错误链
    pub fn transfer(target: impl Into<String>, err: &anyhow::Error) -> Self {
        SyncError::Transfer {
            target: target.into(),
            message: format!("{:#}", err),
        }
    }

    pub fn connection(err: &anyhow::Error) -> Self {
        SyncError::Connection(format!("{:#}", err))
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
