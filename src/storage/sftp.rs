use super::{parent_dirs, TransferSession, Transport, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::SftpOptions;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use opendal::{layers::TimeoutLayer, Operator};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// 上传时每次读取的块大小
const UPLOAD_CHUNK: usize = 256 * 1024;

/// 基于 opendal sftp 服务的传输客户端
#[derive(Debug, Clone, Default)]
pub struct SftpTransport;

impl SftpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SftpTransport {
    async fn connect(&self, options: &SftpOptions) -> Result<Box<dyn TransferSession>> {
        use opendal::services::Sftp;

        let endpoint = options.endpoint();
        let mut builder = Sftp::default().endpoint(&endpoint).root("/");

        if !options.username.is_empty() {
            builder = builder.user(&options.username);
        }
        if let Some(ref key) = options.auth_credential {
            builder = builder.key(key);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        // 建立 ssh 连接并确认可访问
        operator
            .check()
            .await
            .with_context(|| format!("无法连接 {}", endpoint))?;

        let name = if options.username.is_empty() {
            format!("sftp://{}:{}", options.host, options.port)
        } else {
            format!("sftp://{}@{}:{}", options.username, options.host, options.port)
        };

        Ok(Box::new(SftpSession {
            operator: Mutex::new(Some(operator)),
            name,
        }))
    }
}

/// 一次运行的 sftp 会话
///
/// ssh 连接由 operator 持有，`close` 取出并释放它；之后的上传直接报错。
pub struct SftpSession {
    operator: Mutex<Option<Operator>>,
    name: String,
}

impl SftpSession {
    fn operator(&self) -> Result<Operator> {
        self.operator
            .lock()
            .map_err(|_| anyhow!("会话状态损坏: {}", self.name))?
            .clone()
            .ok_or_else(|| anyhow!("会话已关闭: {}", self.name))
    }
}

#[async_trait]
impl TransferSession for SftpSession {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let operator = self.operator()?;
        let path = remote_path.trim_start_matches('/');

        // 逐级创建父目录，已存在时的错误忽略
        for dir in parent_dirs(remote_path) {
            let _ = operator.create_dir(&dir).await;
        }

        let mut file = tokio::fs::File::open(local_path)
            .await
            .with_context(|| format!("无法打开本地文件 {:?}", local_path))?;
        let mut writer = operator.writer(path).await?;

        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(buf[..n].to_vec()).await?;
            total += n as u64;
        }
        writer.close().await?;

        debug!("写入完成: {} ({} 字节)", remote_path, total);
        Ok(total)
    }

    async fn close(&self) -> Result<()> {
        let operator = self
            .operator
            .lock()
            .map_err(|_| anyhow!("会话状态损坏: {}", self.name))?
            .take();
        match operator {
            // 释放最后一个 operator 时 ssh 连接断开
            Some(operator) => {
                drop(operator);
                debug!("关闭会话: {}", self.name);
                Ok(())
            }
            None => Err(anyhow!("会话已关闭: {}", self.name)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
