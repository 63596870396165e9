use super::{TransferSession, Transport};
use crate::config::SftpOptions;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 上传到本地目录的传输客户端，远程路径解析到 `root` 之下
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, _options: &SftpOptions) -> Result<Box<dyn TransferSession>> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).await?;
        }
        Ok(Box::new(LocalSession {
            base_path: self.root.clone(),
            name: format!("local:{}", self.root.display()),
        }))
    }
}

pub struct LocalSession {
    base_path: PathBuf,
    name: String,
}

impl LocalSession {
    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl TransferSession for LocalSession {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let full_path = self.resolve_path(remote_path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        let bytes = fs::copy(local_path, &temp_path).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(bytes)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
