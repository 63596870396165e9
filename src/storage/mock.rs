//! 测试用的传输客户端：记录上传并可注入失败

use super::{TransferSession, Transport};
use crate::config::SftpOptions;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Shared {
    uploaded: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    refuse_connect: bool,
    fail_paths: HashSet<String>,
    /// 远程路径 -> 成功前失败的次数
    flaky: HashMap<String, u32>,
    delay_ms: u64,
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn fail_on(mut self, remote_path: &str) -> Self {
        self.fail_paths.insert(remote_path.to_string());
        self
    }

    pub fn flaky(mut self, remote_path: &str, failures: u32) -> Self {
        self.flaky.insert(remote_path.to_string(), failures);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.shared.uploaded.lock().unwrap().clone()
    }

    pub fn attempts(&self, remote_path: &str) -> u32 {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .get(remote_path)
            .copied()
            .unwrap_or(0)
    }

    pub fn was_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, options: &SftpOptions) -> Result<Box<dyn TransferSession>> {
        if self.refuse_connect {
            return Err(anyhow!("connection refused: {}", options.endpoint()));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl TransferSession for MockTransport {
    async fn upload(&self, _local_path: &Path, remote_path: &str) -> Result<u64> {
        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let attempt = {
            let mut attempts = self.shared.attempts.lock().unwrap();
            let count = attempts.entry(remote_path.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_paths.contains(remote_path) {
            return Err(anyhow!("permission denied: {}", remote_path));
        }
        if let Some(failures) = self.flaky.get(remote_path) {
            if attempt <= *failures {
                return Err(anyhow!("connection reset: {}", remote_path));
            }
        }

        self.shared
            .uploaded
            .lock()
            .unwrap()
            .push(remote_path.to_string());
        Ok(1)
    }

    async fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
