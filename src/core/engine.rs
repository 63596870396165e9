use crate::config::{SftpOptions, SyncConfig};
use crate::core::comparator::{SyncPlan, UploadItem};
use crate::core::event::{EventSender, ProgressEvent, SyncEvent};
use crate::core::fingerprint::join_remote;
use crate::error::SyncError;
use crate::storage::{TransferSession, Transport};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 运行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Connecting,
    Transferring,
    Closing,
    Done,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: Uuid,
    pub start_time: i64,
    pub end_time: i64,
    pub connected: bool,
    pub files_scanned: usize,
    pub files_queued: usize,
    pub files_uploaded: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub bytes_transferred: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(run_id: Uuid, plan: &SyncPlan) -> Self {
        Self {
            run_id,
            start_time: chrono::Utc::now().timestamp(),
            end_time: 0,
            connected: false,
            files_scanned: plan.files_scanned,
            files_queued: plan.uploads.len(),
            files_uploaded: 0,
            files_skipped: plan.files_unchanged + plan.hash_failures,
            files_failed: 0,
            bytes_transferred: 0,
            errors: Vec::new(),
        }
    }
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    bytes_transferred: AtomicU64,
}

/// 上传调度器：一个会话，按队列上传，汇总结果并发出事件
pub struct UploadEngine {
    transport: Arc<dyn Transport>,
    options: Arc<SftpOptions>,
    config: SyncConfig,
}

impl UploadEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        options: Arc<SftpOptions>,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            options,
            config,
        }
    }

    fn enter(run_id: &Uuid, phase: &mut RunPhase, next: RunPhase) {
        debug!("运行 {} 阶段: {:?} -> {:?}", run_id, phase, next);
        *phase = next;
    }

    /// 执行一次运行
    ///
    /// 无论连接或单个文件是否失败，`Complete` 都会发出且只发出一次。
    /// 连接失败时携带的指纹树仍是本地计算结果，其中的文件实际并未上传。
    pub async fn execute(&self, run_id: Uuid, plan: SyncPlan, tx: EventSender) -> SyncReport {
        let mut report = SyncReport::new(run_id, &plan);
        let mut phase = RunPhase::Idle;
        let SyncPlan {
            expected_tree,
            uploads,
            ..
        } = plan;

        info!(
            "开始上传 {}: {} 个文件待上传, 远程目录 {}",
            run_id,
            uploads.len(),
            self.options.remote_base_dir
        );

        Self::enter(&run_id, &mut phase, RunPhase::Connecting);
        let session: Option<Arc<dyn TransferSession>> =
            match self.transport.connect(&self.options).await {
                Ok(s) => {
                    info!("已连接: {}", s.name());
                    report.connected = true;
                    let _ = tx.send(SyncEvent::Connect);
                    Some(Arc::from(s))
                }
                Err(e) => {
                    error!("连接失败: {:#}", e);
                    let err = SyncError::connection(&e);
                    report.errors.push(err.to_string());
                    let _ = tx.send(SyncEvent::Error(err));
                    None
                }
            };

        if let Some(session) = &session {
            Self::enter(&run_id, &mut phase, RunPhase::Transferring);
            self.transfer_all(session.clone(), uploads, &tx, &mut report)
                .await;
        }

        Self::enter(&run_id, &mut phase, RunPhase::Closing);
        let _ = tx.send(SyncEvent::Complete(expected_tree));

        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!("关闭会话失败: {:#}", e);
            }
        }

        Self::enter(&run_id, &mut phase, RunPhase::Done);
        report.end_time = chrono::Utc::now().timestamp();

        info!(
            "上传完成 {}: 成功 {}, 失败 {}, 跳过 {}, {} 字节",
            run_id,
            report.files_uploaded,
            report.files_failed,
            report.files_skipped,
            report.bytes_transferred
        );

        report
    }

    /// 按并发上限执行全部上传；上限为 1 时严格按队列顺序
    async fn transfer_all(
        &self,
        session: Arc<dyn TransferSession>,
        uploads: Vec<UploadItem>,
        tx: &EventSender,
        report: &mut SyncReport,
    ) {
        let total = uploads.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let stats = Arc::new(TransferStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));
        // 计数与进度发送在同一把锁内完成，保证 completed 不重复、不跳号
        let completed = Arc::new(Mutex::new(0usize));

        let mut handles = Vec::with_capacity(total);

        for item in uploads {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let session = session.clone();
            let stats = stats.clone();
            let errors = errors.clone();
            let completed = completed.clone();
            let tx = tx.clone();
            let remote_path = join_remote(&self.options.remote_base_dir, &item.target_path);
            let max_retries = self.config.max_retries;
            let retry_delay = self.config.retry_base_delay_ms;

            let handle = tokio::spawn(async move {
                let result = Self::upload_with_retry(
                    session.as_ref(),
                    &item,
                    &remote_path,
                    max_retries,
                    retry_delay,
                )
                .await;

                let mut done = completed.lock().await;
                *done += 1;

                match result {
                    Ok(bytes) => {
                        stats.files_completed.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
                        let _ = tx.send(SyncEvent::Progress(ProgressEvent::new(
                            &item, *done, total, true,
                        )));
                    }
                    Err(e) => {
                        stats.files_failed.fetch_add(1, Ordering::Relaxed);
                        let err = SyncError::transfer(&item.target_path, &e);
                        errors.write().await.push(err.to_string());
                        let _ = tx.send(SyncEvent::Progress(ProgressEvent::new(
                            &item, *done, total, false,
                        )));
                        let _ = tx.send(SyncEvent::Error(err));
                    }
                }

                drop(done);
                drop(permit);
            });

            handles.push(handle);
        }

        // 等待所有任务完成
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("上传任务异常退出: {}", e);
            }
        }

        report.files_uploaded = stats.files_completed.load(Ordering::Relaxed) as usize;
        report.files_failed = stats.files_failed.load(Ordering::Relaxed) as usize;
        report.bytes_transferred = stats.bytes_transferred.load(Ordering::Relaxed);
        report.errors.extend(errors.read().await.iter().cloned());
    }

    /// 带重试的单文件上传
    async fn upload_with_retry(
        session: &dyn TransferSession,
        item: &UploadItem,
        remote_path: &str,
        max_retries: u32,
        base_delay_ms: u64,
    ) -> anyhow::Result<u64> {
        let mut attempt = 0u32;
        loop {
            debug!("上传: {:?} -> {}", item.source_path, remote_path);
            match session.upload(&item.source_path, remote_path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < max_retries => {
                    // 指数退避
                    let delay = base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt));
                    attempt += 1;
                    warn!(
                        "上传失败，{}ms 后重试 ({}/{}): {} - {:#}",
                        delay, attempt, max_retries, remote_path, e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    error!("上传最终失败 (已重试{}次): {} - {:#}", attempt, remote_path, e);
                    return Err(e);
                }
            }
        }
    }
}
