//! 运行事件与运行句柄

use crate::core::comparator::UploadItem;
use crate::core::engine::SyncReport;
use crate::core::fingerprint::FingerprintTree;
use crate::error::SyncError;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

/// 事件发送端
pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// 单个文件传输结束（成功或失败）后的进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub source_path: PathBuf,
    pub relative_path: String,
    pub target_path: String,
    /// 0..=100，按上传队列总数计算
    pub percent: u8,
    pub completed: usize,
    pub total: usize,
    pub succeeded: bool,
}

impl ProgressEvent {
    pub(crate) fn new(item: &UploadItem, completed: usize, total: usize, succeeded: bool) -> Self {
        Self {
            source_path: item.source_path.clone(),
            relative_path: item.relative_path.clone(),
            target_path: item.target_path.clone(),
            percent: percent(completed, total),
            completed,
            total,
            succeeded,
        }
    }
}

/// 四舍五入的百分比
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((completed * 200 + total) / (2 * total)) as u8
}

/// 一次运行向调用方发出的事件
///
/// 顺序保证：`Connect` 至多一次且在所有 `Progress` 之前；`Progress` 的 completed 严格递增；
/// `Complete` 恰好一次且是最后一个事件。
#[derive(Debug)]
pub enum SyncEvent {
    Connect,
    Progress(ProgressEvent),
    Error(SyncError),
    /// 本次计算的完整指纹树，调用方应保存作为下次的基准
    Complete(FingerprintTree),
}

/// 从事件流中得到可以保存的指纹树
///
/// `Complete` 里的树包含本次扫描到的全部摘要，不管文件是否真正上传。连接失败时整棵树
/// 都不可信，不保存；上传失败的目标从树中删除，下次运行会重新上传。
#[derive(Debug, Default)]
pub struct TreeRecorder {
    connection_failed: bool,
    failed_targets: Vec<String>,
    tree: Option<FingerprintTree>,
}

impl TreeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Error(SyncError::Connection(_)) => self.connection_failed = true,
            SyncEvent::Error(SyncError::Transfer { target, .. }) => {
                self.failed_targets.push(target.clone())
            }
            SyncEvent::Complete(tree) => self.tree = Some(tree.clone()),
            _ => {}
        }
    }

    pub fn failed_targets(&self) -> &[String] {
        &self.failed_targets
    }

    /// 连接失败或没有收到 `Complete` 时返回 `None`
    pub fn into_tree(self) -> Option<FingerprintTree> {
        if self.connection_failed {
            return None;
        }
        let mut tree = self.tree?;
        for target in &self.failed_targets {
            tree.remove(target);
        }
        Some(tree)
    }
}

/// `upload()` 返回的句柄
///
/// 通道在任务启动前创建，订阅不会错过任何事件。
pub struct SyncHandle {
    pub run_id: Uuid,
    pub events: mpsc::UnboundedReceiver<SyncEvent>,
    task: JoinHandle<SyncReport>,
}

impl SyncHandle {
    pub(crate) fn new(
        run_id: Uuid,
        events: mpsc::UnboundedReceiver<SyncEvent>,
        task: JoinHandle<SyncReport>,
    ) -> Self {
        Self {
            run_id,
            events,
            task,
        }
    }

    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// 等待运行结束，未读取的事件被丢弃
    pub async fn wait(self) -> Result<SyncReport, JoinError> {
        self.task.await
    }

    /// 读取全部事件并等待运行结束
    pub async fn collect(mut self) -> Result<(Vec<SyncEvent>, SyncReport), JoinError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let report = self.task.await?;
        Ok((events, report))
    }
}
