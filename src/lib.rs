use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{SftpOptions, SyncConfig};
pub use crate::core::{
    FingerprintTree, HashAlgorithm, ProgressEvent, SyncEvent, SyncHandle, SyncPlan, SyncReport,
    TreeRecorder, UploadItem,
};
pub use error::SyncError;

use crate::core::{DiffEngine, EventSender, PathMap, PathMapping, TreeWalker, UploadEngine};
use storage::{SftpTransport, Transport};

/// 增量上传入口
///
/// 先登记路径映射和上次的指纹树，再调用 [`VirtualSftp::upload`]。每次运行都有独立的
/// 上下文，同一实例可以并发运行多次而互不干扰。
pub struct VirtualSftp {
    options: Arc<SftpOptions>,
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    path_map: PathMap,
    current_tree: Arc<FingerprintTree>,
    algorithm: HashAlgorithm,
}

/// 一次运行所需的全部不可变输入
#[derive(Clone)]
struct RunContext {
    mappings: Vec<PathMapping>,
    current_tree: Arc<FingerprintTree>,
    algorithm: HashAlgorithm,
    transport: Arc<dyn Transport>,
    options: Arc<SftpOptions>,
    config: SyncConfig,
}

impl VirtualSftp {
    /// 使用 SFTP 传输
    pub fn new(options: SftpOptions) -> Self {
        Self::with_transport(options, Arc::new(SftpTransport::new()))
    }

    pub fn with_transport(options: SftpOptions, transport: Arc<dyn Transport>) -> Self {
        let algorithm = options.algorithm;
        Self {
            options: Arc::new(options),
            config: SyncConfig::default(),
            transport,
            path_map: PathMap::new(),
            current_tree: Arc::new(FingerprintTree::new()),
            algorithm,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// 登记或覆盖映射，`remote_target` 为空时使用本地路径的文件名
    pub fn add_path(
        &mut self,
        local_path: impl AsRef<Path>,
        remote_target: Option<&str>,
    ) -> &mut Self {
        debug!(
            "登记映射: {:?} -> {:?}",
            local_path.as_ref(),
            remote_target.unwrap_or_default()
        );
        self.path_map.insert(local_path, remote_target);
        self
    }

    /// 提供上次运行的指纹树和摘要算法；树为空时全部上传
    pub fn add_checksum(
        &mut self,
        previous_tree: impl Into<FingerprintTree>,
        algorithm: Option<&str>,
    ) -> Result<&mut Self, SyncError> {
        if let Some(name) = algorithm {
            self.algorithm = name.parse()?;
        }
        self.current_tree = Arc::new(previous_tree.into());
        debug!(
            "载入指纹树: {} 个条目, 算法 {}",
            self.current_tree.len(),
            self.algorithm
        );
        Ok(self)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn context(&self) -> RunContext {
        RunContext {
            mappings: self.path_map.snapshot(),
            current_tree: self.current_tree.clone(),
            algorithm: self.algorithm,
            transport: self.transport.clone(),
            options: self.options.clone(),
            config: self.config.clone(),
        }
    }

    /// 只遍历和比较，不连接（阻塞调用）
    pub fn plan(&self) -> SyncPlan {
        self.context().plan()
    }

    /// 执行一次完整运行，事件写入 `events`
    pub async fn run(&self, events: EventSender) -> SyncReport {
        self.context().run(Uuid::new_v4(), events).await
    }

    /// 在后台启动一次运行，返回可订阅事件的句柄
    ///
    /// 需要在 tokio 运行时内调用，否则返回 [`SyncError::Runtime`]。
    pub fn upload(&self) -> Result<SyncHandle, SyncError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| SyncError::Runtime(e.to_string()))?;
        let run_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = self.context();
        let task = runtime.spawn(async move { ctx.run(run_id, tx).await });
        Ok(SyncHandle::new(run_id, rx, task))
    }
}

impl RunContext {
    fn plan(&self) -> SyncPlan {
        let entries = TreeWalker::new().walk_all(&self.mappings);
        DiffEngine::new(self.algorithm, self.current_tree.clone()).diff(entries)
    }

    async fn run(self, run_id: Uuid, events: EventSender) -> SyncReport {
        info!("运行 {}: {} 个映射", run_id, self.mappings.len());

        // 遍历和计算摘要在连接之前全部完成
        let planner = self.clone();
        let plan = match tokio::task::spawn_blocking(move || planner.plan()).await {
            Ok(plan) => plan,
            Err(e) => {
                error!("扫描任务异常退出: {}", e);
                SyncPlan::default()
            }
        };

        UploadEngine::new(self.transport, self.options, self.config)
            .execute(run_id, plan, events)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockTransport;
    use crate::storage::LocalTransport;
    use std::fs;

    fn md5(data: &str) -> String {
        HashAlgorithm::Md5.digest_bytes(data.as_bytes())
    }

    fn complete_tree(events: &[SyncEvent]) -> FingerprintTree {
        let completes: Vec<&FingerprintTree> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Complete(tree) => Some(tree),
                _ => None,
            })
            .collect();
        assert_eq!(completes.len(), 1);
        completes[0].clone()
    }

    fn progress_targets(events: &[SyncEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Progress(p) => Some(p.target_path.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_scenario_only_changed_file_uploaded() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        fs::create_dir_all(a.join("b")).unwrap();
        fs::write(a.join("f1.txt"), "one").unwrap();
        fs::write(a.join("b").join("f2.txt"), "two").unwrap();

        let transport = MockTransport::new();
        let mut sync = VirtualSftp::with_transport(
            SftpOptions::new("example.org"),
            Arc::new(transport.clone()),
        );
        sync.add_path(&a, Some("target"))
            .add_checksum(
                [("/target/f1.txt", md5("one"))]
                    .into_iter()
                    .collect::<FingerprintTree>(),
                None,
            )
            .unwrap();

        let (events, report) = sync.upload().unwrap().collect().await.unwrap();

        let expected: FingerprintTree = [
            ("/target", String::new()),
            ("/target/f1.txt", md5("one")),
            ("/target/b", String::new()),
            ("/target/b/f2.txt", md5("two")),
        ]
        .into_iter()
        .collect();
        assert_eq!(complete_tree(&events), expected);
        assert_eq!(progress_targets(&events), vec!["/target/b/f2.txt"]);
        assert_eq!(
            transport.uploaded(),
            vec!["/virtualsftp-tmp-01/target/b/f2.txt"]
        );
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.files_skipped, 1);
    }

    #[tokio::test]
    async fn test_missing_local_path_completes_cleanly() {
        let transport = MockTransport::new();
        let mut sync = VirtualSftp::with_transport(SftpOptions::default(), Arc::new(transport));
        sync.add_path("/nonexistent/virtual-sftp", Some("x"));

        let (events, report) = sync.upload().unwrap().collect().await.unwrap();

        assert!(!events.iter().any(|e| matches!(e, SyncEvent::Error(_))));
        assert!(complete_tree(&events).is_empty());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_empty_path_map() {
        let sync = VirtualSftp::with_transport(
            SftpOptions::default(),
            Arc::new(MockTransport::new()),
        );
        let (events, _) = sync.upload().unwrap().collect().await.unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SyncEvent::Connect));
        assert!(matches!(&events[1], SyncEvent::Complete(tree) if tree.is_empty()));
    }

    #[tokio::test]
    async fn test_second_run_uploads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let site = tmp.path().join("site");
        fs::create_dir_all(site.join("css")).unwrap();
        fs::write(site.join("index.html"), "<html>").unwrap();
        fs::write(site.join("css").join("main.css"), "body{}").unwrap();

        let mirror = tmp.path().join("mirror");
        let transport = Arc::new(LocalTransport::new(&mirror));

        let mut first = VirtualSftp::with_transport(SftpOptions::default(), transport.clone());
        first.add_path(&site, None);
        let (events, report) = first.upload().unwrap().collect().await.unwrap();
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(
            fs::read_to_string(mirror.join("virtualsftp-tmp-01/site/css/main.css")).unwrap(),
            "body{}"
        );
        let tree = complete_tree(&events);

        let mut second = VirtualSftp::with_transport(SftpOptions::default(), transport);
        second.add_path(&site, None).add_checksum(tree.clone(), None).unwrap();
        let (events, report) = second.upload().unwrap().collect().await.unwrap();

        assert!(progress_targets(&events).is_empty());
        assert_eq!(report.files_queued, 0);
        assert_eq!(complete_tree(&events), tree);
    }

    #[tokio::test]
    async fn test_unknown_algorithm_is_rejected() {
        let mut sync = VirtualSftp::with_transport(
            SftpOptions::default(),
            Arc::new(MockTransport::new()),
        );
        assert!(matches!(
            sync.add_checksum(FingerprintTree::new(), Some("crc32")),
            Err(SyncError::UnsupportedAlgorithm(_))
        ));
        assert_eq!(sync.algorithm(), HashAlgorithm::Md5);
    }

    #[tokio::test]
    async fn test_algorithm_from_checksum_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f.txt");
        fs::write(&file, "hello").unwrap();

        let mut sync = VirtualSftp::with_transport(
            SftpOptions::default(),
            Arc::new(MockTransport::new()),
        );
        sync.add_path(&file, None)
            .add_checksum(FingerprintTree::new(), Some("sha1"))
            .unwrap();

        let plan = sync.plan();
        assert_eq!(
            plan.expected_tree.get("/f.txt"),
            Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
        );
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        fs::create_dir_all(&a).unwrap();
        fs::write(a.join("x.txt"), "x").unwrap();

        let mut sync = VirtualSftp::with_transport(
            SftpOptions::default(),
            Arc::new(MockTransport::new()),
        );
        sync.add_path(&a, None);

        let first = sync.upload().unwrap();
        let second = sync.upload().unwrap();
        assert_ne!(first.run_id, second.run_id);

        let (e1, r1) = first.collect().await.unwrap();
        let (e2, r2) = second.collect().await.unwrap();
        assert_eq!(complete_tree(&e1), complete_tree(&e2));
        assert_eq!(r1.files_uploaded, 1);
        assert_eq!(r2.files_uploaded, 1);
    }

    #[test]
    fn test_upload_outside_runtime_returns_error() {
        let sync = VirtualSftp::with_transport(
            SftpOptions::default(),
            Arc::new(MockTransport::new()),
        );
        assert!(matches!(sync.upload(), Err(SyncError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_failed_upload_is_retried_next_run() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        fs::create_dir_all(&a).unwrap();
        fs::write(a.join("x.txt"), "x").unwrap();
        fs::write(a.join("y.txt"), "y").unwrap();

        let first = MockTransport::new().fail_on("/virtualsftp-tmp-01/a/x.txt");
        let mut sync =
            VirtualSftp::with_transport(SftpOptions::default(), Arc::new(first.clone()));
        sync.add_path(&a, None);
        let (events, report) = sync.upload().unwrap().collect().await.unwrap();
        assert_eq!(report.files_failed, 1);
        assert_eq!(first.uploaded(), vec!["/virtualsftp-tmp-01/a/y.txt"]);

        let mut recorder = TreeRecorder::new();
        events.iter().for_each(|e| recorder.record(e));
        let saved = recorder.into_tree().unwrap();
        assert_eq!(saved.get("/a/x.txt"), None);
        assert!(saved.matches("/a/y.txt", &md5("y")));

        let second = MockTransport::new();
        let mut sync =
            VirtualSftp::with_transport(SftpOptions::default(), Arc::new(second.clone()));
        sync.add_path(&a, None).add_checksum(saved, None).unwrap();
        let (events, report) = sync.upload().unwrap().collect().await.unwrap();

        assert_eq!(progress_targets(&events), vec!["/a/x.txt"]);
        assert_eq!(second.uploaded(), vec!["/virtualsftp-tmp-01/a/x.txt"]);
        assert_eq!(report.files_skipped, 1);
    }

    #[tokio::test]
    async fn test_tree_not_saved_after_connection_failure() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("f.txt"), "f").unwrap();

        let mut sync = VirtualSftp::with_transport(
            SftpOptions::default(),
            Arc::new(MockTransport::new().refuse_connect()),
        );
        sync.add_path(tmp.path(), Some("t"));
        let (events, report) = sync.upload().unwrap().collect().await.unwrap();
        assert!(!report.connected);

        // Complete 仍携带本地计算的树，但不应保存
        assert!(complete_tree(&events).matches("/t/f.txt", &md5("f")));
        let mut recorder = TreeRecorder::new();
        events.iter().for_each(|e| recorder.record(e));
        assert!(recorder.into_tree().is_none());
    }
}
