use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use virtual_sftp::config::JobFile;
use virtual_sftp::logging::init_logging;
use virtual_sftp::storage::{LocalTransport, SftpTransport, Transport};
use virtual_sftp::{FingerprintTree, SyncEvent, TreeRecorder, VirtualSftp};

const USAGE: &str = "用法: virtual-sftp <job.json> [--plan]";

/// 读取上次保存的指纹树，不存在时返回空树
fn load_tree(path: &Path) -> Result<FingerprintTree> {
    if !path.exists() {
        return Ok(FingerprintTree::new());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).with_context(|| format!("指纹树格式错误: {}", path.display()))
}

fn save_tree(path: &Path, tree: &FingerprintTree) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(tree)?)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let job_path = PathBuf::from(args.next().context(USAGE)?);
    let plan_only = args.any(|a| a == "--plan");

    let job = JobFile::load(&job_path)?;
    let _guard = init_logging(&job.log);

    let transport: Arc<dyn Transport> = match &job.local_mirror {
        Some(dir) => Arc::new(LocalTransport::new(dir)),
        None => Arc::new(SftpTransport::new()),
    };

    let mut sync =
        VirtualSftp::with_transport(job.options.clone(), transport).with_config(job.sync.clone());
    for mapping in &job.paths {
        sync.add_path(&mapping.local_path, Some(&mapping.remote_target_dir));
    }
    if let Some(tree_file) = &job.tree_file {
        sync.add_checksum(load_tree(tree_file)?, None)?;
    }

    if plan_only {
        let plan = sync.plan();
        for item in &plan.uploads {
            println!("{} -> {}", item.source_path.display(), item.target_path);
        }
        info!(
            "计划: {} 个待上传, {} 个未变化",
            plan.uploads.len(),
            plan.files_unchanged
        );
        return Ok(());
    }

    let mut handle = sync.upload()?;
    let mut recorder = TreeRecorder::new();
    while let Some(event) = handle.next_event().await {
        recorder.record(&event);
        match event {
            SyncEvent::Connect => info!("已连接 {}", job.options.endpoint()),
            SyncEvent::Progress(p) => {
                if p.succeeded {
                    info!("[{:>3}%] {}", p.percent, p.target_path);
                } else {
                    warn!("[{:>3}%] {} (失败)", p.percent, p.target_path);
                }
            }
            SyncEvent::Error(e) => error!("{}", e),
            SyncEvent::Complete(tree) => info!("运行结束: 指纹树 {} 个条目", tree.len()),
        }
    }

    if let Some(tree_file) = &job.tree_file {
        let failed = recorder.failed_targets().len();
        match recorder.into_tree() {
            Some(tree) => {
                save_tree(tree_file, &tree)?;
                info!(
                    "指纹树已保存: {} ({} 个条目, {} 个失败目标未记录)",
                    tree_file.display(),
                    tree.len(),
                    failed
                );
            }
            None => warn!("连接失败，保留原指纹树: {}", tree_file.display()),
        }
    }

    let report = handle.wait().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.connected {
        anyhow::bail!("未能连接 {}", job.options.endpoint());
    }
    if report.files_failed > 0 {
        anyhow::bail!("{} 个文件上传失败", report.files_failed);
    }
    Ok(())
}
