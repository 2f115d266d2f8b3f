//! 协调相关命令 - 手动初始化与状态查询

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{classify, decide, MountStatus, ReconcileError, ReconcileEvent, ReconciliationAction};
use crate::AppState;

/// 解析目标驱动器当前的挂载点
///
/// 优先按卷标识查询，查询不到时退回最近一次已知挂载点（仍存在才算）。
pub async fn resolve_mount(state: &AppState, config: &AppConfig) -> Result<Option<PathBuf>> {
    if let Some(id) = &config.drive.drive_id {
        if let Some(path) = state.drives.resolve_mount_path(id).await? {
            return Ok(Some(path));
        }
    }
    if let Some(path) = &config.drive.drive_path {
        if path.is_dir() {
            return Ok(Some(path.clone()));
        }
    }
    Ok(None)
}

/// 手动初始化：立即协调全部受管链接
///
/// 没有取消路径，开始后一直执行到终态；调用方等待结果而不是发后不理。
pub async fn initialize(state: &AppState) -> Result<()> {
    let mut config = state.load_config();
    if !config.drive.is_configured() {
        bail!("尚未选定驱动器，请先执行 drivelink use <驱动器>");
    }

    if state.busy.swap(true, Ordering::SeqCst) {
        bail!("已有一次初始化在进行中");
    }
    let busy = state.busy.clone();
    scopeguard::defer! {
        busy.store(false, Ordering::SeqCst);
    }

    let mount_path = resolve_mount(state, &config)
        .await?
        .ok_or(ReconcileError::VolumeNotMounted)?;
    println!("目标驱动器挂载于 {}", mount_path.display());

    // 进度事件边产生边打印
    let (tx, mut rx) = mpsc::channel::<ReconcileEvent>(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("[{}] {}", event.link, event.message);
        }
    });

    let results = state
        .reconciler
        .reconcile_all(&config.links, Some(&mount_path), Some(tx))
        .await;
    let _ = printer.await;

    let mut failed = 0usize;
    for (name, result) in &results {
        if let Err(e) = result {
            failed += 1;
            eprintln!("[{}] 失败: {}", name, e);
        }
    }
    if failed > 0 {
        bail!("{} 条链接协调失败", failed);
    }

    config.drive.drive_path = Some(mount_path);
    config.initialized = true;
    config.save(&state.config_dir)?;
    println!("初始化完成");
    Ok(())
}

/// 展示每条链接的当前状态
pub async fn status(state: &AppState) -> Result<()> {
    let config = state.load_config();
    if !config.drive.is_configured() {
        println!("尚未选定驱动器");
        return Ok(());
    }

    let drive_name = config.drive.drive_name.clone().unwrap_or_else(|| "?".to_string());
    let mount = resolve_mount(state, &config).await?;
    match &mount {
        Some(path) => {
            let usage = state
                .drives
                .storage_usage(path)
                .await
                .unwrap_or(None)
                .unwrap_or_default();
            println!("驱动器 {} 已挂载于 {}  {}", drive_name, path.display(), usage);
        }
        None => println!("驱动器 {} 未挂载", drive_name),
    }

    for link in &config.links {
        let current = classify(&link.local_path);
        let mount_status = match &mount {
            Some(path) => MountStatus::Mounted {
                expected_target: link.expected_target(path),
            },
            None => MountStatus::Unmounted,
        };
        let action = decide(&link.local_path, &current, &mount_status);
        let verdict = if action == ReconciliationAction::NoOp {
            "正常"
        } else {
            "待协调"
        };
        println!(
            "  {}  {}  [{}]  {}",
            link.name,
            link.local_path.display(),
            current.describe(),
            verdict
        );
    }
    Ok(())
}
