//! 守护循环 - 消费挂载事件并触发协调

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::{ReconcileError, ReconcileOutcome, ReconciliationAction};
use crate::drive::default_volumes_root;
use crate::watch::{MountEvent, MountWatcher, WatchMode};
use crate::AppState;

/// 挂载事件后的静默等待：给系统一点时间让挂载点完全可读。
/// 正确性不依赖这个延迟，无人值守脚本会兜底重试。
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// 运行守护进程：启动先做一轮全量协调，然后常驻消费挂载事件
pub async fn run(state: &AppState) -> Result<()> {
    let config = state.load_config();
    if !config.drive.is_configured() {
        bail!("尚未选定驱动器，请先执行 drivelink use <驱动器>");
    }

    // 启动协调：守护进程不在场期间的变化在这里追平
    match super::sync::resolve_mount(state, &config).await? {
        Some(mount_path) => {
            info!("启动协调：目标卷挂载于 {}", mount_path.display());
            let results = state
                .reconciler
                .reconcile_all(&config.links, Some(&mount_path), None)
                .await;
            log_results(&results);
        }
        None => {
            info!("启动协调：目标卷未挂载");
            let results = state.reconciler.reconcile_all(&config.links, None, None).await;
            log_results(&results);
        }
    }

    let volumes_root = default_volumes_root();
    let mut watcher = MountWatcher::new(volumes_root.clone());
    let mut rx = match watcher.start() {
        Ok(rx) => rx,
        Err(e) => {
            // 实时事件不可用时退回轮询，契约不变
            warn!("实时挂载监视不可用（{}），退回定时轮询", e);
            watcher = MountWatcher::with_mode(
                volumes_root.clone(),
                WatchMode::Poll {
                    interval: Duration::from_secs(2),
                },
            );
            watcher.start()?
        }
    };
    info!("开始监视挂载根目录 {}", volumes_root.display());

    while let Some(event) = rx.recv().await {
        // 每个事件重读配置，运行期间的配置修改即时生效
        let mut config = state.load_config();
        match event {
            MountEvent::Mounted(path) => {
                if !is_target_drive(state, &config, &path).await {
                    debug!("忽略无关卷挂载: {}", path.display());
                    continue;
                }
                info!("目标卷已挂载: {}", path.display());
                tokio::time::sleep(SETTLE_DELAY).await;

                let results = state
                    .reconciler
                    .reconcile_all(&config.links, Some(&path), None)
                    .await;
                log_results(&results);

                config.drive.drive_path = Some(path);
                if let Err(e) = config.save(&state.config_dir) {
                    warn!("保存挂载点失败: {}", e);
                }
            }
            MountEvent::Unmounted(path) => {
                if config.drive.drive_path.as_deref() != Some(path.as_path()) {
                    debug!("忽略无关卷卸载: {}", path.display());
                    continue;
                }
                info!("目标卷已卸载: {}", path.display());
                let results = state.reconciler.reconcile_all(&config.links, None, None).await;
                log_results(&results);
            }
        }
    }
    Ok(())
}

/// 判断新挂载的卷是否就是配置的目标驱动器
///
/// 优先按卷标识匹配；平台查询失败时退回挂载点/显示名匹配。
async fn is_target_drive(state: &AppState, config: &AppConfig, path: &Path) -> bool {
    if let Some(id) = &config.drive.drive_id {
        if let Ok(Some(drive)) = state.drives.drive_info(path).await {
            return drive.id == *id;
        }
    }
    if config.drive.drive_path.as_deref() == Some(path) {
        return true;
    }
    path.file_name().and_then(|n| n.to_str()) == config.drive.drive_name.as_deref()
}

/// 事件触发的协调失败只记录，等待下一次触发重试
fn log_results(results: &[(String, Result<ReconcileOutcome, ReconcileError>)]) {
    for (name, result) in results {
        match result {
            Ok(outcome) if outcome.action == ReconciliationAction::NoOp => {
                debug!("链接 {}: 状态已正确", name)
            }
            Ok(outcome) => info!("链接 {}: 已执行 {:?}", name, outcome.action),
            Err(e) => warn!("链接 {}: 协调失败: {}", name, e),
        }
    }
}
