//! 挂载事件源
//!
//! 把平台差异（实时文件系统事件 / 定时轮询）收敛为单一有序通道，由
//! 守护循环顺序消费。两种实现契约一致：卷目录在挂载根下出现时发
//! Mounted，消失时发 Unmounted；同一卷的事件按挂钟顺序投递。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 挂载事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountEvent {
    /// 卷出现在该路径
    Mounted(PathBuf),
    /// 卷从该路径消失
    Unmounted(PathBuf),
}

/// 监视模式
#[derive(Debug, Clone)]
pub enum WatchMode {
    /// 操作系统的实时文件系统事件
    FsEvents,
    /// 定时轮询挂载根目录做差集
    Poll { interval: Duration },
}

/// 挂载根目录监视器
///
/// `start` 返回事件接收端；`stop`（或析构）终止监视。
pub struct MountWatcher {
    volumes_root: PathBuf,
    mode: WatchMode,
    fs_watcher: Option<notify::RecommendedWatcher>,
    poll_task: Option<tokio::task::JoinHandle<()>>,
}

impl MountWatcher {
    pub fn new(volumes_root: impl Into<PathBuf>) -> Self {
        Self::with_mode(volumes_root, WatchMode::FsEvents)
    }

    pub fn with_mode(volumes_root: impl Into<PathBuf>, mode: WatchMode) -> Self {
        Self {
            volumes_root: volumes_root.into(),
            mode,
            fs_watcher: None,
            poll_task: None,
        }
    }

    /// 启动监视，事件写入返回的通道
    pub fn start(&mut self) -> Result<mpsc::Receiver<MountEvent>> {
        let (tx, rx) = mpsc::channel(64);
        match self.mode.clone() {
            WatchMode::FsEvents => self.start_fs_events(tx)?,
            WatchMode::Poll { interval } => self.start_poll(tx, interval),
        }
        Ok(rx)
    }

    /// 停止监视（通道随之关闭）
    pub fn stop(&mut self) {
        self.fs_watcher = None;
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    fn start_fs_events(&mut self, tx: mpsc::Sender<MountEvent>) -> Result<()> {
        let root = self.volumes_root.clone();
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<notify::Event, notify::Error>| {
                let event = match result {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("挂载监视事件错误: {}", e);
                        return;
                    }
                };
                for path in &event.paths {
                    // 只关心挂载根的直接子目录
                    if path.parent() != Some(root.as_path()) {
                        continue;
                    }
                    let mapped = match event.kind {
                        EventKind::Create(_) => MountEvent::Mounted(path.clone()),
                        EventKind::Remove(_) => MountEvent::Unmounted(path.clone()),
                        _ => continue,
                    };
                    // 回调在 notify 自己的线程上，阻塞发送是安全的
                    if tx.blocking_send(mapped).is_err() {
                        return;
                    }
                }
            },
        )
        .context("创建挂载监视器失败")?;

        watcher
            .watch(&self.volumes_root, RecursiveMode::NonRecursive)
            .with_context(|| format!("无法监视 {}", self.volumes_root.display()))?;
        self.fs_watcher = Some(watcher);
        Ok(())
    }

    fn start_poll(&mut self, tx: mpsc::Sender<MountEvent>, interval: Duration) {
        let root = self.volumes_root.clone();
        let task = tokio::spawn(async move {
            let mut known = mounted_set(&root);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let current = mounted_set(&root);
                for appeared in current.difference(&known) {
                    debug!("轮询发现新挂载: {}", appeared.display());
                    if tx.send(MountEvent::Mounted(appeared.clone())).await.is_err() {
                        return;
                    }
                }
                for gone in known.difference(&current) {
                    debug!("轮询发现卸载: {}", gone.display());
                    if tx.send(MountEvent::Unmounted(gone.clone())).await.is_err() {
                        return;
                    }
                }
                known = current;
            }
        });
        self.poll_task = Some(task);
    }
}

impl Drop for MountWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 挂载根下的目录集合（不含符号链接，macOS 启动卷以链接形式出现）
fn mounted_set(root: &Path) -> HashSet<PathBuf> {
    let mut set = HashSet::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if let Ok(meta) = std::fs::symlink_metadata(&path) {
                if meta.is_dir() {
                    set.insert(path);
                }
            }
        }
    }
    set
}
