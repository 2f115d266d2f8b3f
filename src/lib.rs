use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod core;
pub mod drive;
pub mod logging;
pub mod watch;

pub use config::{AppConfig, DriveSelection};
pub use core::{LinkReconciler, ManagedLink, PathState, ReconcileError, ReconcileOutcome};
pub use drive::{Drive, DriveDirectory, SystemDriveDirectory};
pub use watch::{MountEvent, MountWatcher};

/// 应用状态，在各命令间共享
#[derive(Clone)]
pub struct AppState {
    pub config_dir: PathBuf,
    pub drives: Arc<dyn DriveDirectory>,
    pub reconciler: Arc<LinkReconciler>,
    /// 用户触发的协调进行中标志（同一时刻只允许一次手动初始化）
    pub busy: Arc<AtomicBool>,
}

impl AppState {
    pub fn new() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir()
            .map(|p| p.join("drivelink"))
            .unwrap_or_else(|| PathBuf::from(".drivelink"));
        std::fs::create_dir_all(&config_dir)?;
        Ok(Self::with_config_dir(config_dir))
    }

    pub fn with_config_dir(config_dir: PathBuf) -> Self {
        Self {
            config_dir,
            drives: Arc::new(SystemDriveDirectory::new()),
            reconciler: Arc::new(LinkReconciler::new()),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 加载当前配置
    pub fn load_config(&self) -> AppConfig {
        AppConfig::load(&self.config_dir)
    }
}

/// 平台目录辅助
pub mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(PathBuf::from)
    }

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "macos") {
            home_dir().map(|h| h.join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".config")))
        }
    }
}
