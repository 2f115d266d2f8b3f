pub mod platform;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use platform::SystemDriveDirectory;

/// 可移动卷的元数据
///
/// `id` 跨插拔稳定（平台提供卷 UUID 时用 UUID）；`mount_path` 不稳定，
/// 恰好在卷离线时为 `None`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    pub id: String,
    pub mount_path: Option<PathBuf>,
    pub display_name: String,
    pub is_external: bool,
    pub is_removable: bool,
}

/// 驱动器目录 - 枚举可移动卷并解析挂载点
///
/// 平台实现负责枚举已挂载卷并过滤启动卷。
#[async_trait]
pub trait DriveDirectory: Send + Sync {
    /// 枚举当前连接的可移动卷（不含启动卷）
    async fn list_drives(&self) -> Result<Vec<Drive>>;

    /// 查询挂载点对应的卷信息
    async fn drive_info(&self, mount_path: &Path) -> Result<Option<Drive>> {
        let drives = self.list_drives().await?;
        Ok(drives
            .into_iter()
            .find(|d| d.mount_path.as_deref() == Some(mount_path)))
    }

    /// 由卷标识解析当前挂载点，未挂载返回 None
    async fn resolve_mount_path(&self, drive_id: &str) -> Result<Option<PathBuf>> {
        let drives = self.list_drives().await?;
        Ok(drives
            .into_iter()
            .find(|d| d.id == drive_id)
            .and_then(|d| d.mount_path))
    }

    /// 挂载点的存储占用描述（如 "已用 120.5G / 共 476.0G"）
    async fn storage_usage(&self, mount_path: &Path) -> Result<Option<String>>;
}

/// 平台默认的卷挂载根目录
pub fn default_volumes_root() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Volumes")
    } else {
        // Linux: 优先 /run/media/<user>，回退 /media
        if let Ok(user) = std::env::var("USER") {
            let run_media = PathBuf::from("/run/media").join(&user);
            if run_media.is_dir() {
                return run_media;
            }
        }
        PathBuf::from("/media")
    }
}

/// 人类可读的容量
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB * KIB * KIB {
        format!("{:.1}T", b / (KIB * KIB * KIB * KIB))
    } else if b >= KIB * KIB * KIB {
        format!("{:.1}G", b / (KIB * KIB * KIB))
    } else if b >= KIB * KIB {
        format!("{:.1}M", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1}K", b / KIB)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0K");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0M");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0G");
    }
}
