//! 驱动器相关命令

use crate::AppState;
use anyhow::{bail, Result};

/// 列出当前连接的可移动驱动器
pub async fn list(state: &AppState) -> Result<()> {
    let drives = state.drives.list_drives().await?;
    if drives.is_empty() {
        println!("未发现可移动驱动器");
        return Ok(());
    }

    for drive in drives {
        let mount = drive
            .mount_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "未挂载".to_string());
        let usage = match drive.mount_path.as_deref() {
            Some(path) => state
                .drives
                .storage_usage(path)
                .await
                .unwrap_or(None)
                .unwrap_or_default(),
            None => String::new(),
        };
        println!("{}  [{}]  {}  {}", drive.display_name, drive.id, mount, usage);
    }
    Ok(())
}

/// 选定目标驱动器（按显示名或卷标识匹配）
pub async fn use_drive(state: &AppState, query: &str) -> Result<()> {
    let drives = state.drives.list_drives().await?;
    let Some(drive) = drives
        .into_iter()
        .find(|d| d.id == query || d.display_name == query)
    else {
        bail!("未找到驱动器: {}", query);
    };

    let mut config = state.load_config();
    config.drive.drive_id = Some(drive.id.clone());
    config.drive.drive_name = Some(drive.display_name.clone());
    config.drive.drive_path = drive.mount_path.clone();
    config.save(&state.config_dir)?;

    tracing::info!("选定驱动器 {} ({})", drive.display_name, drive.id);
    println!("已选定驱动器 {} ({})", drive.display_name, drive.id);
    Ok(())
}
