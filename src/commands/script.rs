//! 无人值守脚本命令

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::core::{write_script, ScriptParams};
use crate::drive::default_volumes_root;
use crate::AppState;

/// 生成无人值守协调脚本
///
/// 脚本以配置里的挂载点为准；卷当前是否在线由脚本运行时自行检查。
pub async fn emit(state: &AppState, output: Option<PathBuf>) -> Result<()> {
    let config = state.load_config();

    let mount_path = config.drive.drive_path.clone().or_else(|| {
        config
            .drive
            .drive_name
            .as_ref()
            .map(|name| default_volumes_root().join(name))
    });
    let Some(mount_path) = mount_path else {
        bail!("尚未选定驱动器，无法确定挂载点");
    };

    let output = output.unwrap_or_else(|| state.config_dir.join("reconcile.sh"));
    let log_path = state.config_dir.join("reconcile.log");
    write_script(
        &output,
        &ScriptParams {
            drive_id: config.drive.drive_id.as_deref(),
            mount_path: &mount_path,
            links: &config.links,
            log_path: &log_path,
        },
    )?;

    println!("脚本已写入 {}", output.display());
    println!("日志将追加到 {}", log_path.display());
    Ok(())
}
