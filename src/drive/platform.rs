//! 平台卷枚举
//!
//! macOS 走 /Volumes 目录 + diskutil，Linux 走 lsblk 的 JSON 输出。
//! 解析部分是纯函数，便于用固定样本测试。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{format_size, Drive, DriveDirectory};

/// 系统驱动器目录
#[derive(Debug, Clone, Default)]
pub struct SystemDriveDirectory;

impl SystemDriveDirectory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DriveDirectory for SystemDriveDirectory {
    async fn list_drives(&self) -> Result<Vec<Drive>> {
        if cfg!(target_os = "macos") {
            list_drives_macos().await
        } else {
            list_drives_linux().await
        }
    }

    async fn storage_usage(&self, mount_path: &Path) -> Result<Option<String>> {
        let output = tokio::process::Command::new("df")
            .arg("-k")
            .arg(mount_path)
            .output()
            .await
            .context("df 启动失败")?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_df_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// macOS: 枚举 /Volumes 下的挂载点，用 diskutil 补充卷元数据
async fn list_drives_macos() -> Result<Vec<Drive>> {
    let mut drives = Vec::new();
    let entries = match std::fs::read_dir("/Volumes") {
        Ok(e) => e,
        Err(_) => return Ok(drives),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        // 启动卷在 /Volumes 下是指回 / 的符号链接，跳过
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.file_type().is_symlink() || !meta.is_dir() {
            continue;
        }
        if path.canonicalize().map(|p| p == Path::new("/")).unwrap_or(false) {
            continue;
        }

        let display_name = entry.file_name().to_string_lossy().to_string();
        let info = match diskutil_info(&path).await {
            Ok(text) => parse_diskutil_info(&text),
            Err(e) => {
                debug!("diskutil 查询失败 ({}): {}", path.display(), e);
                DiskutilInfo::default()
            }
        };

        drives.push(Drive {
            id: info.volume_uuid.unwrap_or_else(|| display_name.clone()),
            mount_path: Some(path),
            display_name,
            is_external: info.is_external,
            is_removable: info.is_removable,
        });
    }
    Ok(drives)
}

async fn diskutil_info(path: &Path) -> Result<String> {
    let output = tokio::process::Command::new("diskutil")
        .arg("info")
        .arg(path)
        .output()
        .await
        .context("diskutil 启动失败")?;
    anyhow::ensure!(output.status.success(), "diskutil 返回非零退出码");
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// diskutil info 的关键字段
#[derive(Debug, Default)]
pub struct DiskutilInfo {
    pub volume_uuid: Option<String>,
    pub is_external: bool,
    pub is_removable: bool,
}

/// 解析 diskutil info 的文本输出
pub fn parse_diskutil_info(text: &str) -> DiskutilInfo {
    let field = |name: &str| -> Option<String> {
        let re = Regex::new(&format!(r"(?m)^\s*{}:\s+(.+?)\s*$", regex::escape(name))).ok()?;
        re.captures(text).map(|c| c[1].to_string())
    };

    DiskutilInfo {
        volume_uuid: field("Volume UUID"),
        is_external: field("Device Location")
            .map(|v| v.eq_ignore_ascii_case("external"))
            .unwrap_or(false),
        is_removable: field("Removable Media")
            .map(|v| v.eq_ignore_ascii_case("removable"))
            .unwrap_or(false),
    }
}

/// Linux: lsblk 的 JSON 输出里收集已挂载的可移动分区
async fn list_drives_linux() -> Result<Vec<Drive>> {
    let output = tokio::process::Command::new("lsblk")
        .args(["-J", "-o", "NAME,MOUNTPOINT,UUID,RM,HOTPLUG,LABEL,TYPE"])
        .output()
        .await
        .context("lsblk 启动失败")?;
    anyhow::ensure!(output.status.success(), "lsblk 返回非零退出码");
    parse_lsblk(&String::from_utf8_lossy(&output.stdout))
}

/// 解析 lsblk -J 输出
///
/// 字段在不同版本间有布尔/字符串两种形态，mountpoint 也有单数/复数
/// 两种键名，这里统一兼容。
pub fn parse_lsblk(json: &str) -> Result<Vec<Drive>> {
    let value: serde_json::Value = serde_json::from_str(json).context("lsblk 输出不是合法 JSON")?;
    let mut drives = Vec::new();
    if let Some(devices) = value.get("blockdevices").and_then(|v| v.as_array()) {
        for device in devices {
            collect_lsblk_device(device, false, &mut drives);
        }
    }
    Ok(drives)
}

fn collect_lsblk_device(device: &serde_json::Value, parent_removable: bool, out: &mut Vec<Drive>) {
    let removable =
        parent_removable || json_flag(device.get("rm")) || json_flag(device.get("hotplug"));

    if let Some(mount) = lsblk_mountpoint(device) {
        // 启动卷与交换分区不算可管理对象
        if mount != Path::new("/") && mount != Path::new("[SWAP]") && removable {
            let name = device
                .get("label")
                .and_then(|v| v.as_str())
                .or_else(|| device.get("name").and_then(|v| v.as_str()))
                .unwrap_or("unknown")
                .to_string();
            let uuid = device.get("uuid").and_then(|v| v.as_str());
            out.push(Drive {
                id: uuid.map(|u| u.to_string()).unwrap_or_else(|| name.clone()),
                mount_path: Some(mount),
                display_name: name,
                is_external: removable,
                is_removable: removable,
            });
        }
    }

    if let Some(children) = device.get("children").and_then(|v| v.as_array()) {
        for child in children {
            collect_lsblk_device(child, removable, out);
        }
    }
}

fn lsblk_mountpoint(device: &serde_json::Value) -> Option<PathBuf> {
    if let Some(mp) = device.get("mountpoint").and_then(|v| v.as_str()) {
        return Some(PathBuf::from(mp));
    }
    device
        .get("mountpoints")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.iter().find_map(|v| v.as_str()))
        .map(PathBuf::from)
}

/// lsblk 的标志位：新版是 true/false，旧版是 "1"/"0"
fn json_flag(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s == "1" || s == "true",
        Some(serde_json::Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// 解析 df -k 输出为占用描述
pub fn parse_df_output(text: &str) -> Option<String> {
    let line = text.lines().nth(1)?;
    let cols: Vec<&str> = line.split_whitespace().collect();
    if cols.len() < 4 {
        return None;
    }
    let total_k: u64 = cols[1].parse().ok()?;
    let used_k: u64 = cols[2].parse().ok()?;
    Some(format!(
        "已用 {} / 共 {}",
        format_size(used_k * 1024),
        format_size(total_k * 1024)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diskutil_info() {
        let sample = r#"
   Device Identifier:         disk2s1
   Device Node:               /dev/disk2s1
   Volume Name:               Sidecar
   Mounted:                   Yes
   Mount Point:               /Volumes/Sidecar
   Volume UUID:               0A1B2C3D-4E5F-6789-ABCD-EF0123456789
   Device Location:           External
   Removable Media:           Removable
"#;
        let info = parse_diskutil_info(sample);
        assert_eq!(
            info.volume_uuid.as_deref(),
            Some("0A1B2C3D-4E5F-6789-ABCD-EF0123456789")
        );
        assert!(info.is_external);
        assert!(info.is_removable);
    }

    #[test]
    fn test_parse_diskutil_info_internal_disk() {
        let sample = "   Device Location:           Internal\n   Removable Media:           Fixed\n";
        let info = parse_diskutil_info(sample);
        assert!(info.volume_uuid.is_none());
        assert!(!info.is_external);
        assert!(!info.is_removable);
    }

    #[test]
    fn test_parse_lsblk_filters_boot_volume() {
        let sample = r#"{
            "blockdevices": [
                {"name": "sda", "rm": false, "hotplug": false, "mountpoint": null, "type": "disk",
                 "children": [
                    {"name": "sda1", "rm": false, "hotplug": false, "uuid": "root-uuid",
                     "label": null, "mountpoint": "/", "type": "part"}
                 ]},
                {"name": "sdb", "rm": true, "hotplug": true, "mountpoint": null, "type": "disk",
                 "children": [
                    {"name": "sdb1", "rm": true, "hotplug": true, "uuid": "ext-uuid",
                     "label": "Sidecar", "mountpoint": "/run/media/u/Sidecar", "type": "part"}
                 ]}
            ]
        }"#;
        let drives = parse_lsblk(sample).unwrap();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].id, "ext-uuid");
        assert_eq!(drives[0].display_name, "Sidecar");
        assert_eq!(
            drives[0].mount_path.as_deref(),
            Some(Path::new("/run/media/u/Sidecar"))
        );
        assert!(drives[0].is_removable);
    }

    #[test]
    fn test_parse_lsblk_accepts_string_flags_and_mountpoints_array() {
        let sample = r#"{
            "blockdevices": [
                {"name": "sdc", "rm": "1", "hotplug": "0", "mountpoint": null, "type": "disk",
                 "children": [
                    {"name": "sdc1", "rm": "1", "hotplug": "0", "uuid": "u1", "label": "Old",
                     "mountpoints": ["/media/Old"], "type": "part"}
                 ]}
            ]
        }"#;
        let drives = parse_lsblk(sample).unwrap();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].mount_path.as_deref(), Some(Path::new("/media/Old")));
    }

    #[test]
    fn test_parse_df_output() {
        let sample = "Filesystem     1K-blocks      Used Available Use% Mounted on\n\
                      /dev/sdb1      498000000 120000000 377000000  25% /run/media/u/Sidecar\n";
        let usage = parse_df_output(sample).unwrap();
        assert!(usage.contains("已用"));
        assert!(usage.contains("共"));
    }
}
