//! 应用配置模块
//!
//! 整个应用共用一个 config.json，按小节组织（drive / links / log），
//! 读取对缺失小节宽容，保存走读-改-写以保留其他小节。

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::ManagedLink;

/// 选定的目标驱动器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveSelection {
    /// 卷标识（跨插拔稳定）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    /// 显示名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_name: Option<String>,
    /// 最近一次已知挂载点
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_path: Option<PathBuf>,
}

impl DriveSelection {
    pub fn is_configured(&self) -> bool {
        self.drive_id.is_some() || self.drive_path.is_some()
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// 目标驱动器
    #[serde(default)]
    pub drive: DriveSelection,
    /// 是否完成过首次初始化
    #[serde(default)]
    pub initialized: bool,
    /// 受管链接
    #[serde(default = "default_links")]
    pub links: Vec<ManagedLink>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            drive: DriveSelection::default(),
            initialized: false,
            links: default_links(),
        }
    }
}

/// 默认管理两个目录：模型目录与 hub 缓存
fn default_links() -> Vec<ManagedLink> {
    let home = crate::dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    vec![
        ManagedLink::new(
            "models",
            home.join(".lmstudio").join("models"),
            "drivelink/models",
        ),
        ManagedLink::new(
            "hub",
            home.join(".cache").join("huggingface").join("hub"),
            "drivelink/hub",
        ),
    ]
}

impl AppConfig {
    /// 从配置文件加载（文件或小节缺失都回退默认值）
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        if config_file.exists() {
            if let Ok(content) = fs::read_to_string(&config_file) {
                if let Ok(config) = serde_json::from_str::<AppConfig>(&content) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// 保存配置（保留文件里不认识的小节，例如 log）
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        fs::create_dir_all(config_dir)?;
        let config_file = config_dir.join("config.json");

        // 读取现有配置
        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        // 更新本模块负责的小节
        config["drive"] = serde_json::to_value(&self.drive).unwrap();
        config["initialized"] = serde_json::Value::Bool(self.initialized);
        config["links"] = serde_json::to_value(&self.links).unwrap();

        fs::write(&config_file, serde_json::to_string_pretty(&config).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path());
        assert!(!config.initialized);
        assert!(!config.drive.is_configured());
        assert_eq!(config.links.len(), 2);
        assert_eq!(config.links[0].name, "models");
        assert_eq!(config.links[1].name, "hub");
    }

    #[test]
    fn test_save_roundtrip_preserves_unknown_sections() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("config.json");
        fs::write(
            &config_file,
            r#"{"log": {"enabled": false, "maxSizeMb": 9}}"#,
        )
        .unwrap();

        let mut config = AppConfig::load(dir.path());
        config.drive.drive_id = Some("uuid-1".to_string());
        config.drive.drive_name = Some("Sidecar".to_string());
        config.initialized = true;
        config.save(dir.path()).unwrap();

        let reloaded = AppConfig::load(dir.path());
        assert_eq!(reloaded.drive.drive_id.as_deref(), Some("uuid-1"));
        assert!(reloaded.initialized);

        // log 小节不归 AppConfig 管，必须原样保留
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config_file).unwrap()).unwrap();
        assert_eq!(raw["log"]["maxSizeMb"], 9);
    }
}
