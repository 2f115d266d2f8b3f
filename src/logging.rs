//! 日志模块 - 文件日志与大小上限管理
//!
//! 日志写入 config 目录下的 drivelink.log，超过上限时滚动为
//! drivelink.log.old（只保留一代）。无人值守脚本有自己独立的日志，
//! 不经过这里。

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// 日志配置（config.json 的 log 小节）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从 config.json 的 log 小节加载
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        if config_file.exists() {
            if let Ok(content) = fs::read_to_string(&config_file) {
                if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(section) = config.get("log") {
                        if let Ok(log) = serde_json::from_value::<LogConfig>(section.clone()) {
                            return log;
                        }
                    }
                }
            }
        }
        Self::default()
    }

    /// 保存 log 小节（保留文件里的其他小节）
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        let config_file = config_dir.join("config.json");

        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        config["log"] = serde_json::to_value(self).unwrap();
        fs::write(&config_file, serde_json::to_string_pretty(&config).unwrap())
    }

    /// 配置的级别对应的 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小上限的日志写入器
///
/// 每次取写入句柄时检查文件大小，超限则把当前文件改名为 .old
/// 并重开新文件。
pub struct RotatingFileWriter {
    file_path: PathBuf,
    max_size: u64,
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl RotatingFileWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join("drivelink.log");
        let max_size = (max_size_mb as u64) * 1024 * 1024;
        let writer = Self::open_file(&file_path, max_size)?;
        Ok(Self {
            file_path,
            max_size,
            inner: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        if file_size(file_path) > max_size {
            Self::rotate(file_path)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        Ok(BufWriter::new(file))
    }

    /// 当前日志改名为 .old，旧的 .old 被替换
    fn rotate(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    fn check_and_rotate(&self) {
        if file_size(&self.file_path) <= self.max_size {
            return;
        }
        let mut guard = self.inner.lock().unwrap();
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
        }
        if Self::rotate(&self.file_path).is_ok() {
            if let Ok(writer) = Self::open_file(&self.file_path, self.max_size) {
                *guard = Some(writer);
            }
        }
    }
}

impl Clone for RotatingFileWriter {
    fn clone(&self) -> Self {
        Self {
            file_path: self.file_path.clone(),
            max_size: self.max_size,
            inner: self.inner.clone(),
        }
    }
}

/// 单次写入句柄
pub struct LogHandle {
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl Write for LogHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();
        match guard.as_mut() {
            Some(writer) => {
                let n = writer.write(buf)?;
                writer.flush()?;
                Ok(n)
            }
            None => Err(io::Error::other("日志写入器不可用")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(writer) = guard.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = LogHandle;

    fn make_writer(&'a self) -> Self::Writer {
        self.check_and_rotate();
        LogHandle {
            inner: self.inner.clone(),
        }
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
