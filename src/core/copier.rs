//! 目录树批量拷贝 - 三级回退策略
//!
//! 优先调用系统 rsync，其次 cp，最后退回进程内递归拷贝。每级最多
//! 尝试一次，按固定顺序，首个成功即返回；全部失败时带上最后一级的
//! 错误文本。外部工具走子进程、进程内拷贝走阻塞线程池，都不会挡住
//! 其他链接的协调。

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// 拷贝失败，携带最后一级的底层错误文本
#[derive(Debug, Error)]
#[error("目录树拷贝失败: {reason}")]
pub struct CopyError {
    pub reason: String,
}

/// 拷贝策略配置
#[derive(Debug, Clone)]
pub struct CopierConfig {
    /// 是否允许调用外部工具（rsync / cp）；关闭后直接走进程内拷贝
    pub use_external_tools: bool,
}

impl Default for CopierConfig {
    fn default() -> Self {
        Self {
            use_external_tools: true,
        }
    }
}

/// 目录树拷贝器
#[derive(Debug, Clone, Default)]
pub struct TreeCopier {
    config: CopierConfig,
}

impl TreeCopier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CopierConfig) -> Self {
        Self { config }
    }

    /// 把 source 的目录树拷贝到 dest（dest 不存在时创建）
    ///
    /// 只报告成功/失败，不区分是哪一级成功的；目标侧同名文件会被覆盖。
    pub async fn copy_tree(&self, source: &Path, dest: &Path) -> Result<(), CopyError> {
        if !source.exists() {
            return Err(CopyError {
                reason: format!("源目录不存在: {}", source.display()),
            });
        }
        if let Err(e) = std::fs::create_dir_all(dest) {
            return Err(CopyError {
                reason: format!("无法创建目标目录 {}: {}", dest.display(), e),
            });
        }

        if self.config.use_external_tools {
            // 第一级: rsync -a source/ dest/
            let src_slash = format!("{}/", source.display());
            let dst_slash = format!("{}/", dest.display());
            match run_copy_tool("rsync", &["-a", &src_slash, &dst_slash]).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("rsync 不可用或失败，回退到 cp: {}", e),
            }

            // 第二级: cp -R source/. dest/
            let src_dot = format!("{}/.", source.display());
            let dst = dest.display().to_string();
            match run_copy_tool("cp", &["-R", &src_dot, &dst]).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("cp 失败，回退到进程内拷贝: {}", e),
            }
        }

        // 第三级: 进程内递归拷贝，放进阻塞线程池避免挡住协调路径
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        let result = tokio::task::spawn_blocking(move || copy_tree_blocking(&source, &dest)).await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CopyError {
                reason: e.to_string(),
            }),
            Err(e) => Err(CopyError {
                reason: format!("拷贝任务中断: {}", e),
            }),
        }
    }
}

/// 调用外部拷贝工具，工具不存在（NotFound）与非零退出都算该级失败
async fn run_copy_tool(program: &str, args: &[&str]) -> Result<(), String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("{} 启动失败: {}", program, e))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} 退出码 {:?}: {}",
            program,
            output.status.code(),
            stderr.trim()
        ))
    }
}

/// 进程内递归拷贝，保留符号链接本身（不跟随）
fn copy_tree_blocking(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = match entry.path().strip_prefix(source) {
            Ok(r) if !r.as_os_str().is_empty() => r.to_path_buf(),
            _ => continue,
        };
        let to = dest.join(&rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&to)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            recreate_symlink(&target, &to)?;
        } else {
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

fn recreate_symlink(target: &Path, to: &PathBuf) -> io::Result<()> {
    // 目标位置已有同名条目时先移除，保证覆盖语义与 rsync 一致
    if std::fs::symlink_metadata(to).is_ok() {
        std::fs::remove_file(to)?;
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(target, to)
}
