//! 路径检查器 - 判断路径当前的文件系统形态
//!
//! 协调引擎的最底层组件。每次协调前重新读取状态，绝不跨调用缓存，
//! 这是引擎能从零重新推导的前提。

use std::io;
use std::path::{Path, PathBuf};

/// 路径状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathState {
    /// 符号链接，携带字面目标（不解析真实路径）
    Symlink(PathBuf),
    /// 真实目录
    RealDirectory,
    /// 普通文件
    RegularFile,
    /// 不存在
    Missing,
}

impl PathState {
    /// 状态的简短描述（日志与状态展示用）
    pub fn describe(&self) -> String {
        match self {
            PathState::Symlink(target) => format!("符号链接 -> {}", target.display()),
            PathState::RealDirectory => "真实目录".to_string(),
            PathState::RegularFile => "普通文件".to_string(),
            PathState::Missing => "不存在".to_string(),
        }
    }
}

/// 判断路径状态
///
/// 必须先判断符号链接再判断目录：指向目录的链接要报告为 `Symlink`，
/// 所以这里用 `symlink_metadata`（不跟随链接）。悬空链接照常返回
/// 字面目标，目标是否可达由调用方另行判断。`Missing` 是正常结果，
/// 不是错误。
pub fn classify(path: &Path) -> PathState {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => match std::fs::read_link(path) {
            Ok(target) => PathState::Symlink(target),
            // 链接在两次系统调用之间消失，按缺失处理
            Err(_) => PathState::Missing,
        },
        Ok(meta) if meta.is_dir() => PathState::RealDirectory,
        Ok(_) => PathState::RegularFile,
        Err(e) if e.kind() == io::ErrorKind::NotFound => PathState::Missing,
        // 其余读取错误（权限等）同样视作缺失，留给后续变更操作去报错
        Err(_) => PathState::Missing,
    }
}

/// 解析链接目标的绝对路径
///
/// `read_link` 可能返回相对目标，此时相对于链接所在目录解释。
pub fn resolve_link_target(link_path: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        link_path
            .parent()
            .map(|p| p.join(target))
            .unwrap_or_else(|| target.to_path_buf())
    }
}
