//! 协调决策表
//!
//! 挂载/卸载两种情形下"路径状态 -> 动作"的唯一真源。进程内协调器
//! 和生成的无人值守脚本都从这两张规则表推导行为，改动只需要改这里。

use std::path::{Path, PathBuf};

use super::inspector::{resolve_link_target, PathState};

/// 规则表里的路径状态类别
///
/// 比 [`PathState`] 更细：链接按目标是否正确（挂载时）或是否可达
/// （卸载时）拆成不同类别，规则表才能逐行对应动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// 链接已指向期望目标
    CorrectSymlink,
    /// 链接指向其他目标
    StaleSymlink,
    /// 悬空链接（解析后的目标不存在）
    DanglingSymlink,
    /// 链接目标仍然可达（可能是别的卷恰好满足同一路径）
    ReachableSymlink,
    /// 真实目录
    RealDirectory,
    /// 普通文件
    RegularFile,
    /// 不存在
    Missing,
}

/// 协调动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationAction {
    /// 直接建立链接（必要时先在盘上创建目标目录）
    LinkDirectly,
    /// 先把本地目录树迁移到盘上，再建立链接
    MigrateThenLink,
    /// 先把意外内容改名备份，再建立链接
    QuarantineThenLink,
    /// 移除失效链接，用本地占位目录顶替
    QuarantineThenPlaceholder,
    /// 无需处理
    NoOp,
}

/// 卷挂载状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountStatus {
    /// 已挂载，携带该链接的期望目标（挂载点 + 相对子路径）
    Mounted { expected_target: PathBuf },
    /// 未挂载
    Unmounted,
}

/// 挂载情形的决策表
///
/// 顺序即脚本分支顺序：链接判断必须先于目录判断。
pub const MOUNTED_RULES: &[(StateKind, ReconciliationAction)] = &[
    (StateKind::CorrectSymlink, ReconciliationAction::NoOp),
    (StateKind::StaleSymlink, ReconciliationAction::LinkDirectly),
    (StateKind::RealDirectory, ReconciliationAction::MigrateThenLink),
    (StateKind::RegularFile, ReconciliationAction::QuarantineThenLink),
    (StateKind::Missing, ReconciliationAction::LinkDirectly),
];

/// 卸载情形的决策表：只有悬空链接会被处理，其余一律不动
pub const UNMOUNTED_RULES: &[(StateKind, ReconciliationAction)] = &[
    (
        StateKind::DanglingSymlink,
        ReconciliationAction::QuarantineThenPlaceholder,
    ),
    (StateKind::ReachableSymlink, ReconciliationAction::NoOp),
    (StateKind::RealDirectory, ReconciliationAction::NoOp),
    (StateKind::RegularFile, ReconciliationAction::NoOp),
    (StateKind::Missing, ReconciliationAction::NoOp),
];

impl StateKind {
    /// 把实际路径状态归类到规则表的状态类别
    ///
    /// 卸载情形下判断的是解析后目标是否存在，而不是链接本身。
    pub fn of(local_path: &Path, state: &PathState, status: &MountStatus) -> StateKind {
        match (state, status) {
            (PathState::Symlink(target), MountStatus::Mounted { expected_target }) => {
                if target == expected_target {
                    StateKind::CorrectSymlink
                } else {
                    StateKind::StaleSymlink
                }
            }
            (PathState::Symlink(target), MountStatus::Unmounted) => {
                if resolve_link_target(local_path, target).exists() {
                    StateKind::ReachableSymlink
                } else {
                    StateKind::DanglingSymlink
                }
            }
            (PathState::RealDirectory, _) => StateKind::RealDirectory,
            (PathState::RegularFile, _) => StateKind::RegularFile,
            (PathState::Missing, _) => StateKind::Missing,
        }
    }
}

impl MountStatus {
    /// 当前情形对应的规则表
    pub fn rules(&self) -> &'static [(StateKind, ReconciliationAction)] {
        match self {
            MountStatus::Mounted { .. } => MOUNTED_RULES,
            MountStatus::Unmounted => UNMOUNTED_RULES,
        }
    }
}

/// 查表得到动作
pub fn decide(local_path: &Path, state: &PathState, status: &MountStatus) -> ReconciliationAction {
    let kind = StateKind::of(local_path, state, status);
    lookup(status.rules(), kind)
}

/// 在规则表中查某个状态类别的动作，表未覆盖的类别视为 NoOp
pub fn lookup(
    rules: &[(StateKind, ReconciliationAction)],
    kind: StateKind,
) -> ReconciliationAction {
    rules
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, action)| *action)
        .unwrap_or(ReconciliationAction::NoOp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted(target: &str) -> MountStatus {
        MountStatus::Mounted {
            expected_target: PathBuf::from(target),
        }
    }

    #[test]
    fn test_mounted_table() {
        let local = Path::new("/home/u/models");

        let correct = PathState::Symlink(PathBuf::from("/vol/d/models"));
        assert_eq!(
            decide(local, &correct, &mounted("/vol/d/models")),
            ReconciliationAction::NoOp
        );

        let stale = PathState::Symlink(PathBuf::from("/vol/old/models"));
        assert_eq!(
            decide(local, &stale, &mounted("/vol/d/models")),
            ReconciliationAction::LinkDirectly
        );

        assert_eq!(
            decide(local, &PathState::RealDirectory, &mounted("/vol/d/models")),
            ReconciliationAction::MigrateThenLink
        );
        assert_eq!(
            decide(local, &PathState::RegularFile, &mounted("/vol/d/models")),
            ReconciliationAction::QuarantineThenLink
        );
        assert_eq!(
            decide(local, &PathState::Missing, &mounted("/vol/d/models")),
            ReconciliationAction::LinkDirectly
        );
    }

    #[test]
    fn test_unmounted_table_only_touches_dangling_links() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("models");

        let dangling = PathState::Symlink(dir.path().join("gone"));
        assert_eq!(
            decide(&local, &dangling, &MountStatus::Unmounted),
            ReconciliationAction::QuarantineThenPlaceholder
        );

        // 目标仍可达的链接不动
        let reachable_target = dir.path().join("still-here");
        std::fs::create_dir(&reachable_target).unwrap();
        let reachable = PathState::Symlink(reachable_target);
        assert_eq!(
            decide(&local, &reachable, &MountStatus::Unmounted),
            ReconciliationAction::NoOp
        );

        for state in [
            PathState::RealDirectory,
            PathState::RegularFile,
            PathState::Missing,
        ] {
            assert_eq!(
                decide(&local, &state, &MountStatus::Unmounted),
                ReconciliationAction::NoOp
            );
        }
    }

    #[test]
    fn test_tables_cover_every_kind() {
        // 挂载表覆盖挂载时可能出现的所有类别
        for kind in [
            StateKind::CorrectSymlink,
            StateKind::StaleSymlink,
            StateKind::RealDirectory,
            StateKind::RegularFile,
            StateKind::Missing,
        ] {
            assert!(MOUNTED_RULES.iter().any(|(k, _)| *k == kind));
        }
        // 卸载表覆盖卸载时可能出现的所有类别
        for kind in [
            StateKind::DanglingSymlink,
            StateKind::ReachableSymlink,
            StateKind::RealDirectory,
            StateKind::RegularFile,
            StateKind::Missing,
        ] {
            assert!(UNMOUNTED_RULES.iter().any(|(k, _)| *k == kind));
        }
    }
}
