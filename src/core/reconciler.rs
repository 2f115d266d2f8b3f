//! 链接协调器 - 核心状态机
//!
//! 对每条受管链接，按决策表把本地路径收敛到正确形态：挂载时指向
//! 盘上目标的符号链接，卸载时可写的本地占位目录。要求幂等：同一
//! 状态连续执行两次，第二次必为 NoOp。任何变更子步骤失败都立即
//! 中止本条链接的本轮转换，文件系统停留在最近的安全中间态。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::copier::TreeCopier;
use super::decision::{decide, MountStatus, ReconciliationAction};
use super::inspector::{classify, PathState};

/// 受管链接：本地路径 <-> 卷上相对子路径
///
/// 配置后不可变；系统默认管理两条（models 与 hub），引擎本身
/// 接受任意多条。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedLink {
    /// 显示名（日志与进度事件用）
    pub name: String,
    /// 本地路径（链接所在位置）
    pub local_path: PathBuf,
    /// 卷挂载点下的相对子路径
    pub drive_subpath: PathBuf,
}

impl ManagedLink {
    pub fn new(
        name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        drive_subpath: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            local_path: local_path.into(),
            drive_subpath: drive_subpath.into(),
        }
    }

    /// 挂载点下的期望目标
    pub fn expected_target(&self, mount_path: &Path) -> PathBuf {
        mount_path.join(&self.drive_subpath)
    }
}

/// 协调错误
///
/// 全部是可重试的局部错误，不代表持久状态损坏。
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("卷未挂载")]
    VolumeNotMounted,
    #[error("拒绝操作根路径或空路径: {0:?}")]
    PathIsRootOrEmpty(PathBuf),
    #[error("拷贝失败: {0}")]
    CopyFailed(String),
    #[error("删除失败: {0}")]
    RemoveFailed(String),
    #[error("创建链接失败: {0}")]
    SymlinkFailed(String),
    #[error("创建占位目录失败: {0}")]
    PlaceholderFailed(String),
}

/// 协调进度事件（人类可读）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileEvent {
    pub link: String,
    pub message: String,
}

/// 单条链接一次协调的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// 本轮执行的动作
    pub action: ReconciliationAction,
    /// 本地内容被改名到的备份路径（如有）
    pub backup_path: Option<PathBuf>,
}

impl ReconcileOutcome {
    fn noop() -> Self {
        Self {
            action: ReconciliationAction::NoOp,
            backup_path: None,
        }
    }
}

/// 链接协调器
///
/// 不持有全局可变状态；每条链接一把锁，同一链接串行、不同链接并行。
pub struct LinkReconciler {
    copier: TreeCopier,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Default for LinkReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkReconciler {
    pub fn new() -> Self {
        Self::with_copier(TreeCopier::new())
    }

    pub fn with_copier(copier: TreeCopier) -> Self {
        Self {
            copier,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 取本条链接的互斥锁
    async fn lock_for(&self, local_path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(local_path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 协调一条链接
    ///
    /// `mount_path` 为卷当前挂载点，`None` 表示未挂载。状态每次
    /// 重新读取，不依赖任何历史，所以事件触发与脚本触发可以安全
    /// 交错重入。
    pub async fn reconcile(
        &self,
        link: &ManagedLink,
        mount_path: Option<&Path>,
        progress_tx: Option<mpsc::Sender<ReconcileEvent>>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        // 安全前置检查必须发生在任何变更之前
        guard_path(&link.local_path)?;
        if let Some(mp) = mount_path {
            guard_path(mp)?;
        }

        let lock = self.lock_for(&link.local_path).await;
        let _guard = lock.lock().await;

        let status = match mount_path {
            Some(mp) => {
                let expected_target = link.expected_target(mp);
                guard_path(&expected_target)?;
                MountStatus::Mounted { expected_target }
            }
            None => MountStatus::Unmounted,
        };

        let state = classify(&link.local_path);
        let action = decide(&link.local_path, &state, &status);
        debug!(
            "链接 {}: 状态 [{}] 挂载 {} -> 动作 {:?}",
            link.name,
            state.describe(),
            mount_path.is_some(),
            action
        );

        let outcome = match (&action, &status) {
            (ReconciliationAction::NoOp, _) => {
                self.send_progress(&progress_tx, link, "无需处理，状态已正确")
                    .await;
                Ok(ReconcileOutcome::noop())
            }
            (
                ReconciliationAction::LinkDirectly,
                MountStatus::Mounted { expected_target },
            ) => {
                self.link_directly(link, &state, expected_target, &progress_tx)
                    .await
            }
            (
                ReconciliationAction::MigrateThenLink,
                MountStatus::Mounted { expected_target },
            ) => {
                self.migrate_then_link(link, expected_target, &progress_tx)
                    .await
            }
            (
                ReconciliationAction::QuarantineThenLink,
                MountStatus::Mounted { expected_target },
            ) => {
                self.quarantine_then_link(link, expected_target, &progress_tx)
                    .await
            }
            (ReconciliationAction::QuarantineThenPlaceholder, _) => {
                self.replace_with_placeholder(link, &progress_tx).await
            }
            // 决策表不会在卸载情形产出建链动作
            _ => Ok(ReconcileOutcome::noop()),
        }?;

        if outcome.action != ReconciliationAction::NoOp {
            info!("链接 {}: 已执行 {:?}", link.name, outcome.action);
        }
        Ok(outcome)
    }

    /// 并发协调多条链接（每条内部自行串行）
    pub async fn reconcile_all(
        &self,
        links: &[ManagedLink],
        mount_path: Option<&Path>,
        progress_tx: Option<mpsc::Sender<ReconcileEvent>>,
    ) -> Vec<(String, Result<ReconcileOutcome, ReconcileError>)> {
        let tasks = links.iter().map(|link| {
            let tx = progress_tx.clone();
            async move { (link.name.clone(), self.reconcile(link, mount_path, tx).await) }
        });
        futures::future::join_all(tasks).await
    }

    /// 直接建链；本地若是过时链接先移除
    async fn link_directly(
        &self,
        link: &ManagedLink,
        state: &PathState,
        target: &Path,
        progress_tx: &Option<mpsc::Sender<ReconcileEvent>>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        ensure_target_dir(target)?;

        if let PathState::Symlink(old) = state {
            self.send_progress(
                progress_tx,
                link,
                format!("移除过时链接 -> {}", old.display()),
            )
            .await;
            std::fs::remove_file(&link.local_path)
                .map_err(|e| ReconcileError::RemoveFailed(e.to_string()))?;
        }

        create_symlink(target, &link.local_path)?;
        self.send_progress(progress_tx, link, format!("已链接到 {}", target.display()))
            .await;

        Ok(ReconcileOutcome {
            action: ReconciliationAction::LinkDirectly,
            backup_path: None,
        })
    }

    /// 迁移本地目录树到盘上，本地改名备份后建链
    ///
    /// 拷贝失败必须发生在任何改名/删除之前，本地数据原样保留。
    async fn migrate_then_link(
        &self,
        link: &ManagedLink,
        target: &Path,
        progress_tx: &Option<mpsc::Sender<ReconcileEvent>>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        ensure_target_dir(target)?;

        // 目标已有内容时本地树会覆盖同名条目，提醒而不是静默
        if dir_is_nonempty(target) {
            warn!(
                "链接 {}: 盘上目标 {} 非空，本地内容将按路径覆盖同名条目",
                link.name,
                target.display()
            );
            self.send_progress(progress_tx, link, "注意：盘上目标非空，同名条目将被本地内容覆盖")
                .await;
        }

        self.send_progress(
            progress_tx,
            link,
            format!("正在迁移本地数据到 {}", target.display()),
        )
        .await;
        self.copier
            .copy_tree(&link.local_path, target)
            .await
            .map_err(|e| ReconcileError::CopyFailed(e.reason))?;

        let backup = quarantine(&link.local_path)?;
        self.send_progress(
            progress_tx,
            link,
            format!("本地目录已备份为 {}", backup.display()),
        )
        .await;

        create_symlink(target, &link.local_path)?;
        self.send_progress(progress_tx, link, format!("已链接到 {}", target.display()))
            .await;

        Ok(ReconcileOutcome {
            action: ReconciliationAction::MigrateThenLink,
            backup_path: Some(backup),
        })
    }

    /// 意外的普通文件：改名备份后建链
    async fn quarantine_then_link(
        &self,
        link: &ManagedLink,
        target: &Path,
        progress_tx: &Option<mpsc::Sender<ReconcileEvent>>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let backup = quarantine(&link.local_path)?;
        self.send_progress(
            progress_tx,
            link,
            format!("意外文件已备份为 {}", backup.display()),
        )
        .await;

        ensure_target_dir(target)?;
        create_symlink(target, &link.local_path)?;
        self.send_progress(progress_tx, link, format!("已链接到 {}", target.display()))
            .await;

        Ok(ReconcileOutcome {
            action: ReconciliationAction::QuarantineThenLink,
            backup_path: Some(backup),
        })
    }

    /// 移除悬空链接，创建本地占位目录
    async fn replace_with_placeholder(
        &self,
        link: &ManagedLink,
        progress_tx: &Option<mpsc::Sender<ReconcileEvent>>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        std::fs::remove_file(&link.local_path)
            .map_err(|e| ReconcileError::RemoveFailed(e.to_string()))?;
        std::fs::create_dir_all(&link.local_path)
            .map_err(|e| ReconcileError::PlaceholderFailed(e.to_string()))?;
        self.send_progress(progress_tx, link, "卷已离线，已用本地占位目录顶替失效链接")
            .await;

        Ok(ReconcileOutcome {
            action: ReconciliationAction::QuarantineThenPlaceholder,
            backup_path: None,
        })
    }

    /// 发送进度事件
    async fn send_progress(
        &self,
        tx: &Option<mpsc::Sender<ReconcileEvent>>,
        link: &ManagedLink,
        message: impl Into<String>,
    ) {
        if let Some(tx) = tx {
            let _ = tx
                .send(ReconcileEvent {
                    link: link.name.clone(),
                    message: message.into(),
                })
                .await;
        }
    }
}

/// 根路径与空路径一律拒绝，适用于所有会被变更操作触及的路径
pub fn guard_path(path: &Path) -> Result<(), ReconcileError> {
    if path.as_os_str().is_empty() || path == Path::new("/") {
        return Err(ReconcileError::PathIsRootOrEmpty(path.to_path_buf()));
    }
    Ok(())
}

fn ensure_target_dir(target: &Path) -> Result<(), ReconcileError> {
    std::fs::create_dir_all(target).map_err(|e| {
        ReconcileError::SymlinkFailed(format!("无法创建目标目录 {}: {}", target.display(), e))
    })
}

fn create_symlink(target: &Path, local: &Path) -> Result<(), ReconcileError> {
    std::os::unix::fs::symlink(target, local)
        .map_err(|e| ReconcileError::SymlinkFailed(e.to_string()))
}

fn dir_is_nonempty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut it| it.next().is_some())
        .unwrap_or(false)
}

/// 把路径改名为 `<原路径>.backup.<unix 时间戳>` 的隔离备份
///
/// 备份从不被引擎自动清理；同秒冲突时顺延时间戳。
fn quarantine(path: &Path) -> Result<PathBuf, ReconcileError> {
    let mut ts = chrono::Utc::now().timestamp();
    let mut backup = backup_name(path, ts);
    while backup.exists() {
        ts += 1;
        backup = backup_name(path, ts);
    }
    std::fs::rename(path, &backup).map_err(|e| ReconcileError::RemoveFailed(e.to_string()))?;
    Ok(backup)
}

fn backup_name(path: &Path, ts: i64) -> PathBuf {
    PathBuf::from(format!("{}.backup.{}", path.display(), ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::copier::CopierConfig;

    fn test_reconciler() -> LinkReconciler {
        // 测试环境不依赖外部工具
        LinkReconciler::with_copier(TreeCopier::with_config(CopierConfig {
            use_external_tools: false,
        }))
    }

    fn link_in(dir: &Path) -> ManagedLink {
        ManagedLink::new("models", dir.join("models"), "drivelink/models")
    }

    #[tokio::test]
    async fn test_fresh_drive_scenario() {
        // 本地缺失 + 盘上子路径缺失 -> 盘上建目录并链接
        let local_root = tempfile::tempdir().unwrap();
        let mount = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());
        let r = test_reconciler();

        let outcome = r.reconcile(&link, Some(mount.path()), None).await.unwrap();
        assert_eq!(outcome.action, ReconciliationAction::LinkDirectly);

        let target = link.expected_target(mount.path());
        assert!(target.is_dir());
        assert_eq!(std::fs::read_link(&link.local_path).unwrap(), target);
    }

    #[tokio::test]
    async fn test_idempotent_second_pass_is_noop() {
        let local_root = tempfile::tempdir().unwrap();
        let mount = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());
        let r = test_reconciler();

        r.reconcile(&link, Some(mount.path()), None).await.unwrap();
        let second = r.reconcile(&link, Some(mount.path()), None).await.unwrap();
        assert_eq!(second.action, ReconciliationAction::NoOp);
    }

    #[tokio::test]
    async fn test_convergence_on_reconnect() {
        // 卸载期间积累了数据的占位目录，在重新挂载后：
        // 数据出现在盘上与备份两处，本地变成链接
        let local_root = tempfile::tempdir().unwrap();
        let mount = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());
        std::fs::create_dir_all(link.local_path.join("sub")).unwrap();
        std::fs::write(link.local_path.join("a.bin"), b"a").unwrap();
        std::fs::write(link.local_path.join("sub/b.bin"), b"b").unwrap();

        let r = test_reconciler();
        let outcome = r.reconcile(&link, Some(mount.path()), None).await.unwrap();
        assert_eq!(outcome.action, ReconciliationAction::MigrateThenLink);

        let target = link.expected_target(mount.path());
        assert_eq!(std::fs::read(target.join("a.bin")).unwrap(), b"a");
        assert_eq!(std::fs::read(target.join("sub/b.bin")).unwrap(), b"b");

        let backup = outcome.backup_path.unwrap();
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("models.backup."));
        assert_eq!(std::fs::read(backup.join("a.bin")).unwrap(), b"a");
        assert_eq!(std::fs::read(backup.join("sub/b.bin")).unwrap(), b"b");

        assert_eq!(std::fs::read_link(&link.local_path).unwrap(), target);

        // 收敛后再跑一轮必须是 NoOp
        let second = r.reconcile(&link, Some(mount.path()), None).await.unwrap();
        assert_eq!(second.action, ReconciliationAction::NoOp);
    }

    #[tokio::test]
    async fn test_stale_symlink_repoint() {
        let local_root = tempfile::tempdir().unwrap();
        let old_mount = tempfile::tempdir().unwrap();
        let mount = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());

        let old_target = old_mount.path().join("drivelink/models");
        std::fs::create_dir_all(&old_target).unwrap();
        std::os::unix::fs::symlink(&old_target, &link.local_path).unwrap();

        let r = test_reconciler();
        let outcome = r.reconcile(&link, Some(mount.path()), None).await.unwrap();
        assert_eq!(outcome.action, ReconciliationAction::LinkDirectly);

        let target = link.expected_target(mount.path());
        assert_eq!(std::fs::read_link(&link.local_path).unwrap(), target);
    }

    #[tokio::test]
    async fn test_regular_file_is_quarantined_then_linked() {
        let local_root = tempfile::tempdir().unwrap();
        let mount = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());
        std::fs::write(&link.local_path, b"unexpected").unwrap();

        let r = test_reconciler();
        let outcome = r.reconcile(&link, Some(mount.path()), None).await.unwrap();
        assert_eq!(outcome.action, ReconciliationAction::QuarantineThenLink);

        let backup = outcome.backup_path.unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"unexpected");
        assert!(std::fs::read_link(&link.local_path).is_ok());
    }

    #[tokio::test]
    async fn test_dangling_link_healed_to_placeholder() {
        let local_root = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());
        std::os::unix::fs::symlink("/nonexistent/volume/models", &link.local_path).unwrap();

        let r = test_reconciler();
        let outcome = r.reconcile(&link, None, None).await.unwrap();
        assert_eq!(
            outcome.action,
            ReconciliationAction::QuarantineThenPlaceholder
        );

        // 占位目录是普通可写目录，不再是链接
        let meta = std::fs::symlink_metadata(&link.local_path).unwrap();
        assert!(meta.is_dir());
        assert!(std::fs::read_dir(&link.local_path).unwrap().next().is_none());

        // 幂等：再跑一轮不动占位目录
        let second = r.reconcile(&link, None, None).await.unwrap();
        assert_eq!(second.action, ReconciliationAction::NoOp);
    }

    #[tokio::test]
    async fn test_unmount_leaves_reachable_link_alone() {
        let local_root = tempfile::tempdir().unwrap();
        let other_volume = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());
        std::os::unix::fs::symlink(other_volume.path(), &link.local_path).unwrap();

        let r = test_reconciler();
        let outcome = r.reconcile(&link, None, None).await.unwrap();
        assert_eq!(outcome.action, ReconciliationAction::NoOp);
        assert!(std::fs::read_link(&link.local_path).is_ok());
    }

    #[tokio::test]
    async fn test_root_and_empty_paths_rejected_without_mutation() {
        let mount = tempfile::tempdir().unwrap();
        let r = test_reconciler();

        let root_link = ManagedLink::new("bad", "/", "drivelink/models");
        let err = r
            .reconcile(&root_link, Some(mount.path()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::PathIsRootOrEmpty(_)));

        let empty_link = ManagedLink::new("bad", "", "drivelink/models");
        let err = r
            .reconcile(&empty_link, Some(mount.path()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::PathIsRootOrEmpty(_)));

        // 挂载点目录未被写入任何内容
        assert!(std::fs::read_dir(mount.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_failure_before_copy_leaves_local_intact() {
        // 期望目标的某级父路径是普通文件 -> 建目录失败，
        // 迁移中止于任何改名/删除之前
        let local_root = tempfile::tempdir().unwrap();
        let mount = tempfile::tempdir().unwrap();
        let link = link_in(local_root.path());
        std::fs::create_dir_all(&link.local_path).unwrap();
        std::fs::write(link.local_path.join("data.txt"), b"keep me").unwrap();
        std::fs::write(mount.path().join("drivelink"), b"not a dir").unwrap();

        let r = test_reconciler();
        let err = r
            .reconcile(&link, Some(mount.path()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::SymlinkFailed(_)));

        // 本地目录原样保留
        assert!(link.local_path.is_dir());
        assert_eq!(
            std::fs::read(link.local_path.join("data.txt")).unwrap(),
            b"keep me"
        );
    }

    #[tokio::test]
    async fn test_reconcile_all_runs_every_link() {
        let local_root = tempfile::tempdir().unwrap();
        let mount = tempfile::tempdir().unwrap();
        let links = vec![
            ManagedLink::new("models", local_root.path().join("models"), "d/models"),
            ManagedLink::new("hub", local_root.path().join("hub"), "d/hub"),
        ];

        let r = test_reconciler();
        let results = r.reconcile_all(&links, Some(mount.path()), None).await;
        assert_eq!(results.len(), 2);
        for (_, result) in results {
            assert_eq!(result.unwrap().action, ReconciliationAction::LinkDirectly);
        }
    }
}
