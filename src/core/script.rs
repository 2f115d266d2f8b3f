//! 无人值守脚本生成器
//!
//! 把协调器执行的同一份决策表渲染成独立的 POSIX sh 脚本，交给系统
//! 服务管理器在本进程不在场时（登录、卷挂载触发）执行。脚本无任何
//! 依赖、不读 stdin、只写自己的日志；任一链接转换失败时以非零退出。
//!
//! 分支体一律从 [`MOUNTED_RULES`] / [`UNMOUNTED_RULES`] 查表生成，
//! 决策表变更会同时反映到进程内协调器和这里，两边不会漂移。

use std::io;
use std::path::Path;

use super::decision::{lookup, ReconciliationAction, StateKind, MOUNTED_RULES, UNMOUNTED_RULES};
use super::reconciler::ManagedLink;

/// 脚本参数
#[derive(Debug, Clone)]
pub struct ScriptParams<'a> {
    /// 卷标识（只进脚本头部注释，挂载判断用挂载点）
    pub drive_id: Option<&'a str>,
    /// 卷的期望挂载点（脚本运行时自行检查是否在线）
    pub mount_path: &'a Path,
    /// 受管链接
    pub links: &'a [ManagedLink],
    /// 脚本日志文件
    pub log_path: &'a Path,
}

/// POSIX 单引号转义：' -> '\''
///
/// 所有插值进脚本的路径/标识串都必须经过这里，防止特殊字符破坏
/// 引号结构。
pub fn sh_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// 动作对应的脚本语句（参数：$1=名称 $2=本地路径 $3=期望目标）
fn action_call(action: ReconciliationAction) -> &'static str {
    match action {
        ReconciliationAction::LinkDirectly => r#"link_directly "$1" "$2" "$3""#,
        ReconciliationAction::MigrateThenLink => r#"migrate_then_link "$1" "$2" "$3""#,
        ReconciliationAction::QuarantineThenLink => r#"quarantine_then_link "$1" "$2" "$3""#,
        ReconciliationAction::QuarantineThenPlaceholder => {
            r#"quarantine_then_placeholder "$1" "$2""#
        }
        ReconciliationAction::NoOp => r#"log "$1: 无需处理""#,
    }
}

/// 渲染完整脚本文本
pub fn render_script(params: &ScriptParams) -> String {
    let mut s = String::new();
    s.push_str("#!/bin/sh\n");
    s.push_str("# drivelink 自动生成的链接协调脚本，请勿手工编辑\n");
    if let Some(id) = params.drive_id {
        s.push_str(&format!("# 目标卷: {}\n", id));
    }
    s.push_str(&format!(
        "# 生成时间: {}\n\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    s.push_str(&format!(
        "LOG={}\nMOUNT={}\nSTATUS=0\n\n",
        sh_quote(&params.log_path.to_string_lossy()),
        sh_quote(&params.mount_path.to_string_lossy())
    ));

    s.push_str(
        r#"log() {
    printf '%s %s\n' "$(date '+%Y-%m-%d %H:%M:%S')" "$*" >> "$LOG" 2>/dev/null
}

copy_tree() {
    if command -v rsync >/dev/null 2>&1; then
        rsync -a "$1/" "$2/"
    else
        cp -R "$1/." "$2/"
    fi
}

link_directly() {
    if ! mkdir -p "$3"; then
        log "$1: 无法创建盘上目标 $3"
        STATUS=1
        return
    fi
    if [ -L "$2" ] && ! rm "$2"; then
        log "$1: 移除过时链接失败"
        STATUS=1
        return
    fi
    if ln -s "$3" "$2"; then
        log "$1: 已链接到 $3"
    else
        log "$1: 建立链接失败"
        STATUS=1
    fi
}

migrate_then_link() {
    if ! mkdir -p "$3"; then
        log "$1: 无法创建盘上目标 $3"
        STATUS=1
        return
    fi
    if ! copy_tree "$2" "$3"; then
        log "$1: 迁移拷贝失败，本地数据保持原样"
        STATUS=1
        return
    fi
    BACKUP="$2.backup.$(date +%s)"
    if mv "$2" "$BACKUP" && ln -s "$3" "$2"; then
        log "$1: 已迁移并链接到 $3 (本地备份 $BACKUP)"
    else
        log "$1: 迁移后建链失败"
        STATUS=1
    fi
}

quarantine_then_link() {
    BACKUP="$2.backup.$(date +%s)"
    if mv "$2" "$BACKUP" && mkdir -p "$3" && ln -s "$3" "$2"; then
        log "$1: 意外文件已备份为 $BACKUP，链接已建立"
    else
        log "$1: 备份或建链失败"
        STATUS=1
    fi
}

quarantine_then_placeholder() {
    if rm "$2" && mkdir -p "$2"; then
        log "$1: 卷已离线，失效链接已替换为占位目录"
    else
        log "$1: 占位目录创建失败"
        STATUS=1
    fi
}

"#,
    );

    push_reconcile_fn(&mut s);

    for link in params.links {
        let subpath = format!("/{}", link.drive_subpath.to_string_lossy());
        s.push_str(&format!(
            "reconcile {} {} \"$MOUNT\"{}\n",
            sh_quote(&link.name),
            sh_quote(&link.local_path.to_string_lossy()),
            sh_quote(&subpath)
        ));
    }

    s.push_str("\nexit \"$STATUS\"\n");
    s
}

/// 从决策表生成 reconcile 函数
///
/// 分支判断顺序固定（链接先于目录先于文件），分支体逐条查表。
fn push_reconcile_fn(s: &mut String) {
    let m = |kind: StateKind| action_call(lookup(MOUNTED_RULES, kind));
    let u = |kind: StateKind| action_call(lookup(UNMOUNTED_RULES, kind));

    s.push_str("reconcile() {\n");
    s.push_str("    if [ -d \"$MOUNT\" ]; then\n");
    s.push_str("        if [ -L \"$2\" ]; then\n");
    s.push_str("            if [ \"$(readlink \"$2\")\" = \"$3\" ]; then\n");
    s.push_str(&format!("                {}\n", m(StateKind::CorrectSymlink)));
    s.push_str("            else\n");
    s.push_str(&format!("                {}\n", m(StateKind::StaleSymlink)));
    s.push_str("            fi\n");
    s.push_str("        elif [ -d \"$2\" ]; then\n");
    s.push_str(&format!("            {}\n", m(StateKind::RealDirectory)));
    s.push_str("        elif [ -f \"$2\" ]; then\n");
    s.push_str(&format!("            {}\n", m(StateKind::RegularFile)));
    s.push_str("        else\n");
    s.push_str(&format!("            {}\n", m(StateKind::Missing)));
    s.push_str("        fi\n");
    s.push_str("    else\n");
    // [ ! -e ] 跟随链接，测的是解析后目标是否可达
    s.push_str("        if [ -L \"$2\" ] && [ ! -e \"$2\" ]; then\n");
    s.push_str(&format!("            {}\n", u(StateKind::DanglingSymlink)));
    s.push_str("        else\n");
    s.push_str(&format!("            {}\n", u(StateKind::ReachableSymlink)));
    s.push_str("        fi\n");
    s.push_str("    fi\n");
    s.push_str("}\n\n");
}

/// 写出脚本并赋予可执行权限
///
/// 脚本会执行变更操作，所以根路径/空路径在生成阶段就拒绝。
pub fn write_script(path: &Path, params: &ScriptParams) -> io::Result<()> {
    super::reconciler::guard_path(params.mount_path).map_err(io::Error::other)?;
    for link in params.links {
        super::reconciler::guard_path(&link.local_path).map_err(io::Error::other)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_script(params))?;

    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}
