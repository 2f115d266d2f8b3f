pub mod copier;
pub mod decision;
pub mod inspector;
pub mod reconciler;
pub mod script;

pub use copier::{CopierConfig, CopyError, TreeCopier};
pub use decision::{
    decide, MountStatus, ReconciliationAction, StateKind, MOUNTED_RULES, UNMOUNTED_RULES,
};
pub use inspector::{classify, resolve_link_target, PathState};
pub use reconciler::{
    guard_path, LinkReconciler, ManagedLink, ReconcileError, ReconcileEvent, ReconcileOutcome,
};
pub use script::{render_script, sh_quote, write_script, ScriptParams};
