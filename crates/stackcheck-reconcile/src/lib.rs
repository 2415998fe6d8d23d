//! stackcheck-reconcile: idempotent repair of on-disk deployment state.
//!
//! Runs once, single-threaded, before the stack is (re)started. Each
//! template entry names a path under the deployment root and the kind it
//! must have; the reconciler turns that into a [`ReconciliationPlan`] and
//! applies it:
//!
//! ```text
//! template ──build_plan──▶ ReconciliationPlan ──apply──▶ AppliedActions
//!              │                                 │
//!              └─ Filesystem::exists             └─ remove / mkdir / write / chmod
//! ```
//!
//! An entry of the wrong kind (a directory where a config file belongs)
//! is removed and rebuilt. Default files are written only when absent, so
//! operator edits survive re-runs. Permission changes are best effort.

pub mod error;
pub mod fs;
pub mod plan;
pub mod reconciler;

pub use error::{ReconcileError, ReconcileResult};
pub use fs::{Filesystem, LocalFilesystem, PathKind};
pub use plan::{Action, Payload, PlannedAction, ReconciliationPlan};
pub use reconciler::{AppliedActions, PermissionWarning, StateReconciler, reconcile};
