//! Applies reconciliation plans against a [`Filesystem`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use stackcheck_core::ReconcileEntry;

use crate::error::{ReconcileError, ReconcileResult};
use crate::fs::{Filesystem, LocalFilesystem};
use crate::plan::{Action, Payload, PlannedAction, ReconciliationPlan, build_plan};

/// A permission change that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionWarning {
    pub path: PathBuf,
    pub mode: u32,
    pub error: String,
}

/// What a reconcile pass actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedActions {
    pub applied: Vec<PlannedAction>,
    pub warnings: Vec<PermissionWarning>,
}

impl AppliedActions {
    /// Number of applied actions of the given kind.
    pub fn count(&self, action: Action) -> usize {
        self.applied.iter().filter(|a| a.action == action).count()
    }
}

/// Brings a deployment tree to its known-good shape before the stack starts.
pub struct StateReconciler<F = LocalFilesystem> {
    fs: F,
}

impl Default for StateReconciler<LocalFilesystem> {
    fn default() -> Self {
        Self::new(LocalFilesystem)
    }
}

impl<F: Filesystem> StateReconciler<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    /// Derive the plan for `root` without changing anything.
    pub fn plan(&self, root: &Path, template: &[ReconcileEntry]) -> ReconcileResult<ReconciliationPlan> {
        build_plan(&self.fs, root, template)
    }

    /// Plan and apply in one pass.
    pub fn reconcile(&self, root: &Path, template: &[ReconcileEntry]) -> ReconcileResult<AppliedActions> {
        let plan = self.plan(root, template)?;
        info!(
            root = %root.display(),
            actions = plan.actions().len(),
            "reconciling deployment tree"
        );
        self.apply(&plan)
    }

    /// Execute `plan` item by item.
    ///
    /// A failing item does not stop later ones; only actions on the same
    /// target are skipped after it. The first structural failure is
    /// returned once every item has been visited. Permission failures are
    /// recorded as warnings and never fail the pass.
    pub fn apply(&self, plan: &ReconciliationPlan) -> ReconcileResult<AppliedActions> {
        let mut applied = AppliedActions::default();
        let mut failed_targets: HashSet<&Path> = HashSet::new();
        let mut first_error: Option<ReconcileError> = None;

        for item in plan.actions() {
            if failed_targets.contains(item.target.as_path()) {
                debug!(path = %item.target.display(), action = item.action.label(), "skipped after earlier failure");
                continue;
            }

            if let (Action::SetPermissions, Some(Payload::Mode(mode))) = (item.action, &item.payload) {
                match self.fs.set_permissions(&item.target, *mode) {
                    Ok(()) => applied.applied.push(item.clone()),
                    Err(e) => {
                        warn!(
                            path = %item.target.display(),
                            mode = %format!("{mode:o}"),
                            error = %e,
                            "could not normalize permissions"
                        );
                        applied.warnings.push(PermissionWarning {
                            path: item.target.clone(),
                            mode: *mode,
                            error: e.to_string(),
                        });
                    }
                }
                continue;
            }

            match self.perform(item) {
                Ok(()) => {
                    debug!(path = %item.target.display(), action = item.action.label(), "applied");
                    applied.applied.push(item.clone());
                }
                Err(source) => {
                    error!(
                        path = %item.target.display(),
                        action = item.action.label(),
                        error = %source,
                        "reconcile action failed"
                    );
                    failed_targets.insert(item.target.as_path());
                    first_error.get_or_insert(ReconcileError::PathUnwritable {
                        path: item.target.clone(),
                        source,
                    });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(
                    applied = applied.applied.len(),
                    warnings = applied.warnings.len(),
                    "deployment tree reconciled"
                );
                Ok(applied)
            }
        }
    }

    fn perform(&self, item: &PlannedAction) -> std::io::Result<()> {
        match (item.action, &item.payload) {
            (Action::RemoveIfWrongType, _) => self.fs.remove_recursive(&item.target),
            (Action::EnsureDirectory, _) => self.fs.create_directory(&item.target),
            (Action::WriteDefaultFile, Some(Payload::Content(content))) => {
                self.fs.write_file(&item.target, content.as_bytes())
            }
            (Action::WriteDefaultFile, _) => self.fs.write_file(&item.target, b""),
            (Action::SetPermissions, _) => Ok(()),
        }
    }
}

/// Reconcile `root` against `template` on the local filesystem.
pub fn reconcile(root: &Path, template: &[ReconcileEntry]) -> ReconcileResult<AppliedActions> {
    StateReconciler::new(LocalFilesystem).reconcile(root, template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::PathKind;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io;

    use stackcheck_core::config::{DEFAULT_ALERT_RULES, DEFAULT_DATASOURCE};
    use stackcheck_core::{StackConfig, WritePolicy};

    /// Snapshot of a tree: relative path → file content (None for dirs).
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<String>> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
                let content = if e.file_type().is_file() {
                    Some(fs::read_to_string(e.path()).unwrap())
                } else {
                    None
                };
                (rel, content)
            })
            .collect()
    }

    fn template() -> Vec<ReconcileEntry> {
        vec![
            ReconcileEntry::directory("logs").with_mode(0o755),
            ReconcileEntry::directory("monitoring/prometheus"),
            ReconcileEntry::file("monitoring/prometheus/alert_rules.yml", "groups: []\n")
                .with_mode(0o644),
        ]
    }

    /// Wraps the local filesystem and fails selected operations.
    struct FlakyFs {
        fail_chmod: bool,
        fail_write_for: Option<PathBuf>,
    }

    impl Filesystem for FlakyFs {
        fn exists(&self, path: &Path) -> io::Result<PathKind> {
            LocalFilesystem.exists(path)
        }
        fn remove_recursive(&self, path: &Path) -> io::Result<()> {
            LocalFilesystem.remove_recursive(path)
        }
        fn create_directory(&self, path: &Path) -> io::Result<()> {
            LocalFilesystem.create_directory(path)
        }
        fn write_file(&self, path: &Path, content: &[u8]) -> io::Result<()> {
            if self.fail_write_for.as_deref() == Some(path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            LocalFilesystem.write_file(path, content)
        }
        fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
            if self.fail_chmod {
                return Err(io::Error::new(io::ErrorKind::Unsupported, "no chmod here"));
            }
            LocalFilesystem.set_permissions(path, mode)
        }
    }

    #[test]
    fn fresh_tree_is_materialized() {
        let dir = tempfile::tempdir().unwrap();
        let applied = reconcile(dir.path(), &template()).unwrap();

        assert!(dir.path().join("logs").is_dir());
        assert_eq!(
            fs::read_to_string(dir.path().join("monitoring/prometheus/alert_rules.yml")).unwrap(),
            "groups: []\n"
        );
        assert_eq!(applied.count(Action::WriteDefaultFile), 1);
        assert!(applied.warnings.is_empty() || cfg!(not(unix)));
    }

    #[test]
    fn directory_in_place_of_file_becomes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("monitoring/prometheus/alert_rules.yml");
        fs::create_dir_all(rules.join("junk")).unwrap();

        let applied = reconcile(dir.path(), &template()).unwrap();

        assert!(rules.is_file());
        assert_eq!(fs::read_to_string(&rules).unwrap(), "groups: []\n");
        assert_eq!(applied.count(Action::RemoveIfWrongType), 1);
    }

    #[test]
    fn file_in_place_of_directory_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("logs"), "stale").unwrap();

        reconcile(dir.path(), &template()).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn stale_file_over_a_parent_directory_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let template = StackConfig::scaffold("orders").reconcile;
        fs::create_dir(dir.path().join("monitoring")).unwrap();
        fs::write(dir.path().join("monitoring/prometheus"), "stale").unwrap();

        let applied = reconcile(dir.path(), &template).unwrap();

        assert_eq!(applied.count(Action::RemoveIfWrongType), 1);
        assert!(dir.path().join("monitoring/prometheus").is_dir());
        assert_eq!(
            fs::read_to_string(dir.path().join("monitoring/prometheus/alert_rules.yml")).unwrap(),
            DEFAULT_ALERT_RULES
        );
        assert!(
            dir.path()
                .join("monitoring/grafana/provisioning/datasources/datasource.yml")
                .is_file()
        );

        let once = snapshot(dir.path());
        let second = reconcile(dir.path(), &template).unwrap();
        assert_eq!(second.count(Action::RemoveIfWrongType), 0);
        assert_eq!(snapshot(dir.path()), once);
    }

    #[test]
    fn stale_file_over_an_unlisted_ancestor_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let template = StackConfig::scaffold("orders").reconcile;
        fs::write(dir.path().join("monitoring"), "stale").unwrap();

        reconcile(dir.path(), &template).unwrap();

        assert!(dir.path().join("monitoring").is_dir());
        assert!(dir.path().join("monitoring/prometheus/alert_rules.yml").is_file());
        assert_eq!(
            fs::read_to_string(
                dir.path()
                    .join("monitoring/grafana/provisioning/datasources/datasource.yml")
            )
            .unwrap(),
            DEFAULT_DATASOURCE
        );
    }

    #[test]
    fn operator_edits_survive_rerun() {
        let dir = tempfile::tempdir().unwrap();
        reconcile(dir.path(), &template()).unwrap();

        let rules = dir.path().join("monitoring/prometheus/alert_rules.yml");
        fs::write(&rules, "groups: [custom]\n").unwrap();

        reconcile(dir.path(), &template()).unwrap();
        assert_eq!(fs::read_to_string(&rules).unwrap(), "groups: [custom]\n");
    }

    #[test]
    fn always_policy_restores_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let template = vec![ReconcileEntry::file("a.yml", "baseline").with_policy(WritePolicy::Always)];
        fs::write(dir.path().join("a.yml"), "drifted").unwrap();

        reconcile(dir.path(), &template).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.yml")).unwrap(), "baseline");
    }

    #[test]
    fn reconcile_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("monitoring/prometheus/alert_rules.yml")).unwrap();
        fs::write(dir.path().join("logs"), "stale").unwrap();

        reconcile(dir.path(), &template()).unwrap();
        let once = snapshot(dir.path());

        let second = reconcile(dir.path(), &template()).unwrap();
        assert_eq!(snapshot(dir.path()), once);
        assert_eq!(second.count(Action::RemoveIfWrongType), 0);
        assert_eq!(second.count(Action::WriteDefaultFile), 0);
        assert_eq!(second.count(Action::EnsureDirectory), 0);
    }

    #[test]
    fn permission_failures_are_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = StateReconciler::new(FlakyFs {
            fail_chmod: true,
            fail_write_for: None,
        });

        let applied = reconciler.reconcile(dir.path(), &template()).unwrap();
        assert_eq!(applied.warnings.len(), 2);
        assert_eq!(applied.warnings[0].mode, 0o755);
        assert!(dir.path().join("monitoring/prometheus/alert_rules.yml").is_file());
    }

    #[test]
    fn unwritable_path_is_fatal_but_later_items_still_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("a.yml");
        let reconciler = StateReconciler::new(FlakyFs {
            fail_chmod: false,
            fail_write_for: Some(blocked.clone()),
        });
        let template = vec![
            ReconcileEntry::file("a.yml", "a").with_mode(0o644),
            ReconcileEntry::directory("logs"),
        ];

        let err = reconciler.reconcile(dir.path(), &template).unwrap_err();
        match err {
            ReconcileError::PathUnwritable { path, .. } => assert_eq!(path, blocked),
            other => panic!("unexpected error: {other}"),
        }
        assert!(dir.path().join("logs").is_dir());
        assert!(!blocked.exists());
    }

    #[test]
    fn dry_run_plan_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let before = snapshot(dir.path());

        let plan = StateReconciler::new(LocalFilesystem).plan(dir.path(), &template()).unwrap();
        assert!(!plan.is_empty());
        assert_eq!(snapshot(dir.path()), before);
    }
}
