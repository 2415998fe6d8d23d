//! Reconciliation plans: the ordered actions that bring a tree into shape.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use stackcheck_core::config::is_contained;
use stackcheck_core::{EntryKind, ReconcileEntry, WritePolicy};

use crate::error::{ReconcileError, ReconcileResult};
use crate::fs::{Filesystem, PathKind};

/// One kind of repair step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Delete an entry whose kind does not match the template.
    RemoveIfWrongType,
    EnsureDirectory,
    WriteDefaultFile,
    /// Best effort; failures become warnings.
    SetPermissions,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::RemoveIfWrongType => "remove",
            Action::EnsureDirectory => "mkdir",
            Action::WriteDefaultFile => "write",
            Action::SetPermissions => "chmod",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Content(String),
    Mode(u32),
}

/// A single step of a [`ReconciliationPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub action: Action,
    /// Absolute target (root joined with the template path).
    pub target: PathBuf,
    pub expected_kind: EntryKind,
    pub payload: Option<Payload>,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<7}{}", self.action.label(), self.target.display())?;
        match &self.payload {
            Some(Payload::Mode(mode)) => write!(f, " ({mode:o})"),
            Some(Payload::Content(content)) => write!(f, " ({} bytes)", content.len()),
            None if self.action == Action::RemoveIfWrongType => {
                let expected = match self.expected_kind {
                    EntryKind::File => "file",
                    EntryKind::Directory => "directory",
                };
                write!(f, " (expected {expected})")
            }
            None => Ok(()),
        }
    }
}

/// Ordered sequence of actions for one deployment root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    actions: Vec<PlannedAction>,
}

impl ReconciliationPlan {
    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions that change content or structure, i.e. everything but chmod.
    pub fn structural_len(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action != Action::SetPermissions)
            .count()
    }

    fn push(&mut self, action: Action, target: &Path, kind: EntryKind, payload: Option<Payload>) {
        self.actions.push(PlannedAction {
            action,
            target: target.to_path_buf(),
            expected_kind: kind,
            payload,
        });
    }
}

fn inspect(fs: &dyn Filesystem, path: &Path) -> ReconcileResult<PathKind> {
    fs.exists(path).map_err(|source| ReconcileError::Inspect {
        path: path.to_path_buf(),
        source,
    })
}

/// The tree as it will look once the actions planned so far have run.
struct PlannedTree<'a> {
    fs: &'a dyn Filesystem,
    /// Paths whose kind is fixed by an earlier action.
    settled: HashMap<PathBuf, EntryKind>,
    /// Directories that will be recreated empty; nothing beneath them survives.
    cleared: Vec<PathBuf>,
}

impl<'a> PlannedTree<'a> {
    fn new(fs: &'a dyn Filesystem) -> Self {
        Self {
            fs,
            settled: HashMap::new(),
            cleared: Vec::new(),
        }
    }

    fn kind(&self, path: &Path) -> ReconcileResult<PathKind> {
        if let Some(kind) = self.settled.get(path) {
            return Ok(match kind {
                EntryKind::File => PathKind::File,
                EntryKind::Directory => PathKind::Directory,
            });
        }
        if self.cleared.iter().any(|dir| path.starts_with(dir) && path != dir) {
            return Ok(PathKind::None);
        }
        match self.fs.exists(path) {
            // A stale file further up that the template does not know about.
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => Ok(PathKind::None),
            other => other.map_err(|source| ReconcileError::Inspect {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn settle(&mut self, path: &Path, kind: EntryKind, recreated: bool) {
        self.settled.insert(path.to_path_buf(), kind);
        if recreated && kind == EntryKind::Directory {
            self.cleared.push(path.to_path_buf());
        }
    }
}

/// Inspect the tree under `root` and derive the actions `template` needs.
///
/// Entries are checked against the tree as earlier actions will leave it,
/// so a stale file sitting where a parent directory belongs is replaced
/// before anything is planned beneath it. Planning never touches the
/// filesystem beyond reading it.
pub fn build_plan(
    fs: &dyn Filesystem,
    root: &Path,
    template: &[ReconcileEntry],
) -> ReconcileResult<ReconciliationPlan> {
    let mut plan = ReconciliationPlan::default();
    let mut tree = PlannedTree::new(fs);

    match inspect(fs, root)? {
        PathKind::Directory => {}
        PathKind::None => plan.push(Action::EnsureDirectory, root, EntryKind::Directory, None),
        PathKind::File | PathKind::Other => {
            return Err(ReconcileError::RootNotDirectory(root.to_path_buf()));
        }
    }

    for entry in template {
        if !is_contained(&entry.path) {
            return Err(ReconcileError::InvalidPath(entry.path.clone()));
        }
        let relative: PathBuf = entry
            .path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        let target = root.join(&relative);

        // Parents first, top-down.
        let mut parent = root.to_path_buf();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            parent.push(component);
            match tree.kind(&parent)? {
                PathKind::Directory | PathKind::None => {}
                PathKind::File | PathKind::Other => {
                    plan.push(Action::RemoveIfWrongType, &parent, EntryKind::Directory, None);
                    plan.push(Action::EnsureDirectory, &parent, EntryKind::Directory, None);
                    tree.settle(&parent, EntryKind::Directory, true);
                }
            }
        }

        let current = tree.kind(&target)?;
        let wrong_kind = matches!(
            (entry.kind, current),
            (EntryKind::Directory, PathKind::File | PathKind::Other)
                | (EntryKind::File, PathKind::Directory | PathKind::Other)
        );
        if wrong_kind {
            plan.push(Action::RemoveIfWrongType, &target, entry.kind, None);
        }
        let missing = wrong_kind || current == PathKind::None;

        match entry.kind {
            EntryKind::Directory => {
                if missing {
                    plan.push(Action::EnsureDirectory, &target, entry.kind, None);
                }
            }
            EntryKind::File => {
                if missing || entry.policy == WritePolicy::Always {
                    plan.push(
                        Action::WriteDefaultFile,
                        &target,
                        entry.kind,
                        Some(Payload::Content(entry.content.clone())),
                    );
                }
            }
        }
        tree.settle(&target, entry.kind, wrong_kind);

        if let Some(mode) = entry.mode {
            plan.push(Action::SetPermissions, &target, entry.kind, Some(Payload::Mode(mode)));
        }
    }

    Ok(plan)
}
