use std::path::Path;

use anyhow::Context;
use stackcheck_reconcile::{AppliedActions, LocalFilesystem, ReconciliationPlan, StateReconciler};

use super::{load_config, resolve_root};

pub fn reconcile(config_path: &Path, root: Option<&Path>, dry_run: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let root = resolve_root(config_path, &config, root);
    let reconciler = StateReconciler::new(LocalFilesystem);

    if config.reconcile.is_empty() {
        println!("Nothing to reconcile: no [[reconcile]] entries in {}", config_path.display());
        return Ok(());
    }

    if dry_run {
        let plan = reconciler
            .plan(&root, &config.reconcile)
            .with_context(|| format!("planning reconcile of {}", root.display()))?;
        print!("{}", format_plan(&plan, &root.display().to_string()));
        return Ok(());
    }

    let applied = reconciler
        .reconcile(&root, &config.reconcile)
        .with_context(|| format!("reconciling {}", root.display()))?;
    print!("{}", format_applied(&applied, &root.display().to_string()));
    Ok(())
}

fn format_plan(plan: &ReconciliationPlan, root: &str) -> String {
    if plan.structural_len() == 0 {
        return format!("✓ {root} already matches the template\n");
    }
    let mut out = format!("Plan for {root} ({} actions, dry run):\n", plan.actions().len());
    for action in plan.actions() {
        out.push_str(&format!("  {action}\n"));
    }
    out
}

fn format_applied(applied: &AppliedActions, root: &str) -> String {
    if applied.applied.is_empty() && applied.warnings.is_empty() {
        return format!("✓ {root} already matches the template\n");
    }
    let mut out = format!("✓ Reconciled {root} ({} actions)\n", applied.applied.len());
    for action in &applied.applied {
        out.push_str(&format!("  {action}\n"));
    }
    for warning in &applied.warnings {
        out.push_str(&format!(
            "  ⚠️  could not chmod {} to {:o}: {}\n",
            warning.path.display(),
            warning.mode,
            warning.error
        ));
    }
    out
}
