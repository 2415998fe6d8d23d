use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use stackcheck_core::StackConfig;

use super::CONFIG_FILE;

pub fn init(path: &Path, name: Option<&str>, force: bool) -> anyhow::Result<()> {
    let output = write_scaffold(path, name, force)?;
    println!("✓ Generated {}", output.display());
    println!("  Edit the service endpoints, then run: stackcheck verify");
    Ok(())
}

fn write_scaffold(path: &Path, name: Option<&str>, force: bool) -> anyhow::Result<PathBuf> {
    let output = path.join(CONFIG_FILE);
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let name = match name {
        Some(name) => name.to_string(),
        None => default_name(path),
    };
    let content = StackConfig::scaffold(&name).to_toml_string()?;

    std::fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;
    std::fs::write(&output, content).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(path = %output.display(), stack = %name, "wrote scaffold config");
    Ok(output)
}

fn default_name(path: &Path) -> String {
    std::fs::canonicalize(path)
        .ok()
        .as_deref()
        .unwrap_or(path)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("stack")
        .to_string()
}
