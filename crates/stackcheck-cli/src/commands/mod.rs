pub mod init;
pub mod reconcile;
pub mod verify;

use std::path::{Path, PathBuf};

use anyhow::Context;
use stackcheck_core::StackConfig;

pub const CONFIG_FILE: &str = "stackcheck.toml";

pub fn load_config(path: &Path) -> anyhow::Result<StackConfig> {
    StackConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// Deployment root: `--root` if given, else `[stack].root` resolved
/// against the config file's directory, else that directory itself.
pub fn resolve_root(config_path: &Path, config: &StackConfig, root_override: Option<&Path>) -> PathBuf {
    if let Some(root) = root_override {
        return root.to_path_buf();
    }
    let config_dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match &config.stack.root {
        Some(root) if root.is_absolute() => root.clone(),
        Some(root) => config_dir.join(root),
        None => config_dir,
    }
}
