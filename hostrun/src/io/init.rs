//! `hostrun init`: home directory scaffolding and a starter inventory.

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use tracing::info;

use super::inventory::SAMPLE_INVENTORY;
use super::paths::HostrunPaths;
use super::settings::{Settings, write_settings};

/// Options for [`init_inventory`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing inventory of the same name.
    pub force: bool,
}

/// Create the home layout and write a sample inventory named `name`.
///
/// `settings.toml` is written only when missing so local tuning survives
/// repeated inits. Returns the path of the new inventory.
pub fn init_inventory(paths: &HostrunPaths, name: &str, options: &InitOptions) -> Result<PathBuf> {
    validate_name(name)?;
    paths.ensure_dirs()?;

    if !paths.settings_path.exists() {
        write_settings(&paths.settings_path, &Settings::default())?;
        info!(path = %paths.settings_path.display(), "wrote default settings");
    }

    let path = paths.inventory_path(name);
    if path.exists() && !options.force {
        return Err(anyhow!(
            "hostrun init: {} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    super::write_atomic(&path, SAMPLE_INVENTORY)?;
    info!(path = %path.display(), "wrote sample inventory");
    Ok(path)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("inventory name must be non-empty");
    }
    if name.starts_with('.') || name.contains(['/', '\\']) {
        bail!("inventory name '{name}' must be a plain file name");
    }
    Ok(())
}
