//! Per-invocation context shared by the subcommands.

use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::io::paths::{HostrunPaths, expand_tilde};
use crate::io::settings::{Settings, load_settings};

/// Paths and settings of one hostrun home. Built once in `main` and passed down.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub paths: HostrunPaths,
    pub settings: Settings,
}

impl RunContext {
    /// Load settings from `home` (default `~/.hostrun`). Nothing is created.
    pub fn load(home: Option<PathBuf>) -> Result<Self> {
        let home = match home {
            Some(home) => expand_tilde(&home),
            None => HostrunPaths::default_home()?,
        };
        let paths = HostrunPaths::new(home);
        let settings = load_settings(&paths.settings_path)?;
        debug!(home = %paths.home.display(), ?settings, "loaded context");
        Ok(Self { paths, settings })
    }
}
