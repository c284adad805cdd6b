//! Side-effecting parts of hostrun: files under the home directory, the
//! inventory loader and the ssh transport.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod host_log;
pub mod init;
pub mod inventory;
pub mod paths;
pub mod process;
pub mod report_store;
pub mod settings;
pub mod ssh;
pub mod transport;

/// Replace `path` with `contents` via a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .map(OsString::from)
        .with_context(|| format!("path missing file name {}", path.display()))?;
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))
}
