//! Persisted run reports (`<home>/logs/<inventory>.report.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::report::RunReport;

/// Atomically write `report` as pretty JSON.
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    debug!(path = %path.display(), hosts = report.results.len(), "writing run report");
    let mut buf = serde_json::to_string_pretty(report).context("serialize run report")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Load the last report for an inventory, if one was written.
pub fn load_report(path: &Path) -> Result<Option<RunReport>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let report =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(report))
}
