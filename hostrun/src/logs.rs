//! `hostrun log`: per-host logs and the stored report of the last run.

use std::fmt::Write as _;
use std::fs;

use anyhow::{Context, Result};
use chrono::Local;

use crate::core::report::summary_line;
use crate::io::host_log::existing_logs;
use crate::io::inventory::Inventory;
use crate::io::paths::HostrunPaths;
use crate::io::report_store::load_report;

/// Concatenate the logs of hosts still in `inventory`, then the last summary.
pub fn render_logs(paths: &HostrunPaths, name: &str, inventory: &Inventory) -> Result<String> {
    let mut out = String::new();
    let logs = existing_logs(paths, name, &inventory.hosts);
    if logs.is_empty() {
        let _ = writeln!(out, "No logs for inventory '{name}'.");
    }
    for path in &logs {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let _ = writeln!(out, "==> {} <==", path.display());
        out.push_str(&contents);
        if !contents.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }

    if let Some(report) = load_report(&paths.report_path(name))? {
        let finished = report.finished_at.with_timezone(&Local);
        let _ = writeln!(
            out,
            "Last run finished {}: {}",
            finished.format("%Y-%m-%d %H:%M:%S"),
            summary_line(&report)
        );
    }
    Ok(out)
}
