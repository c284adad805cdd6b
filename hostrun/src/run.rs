//! Orchestration for `hostrun run`.
//!
//! Everything that can fail fatally (settings, inventory, command resolution)
//! happens in [`prepare`], before any host is contacted. [`execute`] never
//! fails because of a host; only the report itself comes back.

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::context::RunContext;
use crate::core::report::RunReport;
use crate::core::types::{ExecutionResult, Job};
use crate::executor::{Executor, ExecutorConfig, RunObserver};
use crate::io::host_log::HostLog;
use crate::io::inventory::{Inventory, load_inventory};
use crate::io::paths::HostrunPaths;
use crate::io::report_store::write_report;
use crate::io::ssh::{SshOptions, SshTransport};
use crate::io::transport::{RetryingTransport, Transport};
use crate::progress::Progress;

/// Per-run overrides of the settings file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub command: Option<String>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

/// A validated run, ready to dispatch.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// File stem of the inventory; keys logs and the stored report.
    pub inventory_name: String,
    pub inventory_path: PathBuf,
    pub inventory: Inventory,
    pub jobs: Vec<Job>,
    pub config: ExecutorConfig,
    pub retries: u32,
}

/// Load the inventory and resolve one command per host.
#[instrument(skip_all, fields(inventory = inventory_arg))]
pub fn prepare(ctx: &RunContext, inventory_arg: &str, options: &RunOptions) -> Result<RunPlan> {
    let (inventory_path, inventory_name) = ctx.paths.resolve_inventory(inventory_arg)?;
    let inventory = load_inventory(&inventory_path)
        .with_context(|| format!("invalid inventory {}", inventory_path.display()))?;
    let jobs = inventory
        .resolve_commands(options.command.as_deref())
        .with_context(|| format!("invalid inventory {}", inventory_path.display()))?;

    let config = ExecutorConfig {
        workers: options.workers.unwrap_or(ctx.settings.workers),
        timeout: options
            .timeout_secs
            .map_or_else(|| ctx.settings.timeout(), Duration::from_secs),
    };
    config.validate()?;

    info!(hosts = jobs.len(), workers = config.workers, "run prepared");
    Ok(RunPlan {
        inventory_name,
        inventory_path,
        inventory,
        jobs,
        config,
        retries: options.retries.unwrap_or(ctx.settings.retries),
    })
}

/// Human-readable summary shown before asking for confirmation.
pub fn render_plan(plan: &RunPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Inventory '{}' ({}): {} hosts, {} workers, timeout {}s",
        plan.inventory_name,
        plan.inventory_path.display(),
        plan.jobs.len(),
        plan.config.workers.min(plan.jobs.len()),
        plan.config.timeout.as_secs_f64()
    );
    for job in &plan.jobs {
        let _ = writeln!(out, "  {}: {}", job.host, job.command);
    }
    out
}

/// The ssh transport for `plan`, with connection retries when configured.
pub fn build_transport(ctx: &RunContext, plan: &RunPlan) -> Arc<dyn Transport> {
    let ssh = SshTransport::new(
        plan.inventory.credentials.clone(),
        SshOptions::from_settings(&ctx.settings),
    );
    if plan.retries == 0 {
        Arc::new(ssh)
    } else {
        Arc::new(RetryingTransport::new(
            ssh,
            plan.retries,
            ctx.settings.retry_delay(),
        ))
    }
}

/// Dispatch every host, write per-host logs, persist the report.
///
/// `progress` is advanced as hosts finish and cleared at the end. Log and
/// report write failures are logged and do not fail the run.
#[instrument(skip_all, fields(inventory = %plan.inventory_name))]
pub fn execute<W: Write + Send>(
    ctx: &RunContext,
    plan: &RunPlan,
    transport: Arc<dyn Transport>,
    progress: &Progress<W>,
) -> Result<RunReport> {
    ctx.paths.ensure_dirs()?;
    let executor = Executor::new(transport, plan.config)?;
    let observer = (
        HostLogObserver {
            paths: &ctx.paths,
            inventory: &plan.inventory_name,
        },
        progress,
    );
    let report = executor.run(&plan.jobs, &observer);
    progress.finish();

    let report_path = ctx.paths.report_path(&plan.inventory_name);
    if let Err(err) = write_report(&report_path, &report) {
        warn!(error = %format!("{err:#}"), "failed to store run report");
    }
    info!(
        succeeded = report.summary().succeeded,
        failed = report.summary().failures(),
        "run finished"
    );
    Ok(report)
}

struct HostLogObserver<'a> {
    paths: &'a HostrunPaths,
    inventory: &'a str,
}

impl RunObserver for HostLogObserver<'_> {
    fn host_started(&self, _index: usize, job: &Job) {
        let log = HostLog::new(self.paths, self.inventory, &job.host);
        if let Err(err) = log.begin(job) {
            warn!(host = %job.host, error = %format!("{err:#}"), "failed to start host log");
        }
    }

    fn host_finished(&self, _index: usize, result: &ExecutionResult) {
        let log = HostLog::new(self.paths, self.inventory, &result.host);
        if let Err(err) = log.record(result) {
            warn!(host = %result.host, error = %format!("{err:#}"), "failed to write host log");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indicatif::ProgressBar;

    use super::*;
    use crate::core::types::{ErrorKind, HostError, HostState};
    use crate::io::report_store::load_report;
    use crate::io::settings::Settings;
    use crate::test_support::{Behavior, ScriptedTransport};

    const INVENTORY: &str = r#"
command: uptime
credentials:
  lab:
    username: admin
hosts:
  - address: hostA
    credential: lab
  - address: hostB
    credential: lab
  - address: hostC
    credential: lab
    command: "df -h"
"#;

    fn context(home: &std::path::Path) -> RunContext {
        let paths = HostrunPaths::new(home);
        paths.ensure_dirs().expect("dirs");
        fs::write(paths.inventory_path("lab"), INVENTORY).expect("inventory");
        RunContext {
            paths,
            settings: Settings {
                workers: 2,
                timeout_secs: 5,
                ..Settings::default()
            },
        }
    }

    #[test]
    fn prepare_applies_overrides_and_resolves_commands() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let options = RunOptions {
            command: Some("hostname".to_string()),
            workers: Some(8),
            ..RunOptions::default()
        };
        let plan = prepare(&ctx, "lab", &options).expect("prepare");
        assert_eq!(plan.inventory_name, "lab");
        assert_eq!(plan.config.workers, 8);
        assert_eq!(plan.config.timeout, Duration::from_secs(5));
        let commands: Vec<_> = plan.jobs.iter().map(|job| job.command.as_str()).collect();
        assert_eq!(commands, ["hostname", "hostname", "df -h"]);

        let rendered = render_plan(&plan);
        assert!(rendered.contains("3 hosts, 3 workers, timeout 5s"));
        assert!(rendered.contains("  hostC: df -h\n"));
    }

    #[test]
    fn prepare_rejects_zero_workers_override() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let options = RunOptions {
            workers: Some(0),
            ..RunOptions::default()
        };
        assert!(prepare(&ctx, "lab", &options).is_err());
    }

    #[test]
    fn prepare_reports_inventory_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        fs::write(
            ctx.paths.inventory_path("dup"),
            "credentials: {lab: {username: a}}\nhosts:\n  - {address: h, credential: lab}\n  - {address: H, credential: lab}\ncommand: uptime\n",
        )
        .expect("write");
        let err = prepare(&ctx, "dup", &RunOptions::default()).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate"));
    }

    #[test]
    fn execute_writes_logs_report_and_progress() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let plan = prepare(&ctx, "lab", &RunOptions::default()).expect("prepare");
        let transport = ScriptedTransport::new()
            .with("hostB", Behavior::Fail(HostError::connection("No route to host")));

        let progress = Progress::new(plan.jobs.len(), ProgressBar::hidden(), Vec::new());
        let report = execute(&ctx, &plan, Arc::new(transport), &progress).expect("execute");

        let states: Vec<_> = report.results.iter().map(ExecutionResult::state).collect();
        assert_eq!(
            states,
            [
                HostState::Succeeded,
                HostState::Failed(ErrorKind::Connection),
                HostState::Succeeded
            ]
        );

        let progress = String::from_utf8(progress.into_fallback()).expect("utf8");
        assert_eq!(progress.lines().count(), 3);
        assert!(progress.contains("hostB connection"));

        let stored = load_report(&ctx.paths.report_path("lab"))
            .expect("load")
            .expect("stored");
        assert_eq!(stored.results.len(), 3);

        let log_b = fs::read_to_string(ctx.paths.host_log_path("lab", &plan.jobs[1].host))
            .expect("host log");
        assert!(log_b.contains("Failed: connection error: No route to host"));
    }
}
