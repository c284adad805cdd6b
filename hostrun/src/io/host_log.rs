//! Per-host run logs under `<home>/logs/`.
//!
//! One file per inventory host, rewritten on every run of that inventory.
//! Entries are prefixed with a local `[%Y-%m-%d %H:%M:%S]` timestamp.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use crate::core::types::{ExecutionResult, HostDescriptor, Job};
use crate::io::paths::HostrunPaths;

/// Log file of a single host for one inventory.
#[derive(Debug, Clone)]
pub struct HostLog {
    path: PathBuf,
}

impl HostLog {
    pub fn new(paths: &HostrunPaths, inventory: &str, host: &HostDescriptor) -> Self {
        Self {
            path: paths.host_log_path(inventory, host),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log and record the command about to run.
    pub fn begin(&self, job: &Job) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let line = entry(
            &timestamp(),
            &format!("Executing command on {}:\n{}", job.host, job.command),
        );
        fs::write(&self.path, line).with_context(|| format!("write {}", self.path.display()))
    }

    /// Append the outcome of the host's command.
    pub fn record(&self, result: &ExecutionResult) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(render_result(result, &timestamp()).as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }
}

/// Log entries for a finished host, all stamped with `ts`.
///
/// Multi-step jobs get one block per step that ran.
pub fn render_result(result: &ExecutionResult, ts: &str) -> String {
    let mut out = String::new();
    if result.steps.is_empty() {
        render_streams(&mut out, ts, &result.stdout, &result.stderr);
        if let Some(err) = &result.error {
            out.push_str(&entry(ts, &format!("Failed: {err}")));
        }
    } else {
        for (index, step) in result.steps.iter().enumerate() {
            out.push_str(&entry(
                ts,
                &format!(
                    "Step {}: {} (exit status {}) in {:.2}s",
                    index + 1,
                    step.command,
                    exit_label(step.exit_status),
                    step.duration.as_secs_f64()
                ),
            ));
            render_streams(&mut out, ts, &step.stdout, &step.stderr);
            if let Some(err) = &step.error {
                out.push_str(&entry(ts, &format!("Failed: {err}")));
            }
        }
        let last_error = result.steps.last().and_then(|step| step.error.as_ref());
        if let Some(err) = result.error.as_ref().filter(|err| Some(*err) != last_error) {
            out.push_str(&entry(ts, &format!("Failed: {err}")));
        }
    }
    out.push_str(&entry(
        ts,
        &format!(
            "Finished: {} (exit status {}) in {:.2}s",
            result.state(),
            exit_label(result.exit_status),
            result.duration.as_secs_f64()
        ),
    ));
    out
}

fn render_streams(out: &mut String, ts: &str, stdout: &[u8], stderr: &[u8]) {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    if !stdout.trim().is_empty() {
        out.push_str(&entry(ts, &format!("Output:\n{}", stdout.trim_end())));
    }
    if !stderr.trim().is_empty() {
        out.push_str(&entry(ts, &format!("Error output:\n{}", stderr.trim_end())));
    }
}

fn exit_label(exit_status: Option<i32>) -> String {
    exit_status.map_or_else(|| "none".to_string(), |code| code.to_string())
}

/// Existing log files of `hosts` for `inventory`, in host order.
pub fn existing_logs(
    paths: &HostrunPaths,
    inventory: &str,
    hosts: &[HostDescriptor],
) -> Vec<PathBuf> {
    hosts
        .iter()
        .map(|host| paths.host_log_path(inventory, host))
        .filter(|path| path.is_file())
        .collect()
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn entry(ts: &str, message: &str) -> String {
    format!("[{ts}] {message}\n")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::types::{HostError, RemoteOutput, Step, StepResult};

    fn job(address: &str) -> Job {
        Job::new(
            HostDescriptor {
                address: address.to_string(),
                port: 22,
                credential: "lab".to_string(),
                command: None,
            },
            "uptime",
        )
    }

    #[test]
    fn renders_output_and_status() {
        let result = ExecutionResult::from_output(
            &job("a"),
            RemoteOutput {
                exit_status: 0,
                stdout: b"up 2 days\n".to_vec(),
                stderr: Vec::new(),
            },
            Duration::from_millis(250),
        );
        let rendered = render_result(&result, "2026-01-02 03:04:05");
        assert_eq!(
            rendered,
            "[2026-01-02 03:04:05] Output:\nup 2 days\n\
             [2026-01-02 03:04:05] Finished: ok (exit status 0) in 0.25s\n"
        );
    }

    #[test]
    fn renders_failures() {
        let result = ExecutionResult::from_error(
            &job("a"),
            HostError::connection("Connection refused"),
            Duration::ZERO,
        );
        let rendered = render_result(&result, "ts");
        assert!(rendered.contains("[ts] Failed: connection error: Connection refused\n"));
        assert!(rendered.contains("Finished: connection (exit status none)"));
    }

    #[test]
    fn begin_truncates_and_record_appends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HostrunPaths::new(temp.path());
        let first = job("hostA");
        let log = HostLog::new(&paths, "lab", &first.host);

        fs::create_dir_all(&paths.logs_dir).expect("logs dir");
        fs::write(log.path(), "stale contents\n").expect("seed");

        log.begin(&first).expect("begin");
        let result = ExecutionResult::from_output(&first, RemoteOutput::default(), Duration::ZERO);
        log.record(&result).expect("record");

        let contents = fs::read_to_string(log.path()).expect("read");
        assert!(!contents.contains("stale"));
        assert!(contents.contains("Executing command on hostA:\nuptime\n"));
        assert!(contents.contains("Finished: ok"));

        let found = existing_logs(&paths, "lab", &[first.host.clone(), job("hostB").host]);
        assert_eq!(found, vec![log.path().to_path_buf()]);
    }

    #[test]
    fn renders_each_step_then_the_deadline() {
        let job = Job::with_steps(job("a").host, vec![Step::run("ls"), Step::run("sync")]);
        let ls = StepResult::from_output(
            "ls",
            RemoteOutput {
                exit_status: 0,
                stdout: b"etc\n".to_vec(),
                stderr: Vec::new(),
            },
            Duration::from_millis(10),
        );
        let result = ExecutionResult::from_steps(
            &job,
            vec![ls],
            Some(HostError::timeout("no result within 1s")),
            Duration::from_secs(1),
        );
        assert_eq!(
            render_result(&result, "ts"),
            "[ts] Step 1: ls (exit status 0) in 0.01s\n\
             [ts] Output:\netc\n\
             [ts] Failed: timeout error: no result within 1s\n\
             [ts] Finished: timeout (exit status none) in 1.00s\n"
        );
    }
}
