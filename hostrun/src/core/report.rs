//! Run report: the order-stable collection of per-host results.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{ErrorKind, ExecutionResult, HostState};
use crate::exit_codes;

/// Terminal artifact of a run. `results[i]` belongs to inventory host `i`,
/// regardless of the order in which hosts completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ExecutionResult>,
}

/// Outcome counts for a report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub hosts: usize,
    pub succeeded: usize,
    pub timed_out: usize,
    pub failed: BTreeMap<ErrorKind, usize>,
}

impl ReportSummary {
    pub fn failures(&self) -> usize {
        self.timed_out + self.failed.values().sum::<usize>()
    }
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(ExecutionResult::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|result| !result.succeeded())
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            hosts: self.results.len(),
            ..ReportSummary::default()
        };
        for result in &self.results {
            match result.state() {
                HostState::Succeeded => summary.succeeded += 1,
                HostState::TimedOut => summary.timed_out += 1,
                HostState::Failed(kind) => *summary.failed.entry(kind).or_insert(0) += 1,
                HostState::Pending | HostState::Running => {}
            }
        }
        summary
    }

    /// Process exit code: [`exit_codes::OK`] only if every host succeeded.
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            exit_codes::OK
        } else {
            exit_codes::HOST_FAILED
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// One-line summary, e.g. `3 hosts: 2 ok, 1 failed (connection=1) in 4.20s`.
pub fn summary_line(report: &RunReport) -> String {
    let summary = report.summary();
    let mut line = format!(
        "{} hosts: {} ok, {} failed",
        summary.hosts,
        summary.succeeded,
        summary.failures()
    );
    let mut parts: Vec<String> = summary
        .failed
        .iter()
        .map(|(kind, count)| format!("{kind}={count}"))
        .collect();
    if summary.timed_out > 0 {
        parts.push(format!("timeout={}", summary.timed_out));
    }
    if !parts.is_empty() {
        let _ = write!(line, " ({})", parts.join(", "));
    }
    let _ = write!(line, " in {:.2}s", report.elapsed_secs());
    line
}

/// Render the report for a terminal: one section per host in inventory order,
/// followed by a status table and the summary line.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    for result in &report.results {
        let _ = writeln!(out, "=== {} [{}] ===", result.host, result.state());
        push_stream(&mut out, &result.stdout);
        push_stream(&mut out, &result.stderr);
        if let Some(err) = &result.error
            && err.kind != ErrorKind::Command
        {
            let _ = writeln!(out, "{err}");
        }
        out.push('\n');
    }

    let width = report
        .results
        .iter()
        .map(|result| result.host.to_string().len())
        .max()
        .unwrap_or(0)
        .max("HOST".len());
    let _ = writeln!(
        out,
        "{:<width$}  {:<14}  {:>4}  {:>9}",
        "HOST", "STATUS", "EXIT", "DURATION"
    );
    for result in &report.results {
        let exit = result
            .exit_status
            .map_or_else(|| "-".to_string(), |code| code.to_string());
        let _ = writeln!(
            out,
            "{:<width$}  {:<14}  {:>4}  {:>8.2}s",
            result.host.to_string(),
            result.state().to_string(),
            exit,
            result.duration.as_secs_f64()
        );
    }
    out.push_str(&summary_line(report));
    out.push('\n');
    out
}

fn push_stream(out: &mut String, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end();
    if !text.is_empty() {
        out.push_str(text);
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::types::{HostDescriptor, HostError, Job, RemoteOutput};

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

    fn ok(address: &str) -> ExecutionResult {
        let output = RemoteOutput {
            exit_status: 0,
            stdout: format!("{address} up\n").into_bytes(),
            stderr: Vec::new(),
        };
        ExecutionResult::from_output(&job(address), output, Duration::from_millis(100))
    }

    fn report(results: Vec<ExecutionResult>) -> RunReport {
        let started_at = Utc::now();
        RunReport {
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(1500),
            results,
        }
    }

    #[test]
    fn all_ok_exits_zero() {
        let report = report(vec![ok("a"), ok("b")]);
        assert!(report.all_succeeded());
        assert_eq!(report.exit_code(), exit_codes::OK);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn summary_counts_each_failure_kind() {
        let report = report(vec![
            ok("a"),
            ExecutionResult::from_error(&job("b"), HostError::connection("refused"), Duration::ZERO),
            ExecutionResult::from_error(&job("c"), HostError::timeout("slow"), Duration::ZERO),
            ExecutionResult::from_output(
                &job("d"),
                RemoteOutput {
                    exit_status: 1,
                    ..RemoteOutput::default()
                },
                Duration::ZERO,
            ),
        ]);
        let summary = report.summary();
        assert_eq!(summary.hosts, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.failed.get(&ErrorKind::Connection), Some(&1));
        assert_eq!(summary.failed.get(&ErrorKind::Command), Some(&1));
        assert_eq!(summary.failures(), 3);
        assert_eq!(report.exit_code(), exit_codes::HOST_FAILED);
        assert_eq!(
            summary_line(&report),
            "4 hosts: 1 ok, 3 failed (connection=1, command=1, timeout=1) in 1.50s"
        );
    }

    #[test]
    fn render_lists_hosts_in_report_order() {
        let report = report(vec![
            ok("zeta"),
            ExecutionResult::from_error(&job("alpha"), HostError::connection("refused"), Duration::ZERO),
        ]);
        let rendered = render_report(&report);
        let zeta = rendered.find("=== zeta [ok] ===").expect("zeta section");
        let alpha = rendered
            .find("=== alpha [connection] ===")
            .expect("alpha section");
        assert!(zeta < alpha);
        assert!(rendered.contains("connection error: refused"));
        assert!(rendered.contains("zeta up"));
    }
}
