//! Runs the local ssh client for one remote session, bounded in time and output.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// What one ssh client process left behind.
#[derive(Debug)]
pub struct CapturedOutput {
    /// `None` when ssh died from a signal, including the kill at the deadline.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    /// Stdout with a trailing `[stdout truncated N bytes]` marker when bytes were dropped.
    pub fn stdout_with_notice(&self) -> Vec<u8> {
        with_notice(&self.stdout, "stdout", self.stdout_truncated)
    }

    pub fn stderr_with_notice(&self) -> Vec<u8> {
        with_notice(&self.stderr, "stderr", self.stderr_truncated)
    }
}

fn with_notice(bytes: &[u8], label: &str, truncated: usize) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if truncated > 0 {
        out.extend_from_slice(format!("\n[{label} truncated {truncated} bytes]\n").as_bytes());
    }
    out
}

/// Run the ssh client `cmd` until it exits or the host's budget `timeout`
/// runs out, whichever comes first.
///
/// Each stream keeps at most `output_limit_bytes`; the rest is counted and
/// discarded while the pipe keeps draining, so a chatty remote command cannot
/// stall the client.
#[instrument(
    skip_all,
    fields(
        program = %cmd.get_program().to_string_lossy(),
        budget_ms = timeout.as_millis() as u64,
        output_limit_bytes,
    )
)]
pub fn run_with_deadline(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(args = cmd.get_args().len(), "starting remote session");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("wait for {program}"))?
    {
        Some(status) => status,
        None => {
            warn!(
                %program,
                budget_secs = timeout.as_secs_f64(),
                "remote session still running at the host deadline, killing ssh client"
            );
            timed_out = true;
            child.kill().with_context(|| format!("kill {program}"))?;
            child
                .wait()
                .with_context(|| format!("reap {program} after kill"))?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "remote output exceeded the limit");
    }

    debug!(exit_code = ?status.code(), timed_out, "remote session ended");
    Ok(CapturedOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
