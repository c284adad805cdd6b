//! Progress bar and per-host completion lines.

use std::io::{self, Stderr, Write};
use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::core::types::{ExecutionResult, HostState, Job};
use crate::executor::RunObserver;

const TEMPLATE: &str = "{spinner:.blue} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// Tracks each host's [`HostState`], advances a bar of length N and prints
/// `[k/N] host status duration` as hosts finish.
///
/// When the bar has no terminal to draw on, the lines go to `fallback`.
pub struct Progress<W> {
    bar: ProgressBar,
    states: Mutex<Vec<HostState>>,
    fallback: Mutex<W>,
}

impl Progress<Stderr> {
    /// Bar on stderr; hidden when stderr is not a terminal.
    pub fn stderr(hosts: usize) -> Self {
        Self::new(hosts, ProgressBar::new(hosts as u64), io::stderr())
    }
}

impl<W: Write + Send> Progress<W> {
    pub fn new(hosts: usize, bar: ProgressBar, fallback: W) -> Self {
        bar.set_length(hosts as u64);
        bar.set_style(
            ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self {
            bar,
            states: Mutex::new(vec![HostState::Pending; hosts]),
            fallback: Mutex::new(fallback),
        }
    }

    /// Remove the bar once every host is done; printed lines stay.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    #[cfg(test)]
    pub(crate) fn states(&self) -> Vec<HostState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn into_fallback(self) -> W {
        self.fallback.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn print(&self, line: &str) {
        if !self.bar.is_hidden() {
            self.bar.println(line);
            return;
        }
        let mut out = self.fallback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(out, "{line}") {
            warn!(error = %err, "failed to write progress");
        }
    }
}

impl<W: Write + Send> RunObserver for Progress<W> {
    fn host_started(&self, index: usize, job: &Job) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(index) {
            *state = HostState::Running;
        }
        self.bar.set_message(job.host.to_string());
    }

    fn host_finished(&self, index: usize, result: &ExecutionResult) {
        let state = result.state();
        let (finished, total) = {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = states.get_mut(index) {
                *slot = state;
            }
            let finished = states.iter().filter(|s| s.is_terminal()).count();
            (finished, states.len())
        };
        self.print(&format!(
            "[{finished}/{total}] {} {state} {:.2}s",
            result.host,
            result.duration.as_secs_f64()
        ));
        self.bar.inc(1);
    }
}
