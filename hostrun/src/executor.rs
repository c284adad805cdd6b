//! Bounded worker pool that runs one job per inventory host.
//!
//! `min(workers, jobs)` scoped threads pull job indices from a shared
//! [`WorkQueue`] and write each outcome into that job's own slot, so the report
//! comes out in inventory order no matter which host finishes first. A host
//! can only ever affect its own slot: transport errors, non-zero exit
//! statuses, deadline overruns and panics inside the transport all end up as
//! that host's [`ExecutionResult`].
//!
//! A job's steps run in order on one session thread. Each step gets at most
//! its own timeout and never more than what is left of the host timeout; the
//! sequence stops at the first failing step.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::core::queue::WorkQueue;
use crate::core::report::RunReport;
use crate::core::types::{ExecutionResult, HostDescriptor, HostError, Job, Step, StepResult};
use crate::io::transport::Transport;

/// Receives host lifecycle events while a run is in progress.
///
/// Called from worker threads; events of different hosts interleave.
pub trait RunObserver: Sync {
    fn host_started(&self, _index: usize, _job: &Job) {}

    fn host_finished(&self, _index: usize, _result: &ExecutionResult) {}
}

impl RunObserver for () {}

impl<T: RunObserver + ?Sized> RunObserver for &T {
    fn host_started(&self, index: usize, job: &Job) {
        (**self).host_started(index, job);
    }

    fn host_finished(&self, index: usize, result: &ExecutionResult) {
        (**self).host_finished(index, result);
    }
}

impl<A: RunObserver, B: RunObserver> RunObserver for (A, B) {
    fn host_started(&self, index: usize, job: &Job) {
        self.0.host_started(index, job);
        self.1.host_started(index, job);
    }

    fn host_finished(&self, index: usize, result: &ExecutionResult) {
        self.0.host_finished(index, result);
        self.1.host_finished(index, result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Upper bound on hosts contacted at the same time.
    pub workers: usize,
    /// Per-host budget covering connect and every step.
    pub timeout: Duration,
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be > 0");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be > 0");
        }
        Ok(())
    }
}

pub struct Executor {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { transport, config })
    }

    /// Run every job and return one result per job, in job order.
    #[instrument(skip_all, fields(hosts = jobs.len(), workers = self.config.workers))]
    pub fn run(&self, jobs: &[Job], observer: &dyn RunObserver) -> RunReport {
        let started_at = Utc::now();
        let queue = WorkQueue::new(jobs.len());
        let slots: Vec<OnceLock<ExecutionResult>> = jobs.iter().map(|_| OnceLock::new()).collect();
        let pool_size = self.config.workers.min(jobs.len());
        info!(pool_size, "dispatching hosts");

        thread::scope(|scope| {
            for id in 0..pool_size {
                let spawned = thread::Builder::new()
                    .name(format!("hostrun-worker-{id}"))
                    .spawn_scoped(scope, || self.drain(&queue, jobs, &slots, observer));
                if let Err(err) = spawned {
                    warn!(worker = id, error = %err, "failed to start worker");
                }
            }
        });

        let results = slots
            .into_iter()
            .zip(jobs)
            .map(|(slot, job)| {
                slot.into_inner().unwrap_or_else(|| {
                    error!(host = %job.host, "no worker picked up host");
                    ExecutionResult::from_error(
                        job,
                        HostError::connection("host was not dispatched"),
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        RunReport {
            started_at,
            finished_at: Utc::now(),
            results,
        }
    }

    fn drain(
        &self,
        queue: &WorkQueue,
        jobs: &[Job],
        slots: &[OnceLock<ExecutionResult>],
        observer: &dyn RunObserver,
    ) {
        while let Some(index) = queue.pop() {
            let job = &jobs[index];
            observer.host_started(index, job);
            let result = self.execute(job);
            observer.host_finished(index, &result);
            if slots[index].set(result).is_err() {
                error!(index, host = %job.host, "host already has a result");
            }
        }
    }

    /// Run one job's steps on a detached thread and wait at most `timeout`
    /// for them.
    ///
    /// On expiry the thread is abandoned; the ssh transport kills its own
    /// child at the same deadline, so abandoned threads do not linger.
    /// Steps that completed before the deadline stay in the result.
    #[instrument(skip_all, fields(host = %job.host, steps = job.steps.len()))]
    fn execute(&self, job: &Job) -> ExecutionResult {
        let timeout = self.config.timeout;
        let started = Instant::now();
        let deadline = started + timeout;
        let (tx, rx) = mpsc::channel();
        let transport = Arc::clone(&self.transport);
        let host = job.host.clone();
        let steps = job.steps.clone();

        let spawned = thread::Builder::new()
            .name(format!("hostrun-{}", job.host))
            .spawn(move || {
                let interrupted =
                    run_steps(transport.as_ref(), &host, &steps, (deadline, timeout), |step| {
                        tx.send(SessionEvent::Step(step)).is_ok()
                    });
                if tx.send(SessionEvent::Finished(interrupted)).is_err() {
                    debug!(host = %host, "result arrived after the deadline");
                }
            });
        if let Err(err) = spawned {
            return ExecutionResult::from_error(
                job,
                HostError::connection(format!("failed to start session thread: {err}")),
                started.elapsed(),
            );
        }

        let mut completed = Vec::with_capacity(job.steps.len());
        let interrupted = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(SessionEvent::Step(step)) => completed.push(step),
                Ok(SessionEvent::Finished(interrupted)) => break interrupted,
                Err(RecvTimeoutError::Timeout) => break Some(deadline_error(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    break Some(HostError::connection("session ended without a result"));
                }
            }
        };
        let result = ExecutionResult::from_steps(job, completed, interrupted, started.elapsed());
        match &result.error {
            None => debug!(elapsed_ms = result.duration.as_millis() as u64, "host succeeded"),
            Some(err) => info!(error = %err, "host failed"),
        }
        result
    }
}

/// Messages from a session thread to the worker waiting on it.
enum SessionEvent {
    Step(StepResult),
    /// All steps ran, one failed, or the deadline passed between steps.
    Finished(Option<HostError>),
}

fn deadline_error(timeout: Duration) -> HostError {
    HostError::timeout(format!("no result within {}s", timeout.as_secs_f64()))
}

/// Run `steps` in order until one fails, handing each outcome to `emit`.
///
/// Returns the timeout error when the host deadline passes before the
/// sequence is done. Stops early, without error, once `emit` reports nobody is
/// listening.
fn run_steps(
    transport: &dyn Transport,
    host: &HostDescriptor,
    steps: &[Step],
    (deadline, timeout): (Instant, Duration),
    mut emit: impl FnMut(StepResult) -> bool,
) -> Option<HostError> {
    for (index, step) in steps.iter().enumerate() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Some(deadline_error(timeout));
        }
        if let Some(command) = &step.command {
            let budget = step.timeout.map_or(remaining, |limit| limit.min(remaining));
            debug!(host = %host, step = index, budget_ms = budget.as_millis() as u64, "running step");
            let started = Instant::now();
            let result = match transport.execute(host, command, budget) {
                Ok(output) => StepResult::from_output(command, output, started.elapsed()),
                Err(err) => StepResult::from_error(command, err, started.elapsed()),
            };
            let failed = result.error.is_some();
            if !emit(result) || failed {
                return None;
            }
        }
        let pause = step.sleep.min(deadline.saturating_duration_since(Instant::now()));
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
    None
}
