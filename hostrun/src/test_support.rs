//! Test-only helpers: host builders and a scripted transport.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::core::types::{HostDescriptor, HostError, Job, RemoteOutput};
use crate::io::transport::Transport;

/// Host on the default port using credential `lab`.
pub fn host(address: &str) -> HostDescriptor {
    HostDescriptor {
        address: address.to_string(),
        port: 22,
        credential: "lab".to_string(),
        command: None,
    }
}

pub fn job(address: &str, command: &str) -> Job {
    Job::new(host(address), command)
}

pub fn jobs(addresses: &[&str], command: &str) -> Vec<Job> {
    addresses.iter().map(|address| job(address, command)).collect()
}

/// What [`ScriptedTransport`] does for a host.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Exit 0 with `stdout` after sleeping for `delay`. A delay past the
    /// call's timeout ends in a timeout error instead.
    Succeed { stdout: String, delay: Duration },
    /// Complete immediately with a non-zero exit status.
    Exit(i32),
    Fail(HostError),
    Panic,
}

impl Behavior {
    pub fn ok() -> Self {
        Self::delayed_ok(Duration::ZERO)
    }

    pub fn output(stdout: &str) -> Self {
        Self::Succeed {
            stdout: stdout.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed_ok(delay: Duration) -> Self {
        Self::Succeed {
            stdout: "ok\n".to_string(),
            delay,
        }
    }
}

/// Transport returning predetermined outcomes per command or address.
///
/// Tracks how many calls were in flight at once.
pub struct ScriptedTransport {
    by_command: HashMap<String, Behavior>,
    behaviors: HashMap<String, Behavior>,
    fallback: Behavior,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Every host succeeds immediately unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            by_command: HashMap::new(),
            behaviors: HashMap::new(),
            fallback: Behavior::ok(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, address: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(address.to_string(), behavior);
        self
    }

    /// Behavior for `command` on any host; wins over per-address scripts.
    pub fn with_command(mut self, command: &str, behavior: Behavior) -> Self {
        self.by_command.insert(command.to_string(), behavior);
        self
    }

    /// Behavior for hosts without their own script.
    pub fn with_fallback(mut self, behavior: Behavior) -> Self {
        self.fallback = behavior;
        self
    }

    /// Highest number of concurrent `execute` calls observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Addresses in the order their calls started.
    pub fn calls(&self) -> Vec<String> {
        self.recorded().into_iter().map(|(address, _)| address).collect()
    }

    /// Commands in the order their calls started.
    pub fn commands(&self) -> Vec<String> {
        self.recorded().into_iter().map(|(_, command)| command).collect()
    }

    fn recorded(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, HostError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((host.address.clone(), command.to_string()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let behavior = self
            .by_command
            .get(command)
            .or_else(|| self.behaviors.get(&host.address))
            .unwrap_or(&self.fallback);
        match behavior {
            Behavior::Succeed { delay, .. } if *delay > timeout => {
                thread::sleep(timeout);
                Err(HostError::timeout(format!(
                    "killed after {}s",
                    timeout.as_secs_f64()
                )))
            }
            Behavior::Succeed { stdout, delay } => {
                thread::sleep(*delay);
                Ok(RemoteOutput {
                    exit_status: 0,
                    stdout: stdout.clone().into_bytes(),
                    stderr: Vec::new(),
                })
            }
            Behavior::Exit(code) => Ok(RemoteOutput {
                exit_status: *code,
                stdout: Vec::new(),
                stderr: format!("exit {code}\n").into_bytes(),
            }),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Panic => panic!("scripted panic for {}", host.address),
        }
    }
}
