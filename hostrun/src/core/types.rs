//! Shared data types for a multi-host run.
//!
//! These types are plain data: no I/O, deterministic, and serializable so that
//! run reports can be persisted and rendered after the fact.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port used when an inventory entry does not set one.
pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// A target host as declared in the inventory. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostDescriptor {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name of the inventory credential used to log in.
    pub credential: String,
    /// Command run on this host instead of the run-wide command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_SSH_PORT {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// How a credential authenticates against the remote sshd.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// Whatever the local ssh client offers (agent, default keys).
    Agent,
    Password(String),
    /// Password read from the named environment variable at connect time.
    PasswordEnv(String),
    IdentityFile(PathBuf),
}

impl Auth {
    /// Human-readable description that never contains a secret.
    pub fn describe(&self) -> String {
        match self {
            Auth::Agent => "agent".to_string(),
            Auth::Password(_) => "password ***".to_string(),
            Auth::PasswordEnv(var) => format!("password from ${var}"),
            Auth::IdentityFile(path) => format!("key {}", path.display()),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Login material referenced by name from host entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub auth: Auth,
}

/// One entry of a host's command sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Shell command; `None` for a pause-only step.
    pub command: Option<String>,
    /// Budget for this step. Never exceeds what is left of the host timeout.
    pub timeout: Option<Duration>,
    /// Pause after the step completes.
    pub sleep: Duration,
}

impl Step {
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            timeout: None,
            sleep: Duration::ZERO,
        }
    }

    /// `uptime`, `sleep 5s`, or `reboot; sleep 30s`.
    pub fn label(&self) -> String {
        let pause = (!self.sleep.is_zero()).then(|| format!("sleep {}s", self.sleep.as_secs_f64()));
        match (&self.command, pause) {
            (Some(command), Some(pause)) => format!("{command}; {pause}"),
            (Some(command), None) => command.clone(),
            (None, Some(pause)) => pause,
            (None, None) => String::new(),
        }
    }
}

/// One unit of work: a host and the steps resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub host: HostDescriptor,
    /// Human-readable summary of `steps`.
    pub command: String,
    pub steps: Vec<Step>,
}

impl Job {
    /// A job running a single command.
    pub fn new(host: HostDescriptor, command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            host,
            steps: vec![Step::run(command.clone())],
            command,
        }
    }

    pub fn with_steps(host: HostDescriptor, steps: Vec<Step>) -> Self {
        let command = steps
            .iter()
            .map(Step::label)
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            host,
            command,
            steps,
        }
    }
}

/// Classification of a per-host failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The host could not be reached or the session broke.
    Connection,
    /// The host rejected the credential.
    Authentication,
    /// The command ran and exited non-zero.
    Command,
    /// The host did not answer within the per-host timeout.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Command => "command",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(label)
    }
}

/// A failure attributed to exactly one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct HostError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

/// What a transport hands back when the remote command ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteOutput {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Lifecycle of a host within one run.
///
/// `Pending -> Running -> {Succeeded, Failed, TimedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Pending,
    Running,
    Succeeded,
    Failed(ErrorKind),
    TimedOut,
}

impl HostState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, HostState::Pending | HostState::Running)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostState::Pending => f.write_str("pending"),
            HostState::Running => f.write_str("running"),
            HostState::Succeeded => f.write_str("ok"),
            HostState::Failed(kind) => write!(f, "{kind}"),
            HostState::TimedOut => f.write_str("timeout"),
        }
    }
}

/// Outcome of one command of a multi-step job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub command: String,
    pub exit_status: Option<i32>,
    #[serde(with = "lossy_text")]
    pub stdout: Vec<u8>,
    #[serde(with = "lossy_text")]
    pub stderr: Vec<u8>,
    pub error: Option<HostError>,
    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,
}

impl StepResult {
    pub fn from_output(command: &str, output: RemoteOutput, duration: Duration) -> Self {
        Self {
            command: command.to_string(),
            exit_status: Some(output.exit_status),
            error: exit_error(output.exit_status),
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        }
    }

    pub fn from_error(command: &str, error: HostError, duration: Duration) -> Self {
        Self {
            command: command.to_string(),
            exit_status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: Some(error),
            duration,
        }
    }
}

/// Non-zero exits are recorded as [`ErrorKind::Command`].
fn exit_error(exit_status: i32) -> Option<HostError> {
    (exit_status != 0).then(|| {
        HostError::new(
            ErrorKind::Command,
            format!("exited with status {exit_status}"),
        )
    })
}

/// Outcome of one host's command. Immutable once created by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub host: HostDescriptor,
    pub command: String,
    /// `None` when no exit status was obtained (timeout, connection failure).
    pub exit_status: Option<i32>,
    #[serde(with = "lossy_text")]
    pub stdout: Vec<u8>,
    #[serde(with = "lossy_text")]
    pub stderr: Vec<u8>,
    pub error: Option<HostError>,
    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,
    /// Per-step outcomes; only filled for jobs with more than one step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepResult>,
}

impl ExecutionResult {
    /// Build a result from a completed remote command. Non-zero exits are
    /// recorded as [`ErrorKind::Command`].
    pub fn from_output(job: &Job, output: RemoteOutput, duration: Duration) -> Self {
        Self {
            host: job.host.clone(),
            command: job.command.clone(),
            exit_status: Some(output.exit_status),
            error: exit_error(output.exit_status),
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
            steps: Vec::new(),
        }
    }

    pub fn from_error(job: &Job, error: HostError, duration: Duration) -> Self {
        Self {
            host: job.host.clone(),
            command: job.command.clone(),
            exit_status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: Some(error),
            duration,
            steps: Vec::new(),
        }
    }

    /// Fold the steps that ran into one result.
    ///
    /// The exit status and error are those of the last step, unless the job
    /// was `interrupted` (deadline or lost session), which then wins and
    /// leaves no exit status. Output is concatenated in step order.
    pub fn from_steps(
        job: &Job,
        steps: Vec<StepResult>,
        interrupted: Option<HostError>,
        duration: Duration,
    ) -> Self {
        let last = steps.last();
        let exit_status = match interrupted {
            Some(_) => None,
            None => last.and_then(|step| step.exit_status),
        };
        let error = interrupted.or_else(|| last.and_then(|step| step.error.clone()));
        let stdout = steps.iter().flat_map(|step| step.stdout.iter().copied()).collect();
        let stderr = steps.iter().flat_map(|step| step.stderr.iter().copied()).collect();
        Self {
            host: job.host.clone(),
            command: job.command.clone(),
            exit_status,
            stdout,
            stderr,
            error,
            duration,
            steps: if job.steps.len() > 1 { steps } else { Vec::new() },
        }
    }

    pub fn state(&self) -> HostState {
        match &self.error {
            None => HostState::Succeeded,
            Some(err) if err.kind == ErrorKind::Timeout => HostState::TimedOut,
            Some(err) => HostState::Failed(err.kind),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Output bytes are stored raw but serialized as (lossy) UTF-8 text.
mod lossy_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostDescriptor {
        HostDescriptor {
            address: "10.0.0.1".to_string(),
            port: 2222,
            credential: "lab".to_string(),
            command: None,
        }
    }

    fn job() -> Job {
        Job::new(host(), "uptime")
    }

    fn output(exit_status: i32, stdout: &str) -> RemoteOutput {
        RemoteOutput {
            exit_status,
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    #[test]
    fn non_zero_exit_is_a_command_failure() {
        let output = RemoteOutput {
            exit_status: 3,
            stdout: b"partial".to_vec(),
            stderr: b"boom".to_vec(),
        };
        let result = ExecutionResult::from_output(&job(), output, Duration::from_millis(5));
        assert_eq!(result.exit_status, Some(3));
        assert_eq!(result.state(), HostState::Failed(ErrorKind::Command));
        assert!(!result.succeeded());
    }

    #[test]
    fn timeout_maps_to_timed_out_state() {
        let result =
            ExecutionResult::from_error(&job(), HostError::timeout("slow"), Duration::ZERO);
        assert_eq!(result.exit_status, None);
        assert_eq!(result.state(), HostState::TimedOut);
        assert!(result.state().is_terminal());
    }

    #[test]
    fn host_display_omits_default_port() {
        let mut host = job().host;
        assert_eq!(host.to_string(), "10.0.0.1:2222");
        host.port = DEFAULT_SSH_PORT;
        assert_eq!(host.to_string(), "10.0.0.1");
    }

    #[test]
    fn auth_debug_never_leaks_password() {
        let auth = Auth::Password("hunter2".to_string());
        assert!(!format!("{auth:?}").contains("hunter2"));
        assert!(!auth.describe().contains("hunter2"));
    }

    #[test]
    fn result_json_uses_text_output_and_millis() {
        let output = RemoteOutput {
            exit_status: 0,
            stdout: b"up 3 days\n".to_vec(),
            stderr: Vec::new(),
        };
        let result = ExecutionResult::from_output(&job(), output, Duration::from_millis(1500));
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["stdout"], "up 3 days\n");
        assert_eq!(json["duration_ms"], 1500);
        assert!(json["error"].is_null());
    }

    #[test]
    fn job_summary_lists_steps_in_order() {
        let job = Job::with_steps(
            host(),
            vec![
                Step::run("reboot"),
                Step {
                    command: None,
                    timeout: None,
                    sleep: Duration::from_secs(30),
                },
                Step {
                    sleep: Duration::from_secs(2),
                    ..Step::run("uptime")
                },
            ],
        );
        assert_eq!(job.command, "reboot; sleep 30s; uptime; sleep 2s");
        assert_eq!(Job::new(host(), "w").steps, [Step::run("w")]);
    }

    #[test]
    fn folded_steps_keep_order_and_last_failure() {
        let job = Job::with_steps(host(), vec![Step::run("a"), Step::run("b"), Step::run("c")]);
        let steps = vec![
            StepResult::from_output("a", output(0, "one\n"), Duration::from_millis(1)),
            StepResult::from_output("b", output(4, "two\n"), Duration::from_millis(1)),
        ];
        let result = ExecutionResult::from_steps(&job, steps, None, Duration::from_millis(2));
        assert_eq!(result.stdout, b"one\ntwo\n");
        assert_eq!(result.exit_status, Some(4));
        assert_eq!(result.state(), HostState::Failed(ErrorKind::Command));
        let commands: Vec<_> = result.steps.iter().map(|step| step.command.as_str()).collect();
        assert_eq!(commands, ["a", "b"]);
    }

    #[test]
    fn interrupted_steps_report_timeout_without_status() {
        let job = Job::with_steps(host(), vec![Step::run("a"), Step::run("b")]);
        let steps = vec![StepResult::from_output(
            "a",
            output(0, "done\n"),
            Duration::from_millis(1),
        )];
        let result = ExecutionResult::from_steps(
            &job,
            steps,
            Some(HostError::timeout("no result within 1s")),
            Duration::from_secs(1),
        );
        assert_eq!(result.state(), HostState::TimedOut);
        assert_eq!(result.exit_status, None);
        assert_eq!(result.stdout, b"done\n");
        assert_eq!(result.steps.len(), 1);
    }

    #[test]
    fn single_step_results_omit_step_list() {
        let steps = vec![StepResult::from_output("uptime", output(0, "up\n"), Duration::ZERO)];
        let folded = ExecutionResult::from_steps(&job(), steps, None, Duration::ZERO);
        let direct = ExecutionResult::from_output(&job(), output(0, "up\n"), Duration::ZERO);
        assert_eq!(folded, direct);
        let json = serde_json::to_value(&folded).expect("serialize");
        assert!(json.get("steps").is_none());
    }
}
