//! [`Transport`] backed by the system `ssh` client.
//!
//! Each call spawns one `ssh` process (wrapped in `sshpass -v -e` for password
//! credentials), so one remote session is opened and closed per host.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::types::{Auth, Credential, HostDescriptor, HostError, RemoteOutput};
use crate::io::paths::expand_tilde;
use crate::io::process::run_with_deadline;
use crate::io::settings::{HostKeyPolicy, Settings};
use crate::io::transport::Transport;

/// ssh exits 255 when the failure is its own rather than the remote command's.
const SSH_FAILURE: i32 = 255;
/// `sshpass`: invalid or incorrect password.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// `sshpass`: host public key is unknown.
const SSHPASS_UNKNOWN_HOST_KEY: i32 = 6;
/// Prefix of the diagnostics `sshpass -v` writes to stderr.
const SSHPASS_PREFIX: &str = "SSHPASS";

/// sshpass's own messages for its exit statuses 5 and 6. Without one of
/// these, 5 or 6 came from the remote command.
const BAD_PASSWORD_MARKERS: &[&str] = &["Wrong password", "Invalid/incorrect password"];
const UNKNOWN_HOST_KEY_MARKERS: &[&str] =
    &["host authentication prompt", "Host public key is unknown"];

const AUTH_MARKERS: &[&str] = &[
    "Permission denied",
    "Authentication failed",
    "Too many authentication failures",
];

/// Options for spawning the ssh client.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub program: String,
    pub sshpass_program: String,
    pub connect_timeout: Duration,
    pub host_key_policy: HostKeyPolicy,
    pub output_limit_bytes: usize,
}

impl SshOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            program: settings.ssh.program.clone(),
            sshpass_program: settings.ssh.sshpass_program.clone(),
            connect_timeout: Duration::from_secs(settings.ssh.connect_timeout_secs),
            host_key_policy: settings.ssh.strict_host_key_checking,
            output_limit_bytes: settings.output_limit_bytes,
        }
    }
}

pub struct SshTransport {
    credentials: BTreeMap<String, Credential>,
    options: SshOptions,
}

/// A fully prepared ssh invocation.
#[derive(Debug)]
pub struct SshInvocation {
    pub command: Command,
    pub via_sshpass: bool,
}

impl SshTransport {
    pub fn new(credentials: BTreeMap<String, Credential>, options: SshOptions) -> Self {
        Self {
            credentials,
            options,
        }
    }

    /// Build the local process that runs `remote_command` on `host`.
    ///
    /// Password lookups happen here, so a missing `password_env` variable
    /// fails only this host.
    pub fn invocation(
        &self,
        host: &HostDescriptor,
        remote_command: &str,
    ) -> Result<SshInvocation, HostError> {
        let credential = self.credentials.get(&host.credential).ok_or_else(|| {
            HostError::authentication(format!("unknown credential '{}'", host.credential))
        })?;

        let password = match &credential.auth {
            Auth::Password(password) => Some(password.clone()),
            Auth::PasswordEnv(var) => Some(std::env::var(var).map_err(|_| {
                HostError::authentication(format!("environment variable {var} is not set"))
            })?),
            Auth::Agent | Auth::IdentityFile(_) => None,
        };

        let mut command = match &password {
            Some(password) => {
                let mut command = Command::new(&self.options.sshpass_program);
                command
                    .env("SSHPASS", password)
                    .arg("-v")
                    .arg("-e")
                    .arg(&self.options.program);
                command
            }
            None => Command::new(&self.options.program),
        };

        let batch_mode = if password.is_some() { "no" } else { "yes" };
        command
            .arg("-o")
            .arg(format!("BatchMode={batch_mode}"))
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.options.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg(format!(
                "StrictHostKeyChecking={}",
                self.options.host_key_policy.as_ssh_value()
            ))
            .arg("-p")
            .arg(host.port.to_string());
        if password.is_some() {
            command
                .arg("-o")
                .arg("PreferredAuthentications=password,keyboard-interactive")
                .arg("-o")
                .arg("NumberOfPasswordPrompts=1");
        }
        if let Auth::IdentityFile(path) = &credential.auth {
            command
                .arg("-o")
                .arg("IdentitiesOnly=yes")
                .arg("-i")
                .arg(expand_tilde(path));
        }
        command
            .arg("-l")
            .arg(&credential.username)
            .arg("--")
            .arg(&host.address)
            .arg(remote_command);

        Ok(SshInvocation {
            command,
            via_sshpass: password.is_some(),
        })
    }
}

impl Transport for SshTransport {
    #[instrument(skip_all, fields(host = %host))]
    fn execute(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, HostError> {
        let invocation = self.invocation(host, command)?;
        let mut output = run_with_deadline(invocation.command, timeout, self.options.output_limit_bytes)
            .map_err(|err| {
                warn!(error = %format!("{err:#}"), "ssh could not be run");
                HostError::connection(format!("{err:#}"))
            })?;

        let exit_status = classify_exit(
            output.exit_code,
            output.timed_out,
            &output.stderr,
            invocation.via_sshpass,
            timeout,
        )
        .inspect_err(|err| debug!(kind = %err.kind, message = %err.message, "ssh failed"))?;
        if invocation.via_sshpass {
            output.stderr = without_sshpass_lines(&output.stderr);
        }

        Ok(RemoteOutput {
            exit_status,
            stdout: output.stdout_with_notice(),
            stderr: output.stderr_with_notice(),
        })
    }
}

/// Map an ssh process result to the remote command's exit status, or to a
/// transport failure when the command never ran to completion.
pub fn classify_exit(
    exit_code: Option<i32>,
    timed_out: bool,
    stderr: &[u8],
    via_sshpass: bool,
    timeout: Duration,
) -> Result<i32, HostError> {
    if timed_out {
        return Err(HostError::timeout(format!(
            "no result within {}s",
            timeout.as_secs_f64()
        )));
    }
    let Some(code) = exit_code else {
        return Err(HostError::connection("ssh was terminated by a signal"));
    };
    let stderr = String::from_utf8_lossy(stderr);
    if via_sshpass {
        match code {
            SSHPASS_BAD_PASSWORD if sshpass_reported(&stderr, BAD_PASSWORD_MARKERS) => {
                return Err(HostError::authentication("password rejected"));
            }
            SSHPASS_UNKNOWN_HOST_KEY if sshpass_reported(&stderr, UNKNOWN_HOST_KEY_MARKERS) => {
                return Err(HostError::connection("host public key is unknown"));
            }
            _ => {}
        }
    }
    if code != SSH_FAILURE {
        return Ok(code);
    }
    let message = last_line(&stderr).unwrap_or("ssh exited with status 255");
    if AUTH_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        Err(HostError::authentication(message))
    } else {
        Err(HostError::connection(message))
    }
}

fn sshpass_reported(stderr: &str, markers: &[&str]) -> bool {
    stderr
        .lines()
        .filter(|line| line.trim_start().starts_with(SSHPASS_PREFIX))
        .any(|line| markers.iter().any(|marker| line.contains(marker)))
}

/// Drop `sshpass -v` chatter so stderr holds only what ssh and the remote
/// command wrote.
fn without_sshpass_lines(stderr: &[u8]) -> Vec<u8> {
    stderr
        .split_inclusive(|&byte| byte == b'\n')
        .filter(|line| !line.starts_with(SSHPASS_PREFIX.as_bytes()))
        .flatten()
        .copied()
        .collect()
}

fn last_line(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
}
