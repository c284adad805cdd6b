//! YAML host inventory loading and validation.
//!
//! An inventory declares credentials by name, an ordered host list that
//! references them, and optionally a default command:
//!
//! ```yaml
//! command: uptime
//! credentials:
//!   lab:
//!     username: admin
//!     password_env: LAB_PASSWORD
//! hosts:
//!   - address: 192.168.0.10
//!     credential: lab
//!   - address: 192.168.0.11
//!     port: 2222
//!     credential: lab
//!     command: "uname -a"
//! ```
//!
//! Instead of a single `command`, the default may be an ordered `commands`
//! list. Each step has an optional `timeout` and a `sleep` afterwards, both in
//! seconds; a step may also be a bare pause:
//!
//! ```yaml
//! commands:
//!   - command: reboot
//!     timeout: 10
//!   - sleep: 30
//!   - command: uptime
//! ```
//!
//! Every failure here is fatal: it aborts the run before any host is contacted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::core::types::{Auth, Credential, HostDescriptor, Job, Step};

/// Why an inventory was rejected.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse inventory: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("inventory has no hosts")]
    NoHosts,
    #[error("command must be non-empty when set")]
    BlankDefaultCommand,
    #[error("set either command or commands, not both")]
    ConflictingDefaults,
    #[error("commands must contain at least one step that runs a command")]
    NoStepCommand,
    #[error("commands[{index}]: {reason}")]
    InvalidStep { index: usize, reason: &'static str },
    #[error("hosts[{index}]: address must be non-empty")]
    BlankAddress { index: usize },
    #[error("hosts[{index}]: address '{address}' must not start with '-'")]
    InvalidAddress { index: usize, address: String },
    #[error("hosts[{index}] ({address}): port must be > 0")]
    InvalidPort { index: usize, address: String },
    #[error("hosts[{index}] ({address}): command override must be non-empty")]
    BlankCommand { index: usize, address: String },
    #[error("hosts[{index}] ({address}): undefined credential '{credential}'")]
    UndefinedCredential {
        index: usize,
        address: String,
        credential: String,
    },
    #[error("hosts[{index}]: duplicate host {address} (already declared at hosts[{first}])")]
    DuplicateHost {
        index: usize,
        first: usize,
        address: String,
    },
    #[error("credential '{name}': username must be non-empty")]
    BlankUsername { name: String },
    #[error("credential '{name}': set at most one of password, password_env, identity_file")]
    ConflictingAuth { name: String },
    #[error("credential '{name}': {field} must be non-empty")]
    BlankAuthField { name: String, field: &'static str },
    #[error(
        "host {address} has no command (pass --command, set a top-level `command`, or a per-host override)"
    )]
    MissingCommand { address: String },
}

/// A validated inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    /// Default command for hosts without an override.
    pub command: Option<String>,
    /// Default step sequence; empty unless `commands` was given.
    pub steps: Vec<Step>,
    pub credentials: BTreeMap<String, Credential>,
    /// Hosts in declaration order; no two share an address and port.
    pub hosts: Vec<HostDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInventory {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    commands: Option<Vec<RawStep>>,
    #[serde(default)]
    credentials: BTreeMap<String, RawCredential>,
    #[serde(default)]
    hosts: Vec<HostDescriptor>,
}

/// Durations are whole seconds.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    sleep: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCredential {
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    password_env: Option<String>,
    #[serde(default)]
    identity_file: Option<PathBuf>,
}

/// Read and validate the inventory at `path`.
pub fn load_inventory(path: &Path) -> Result<Inventory, InventoryError> {
    let contents = fs::read_to_string(path).map_err(|source| InventoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let inventory = parse_inventory(&contents)?;
    debug!(
        path = %path.display(),
        hosts = inventory.hosts.len(),
        credentials = inventory.credentials.len(),
        "inventory loaded"
    );
    Ok(inventory)
}

/// Parse and validate inventory YAML.
pub fn parse_inventory(contents: &str) -> Result<Inventory, InventoryError> {
    let raw: RawInventory = serde_yaml::from_str(contents)?;

    if let Some(command) = &raw.command
        && command.trim().is_empty()
    {
        return Err(InventoryError::BlankDefaultCommand);
    }
    let steps = match raw.commands {
        Some(_) if raw.command.is_some() => return Err(InventoryError::ConflictingDefaults),
        Some(raw_steps) => validate_steps(raw_steps)?,
        None => Vec::new(),
    };

    let mut credentials = BTreeMap::new();
    for (name, credential) in raw.credentials {
        let credential = validate_credential(&name, credential)?;
        credentials.insert(name, credential);
    }

    if raw.hosts.is_empty() {
        return Err(InventoryError::NoHosts);
    }

    let mut hosts = Vec::with_capacity(raw.hosts.len());
    let mut seen: HashMap<(String, u16), usize> = HashMap::new();
    for (index, mut host) in raw.hosts.into_iter().enumerate() {
        host.address = host.address.trim().to_string();
        if host.address.is_empty() {
            return Err(InventoryError::BlankAddress { index });
        }
        if host.address.starts_with('-') {
            return Err(InventoryError::InvalidAddress {
                index,
                address: host.address,
            });
        }
        if host.port == 0 {
            return Err(InventoryError::InvalidPort {
                index,
                address: host.address,
            });
        }
        if let Some(command) = &host.command
            && command.trim().is_empty()
        {
            return Err(InventoryError::BlankCommand {
                index,
                address: host.address,
            });
        }
        if !credentials.contains_key(&host.credential) {
            return Err(InventoryError::UndefinedCredential {
                index,
                address: host.address,
                credential: host.credential,
            });
        }
        let key = (host.address.to_ascii_lowercase(), host.port);
        if let Some(&first) = seen.get(&key) {
            return Err(InventoryError::DuplicateHost {
                index,
                first,
                address: host.to_string(),
            });
        }
        seen.insert(key, index);
        hosts.push(host);
    }

    Ok(Inventory {
        command: raw.command,
        steps,
        credentials,
        hosts,
    })
}

fn validate_steps(raw: Vec<RawStep>) -> Result<Vec<Step>, InventoryError> {
    let mut steps = Vec::with_capacity(raw.len());
    for (index, step) in raw.into_iter().enumerate() {
        let invalid = |reason| InventoryError::InvalidStep { index, reason };
        if step.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(invalid("command must be non-empty when set"));
        }
        match (&step.command, step.timeout) {
            (_, Some(0)) => return Err(invalid("timeout must be > 0")),
            (None, Some(_)) => return Err(invalid("timeout needs a command")),
            (None, None) if step.sleep.unwrap_or(0) == 0 => {
                return Err(invalid("needs a command or a sleep"));
            }
            _ => {}
        }
        steps.push(Step {
            command: step.command,
            timeout: step.timeout.map(Duration::from_secs),
            sleep: Duration::from_secs(step.sleep.unwrap_or(0)),
        });
    }
    if !steps.iter().any(|step| step.command.is_some()) {
        return Err(InventoryError::NoStepCommand);
    }
    Ok(steps)
}

fn validate_credential(name: &str, raw: RawCredential) -> Result<Credential, InventoryError> {
    if raw.username.trim().is_empty() {
        return Err(InventoryError::BlankUsername {
            name: name.to_string(),
        });
    }
    let auth = match (raw.password, raw.password_env, raw.identity_file) {
        (None, None, None) => Auth::Agent,
        (Some(password), None, None) => Auth::Password(password),
        (None, Some(var), None) => {
            if var.trim().is_empty() {
                return Err(InventoryError::BlankAuthField {
                    name: name.to_string(),
                    field: "password_env",
                });
            }
            Auth::PasswordEnv(var)
        }
        (None, None, Some(path)) => {
            if path.as_os_str().is_empty() {
                return Err(InventoryError::BlankAuthField {
                    name: name.to_string(),
                    field: "identity_file",
                });
            }
            Auth::IdentityFile(path)
        }
        _ => {
            return Err(InventoryError::ConflictingAuth {
                name: name.to_string(),
            });
        }
    };
    Ok(Credential {
        username: raw.username,
        auth,
    })
}

impl Inventory {
    /// Pick the work for every host: its override, else `cli_command`, else
    /// the inventory's `command`, else its `commands` list. Fails if any host
    /// is left without one.
    pub fn resolve_commands(&self, cli_command: Option<&str>) -> Result<Vec<Job>, InventoryError> {
        let fallback = cli_command
            .filter(|command| !command.trim().is_empty())
            .or(self.command.as_deref());
        self.hosts
            .iter()
            .map(|host| match host.command.as_deref().or(fallback) {
                Some(command) => Ok(Job::new(host.clone(), command)),
                None if !self.steps.is_empty() => {
                    Ok(Job::with_steps(host.clone(), self.steps.clone()))
                }
                None => Err(InventoryError::MissingCommand {
                    address: host.to_string(),
                }),
            })
            .collect()
    }

    pub fn credential_for(&self, host: &HostDescriptor) -> Option<&Credential> {
        self.credentials.get(&host.credential)
    }
}

/// Starter inventory written by `hostrun init`.
pub const SAMPLE_INVENTORY: &str = r#"# hostrun inventory
#
# `command` is the default for every host; a host may override it with its own
# `command`, and `hostrun run --command` replaces the default for one run.
# Use `commands` instead for an ordered sequence (timeout and sleep in seconds):
#
# commands:
#   - command: ls
#     timeout: 10
#   - sleep: 5
#   - command: uptime
command: uptime

credentials:
  lab:
    username: admin
    # Exactly one of the following (or none to use the ssh agent / default keys):
    # password: admin
    # password_env: LAB_PASSWORD
    # identity_file: ~/.ssh/id_ed25519
    password_env: LAB_PASSWORD

hosts:
  - address: 192.168.0.1
    port: 22
    credential: lab
  - address: 192.168.0.2
    credential: lab
    command: "uname -a"
"#;
