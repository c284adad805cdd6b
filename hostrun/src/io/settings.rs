//! User settings stored in `<home>/settings.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Run defaults (TOML).
///
/// Meant to be edited by humans. Missing fields fall back to defaults; CLI
/// flags override individual values for a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of hosts contacted concurrently.
    pub workers: usize,

    /// Wall-clock budget per host (connect + command), in seconds.
    pub timeout_secs: u64,

    /// Extra attempts after a connection failure. `0` disables retries.
    pub retries: u32,

    pub retry_delay_secs: u64,

    /// Keep at most this many bytes of each host's stdout and stderr.
    pub output_limit_bytes: usize,

    pub ssh: SshSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshSettings {
    /// ssh client executable.
    pub program: String,

    /// Wrapper used for password credentials (`sshpass -v -e`).
    pub sshpass_program: String,

    pub connect_timeout_secs: u64,

    pub strict_host_key_checking: HostKeyPolicy,
}

/// Value passed as `-o StrictHostKeyChecking=`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    #[default]
    AcceptNew,
    Yes,
    No,
}

impl HostKeyPolicy {
    pub fn as_ssh_value(self) -> &'static str {
        match self {
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Yes => "yes",
            HostKeyPolicy::No => "no",
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
            connect_timeout_secs: 10,
            strict_host_key_checking: HostKeyPolicy::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 10,
            timeout_secs: 120,
            retries: 0,
            retry_delay_secs: 5,
            output_limit_bytes: 1024 * 1024,
            ssh: SshSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be > 0");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be > 0");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be > 0");
        }
        if self.ssh.connect_timeout_secs == 0 {
            bail!("ssh.connect_timeout_secs must be > 0");
        }
        if self.ssh.program.trim().is_empty() {
            bail!("ssh.program must be non-empty");
        }
        if self.ssh.sshpass_program.trim().is_empty() {
            bail!("ssh.sshpass_program must be non-empty");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings {}", path.display()))?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        let settings = Settings {
            workers: 3,
            retries: 2,
            ..Settings::default()
        };
        write_settings(&path, &settings).expect("write");
        assert_eq!(load_settings(&path).expect("load"), settings);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(
            &path,
            "workers = 4\n\n[ssh]\nstrict_host_key_checking = \"no\"\n",
        )
        .expect("write");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.timeout_secs, Settings::default().timeout_secs);
        assert_eq!(settings.ssh.strict_host_key_checking, HostKeyPolicy::No);
        assert_eq!(settings.ssh.program, "ssh");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(&path, "workers = 0\n").expect("write");
        let err = load_settings(&path).unwrap_err();
        assert!(format!("{err:#}").contains("workers must be > 0"));
    }
}
