//! Canonical locations under the hostrun home directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::core::types::HostDescriptor;

/// All canonical paths within a hostrun home (default `~/.hostrun`).
#[derive(Debug, Clone)]
pub struct HostrunPaths {
    pub home: PathBuf,
    pub settings_path: PathBuf,
    pub inventories_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl HostrunPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            settings_path: home.join("settings.toml"),
            inventories_dir: home.join("inventories"),
            logs_dir: home.join("logs"),
            home,
        }
    }

    /// `~/.hostrun`.
    pub fn default_home() -> Result<PathBuf> {
        let home = dirs::home_dir().context("cannot determine the user's home directory")?;
        Ok(home.join(".hostrun"))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.home, &self.inventories_dir, &self.logs_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn inventory_path(&self, name: &str) -> PathBuf {
        self.inventories_dir.join(format!("{name}.yaml"))
    }

    /// `<logs>/<inventory>_<address>[@<port>].log`, with characters unsafe in
    /// file names replaced. The port is only spelled out when it is not 22.
    ///
    /// `sanitize` never emits `@`, so distinct hosts never share a file.
    pub fn host_log_path(&self, inventory: &str, host: &HostDescriptor) -> PathBuf {
        let mut stem = sanitize(&format!("{inventory}_{}", host.address));
        if host.port != crate::core::types::DEFAULT_SSH_PORT {
            stem.push('@');
            stem.push_str(&host.port.to_string());
        }
        self.logs_dir.join(format!("{stem}.log"))
    }

    pub fn report_path(&self, inventory: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.report.json", sanitize(inventory)))
    }

    /// Resolve a CLI inventory argument.
    ///
    /// An existing file path is used as-is; anything else is treated as a name
    /// under `inventories/`. Returns the path and the inventory name (file stem)
    /// used to key logs and reports.
    pub fn resolve_inventory(&self, arg: &str) -> Result<(PathBuf, String)> {
        let direct = Path::new(arg);
        let path = if direct.is_file() {
            direct.to_path_buf()
        } else {
            let named = self.inventory_path(arg);
            if !named.is_file() {
                bail!(
                    "inventory '{}' not found (looked for {} and {})",
                    arg,
                    direct.display(),
                    named.display()
                );
            }
            named
        };
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .with_context(|| format!("inventory path {} has no file name", path.display()))?;
        Ok((path, name))
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '%' | '[' | ']' | '@' => '_',
            other => other,
        })
        .collect()
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(address: &str, port: u16) -> HostDescriptor {
        HostDescriptor {
            address: address.to_string(),
            port,
            credential: "lab".to_string(),
            command: None,
        }
    }

    #[test]
    fn paths_are_stable() {
        let paths = HostrunPaths::new("/home/u/.hostrun");
        assert!(paths.settings_path.ends_with(".hostrun/settings.toml"));
        assert!(paths.inventory_path("lab").ends_with("inventories/lab.yaml"));
        assert!(paths.report_path("lab").ends_with("logs/lab.report.json"));
        assert!(
            paths
                .host_log_path("lab", &host("10.0.0.1", 22))
                .ends_with("logs/lab_10.0.0.1.log")
        );
        assert!(
            paths
                .host_log_path("lab", &host("fe80::1", 2222))
                .ends_with("logs/lab_fe80__1@2222.log")
        );
    }

    #[test]
    fn port_suffix_cannot_collide_with_an_address() {
        let paths = HostrunPaths::new("/home/u/.hostrun");
        let on_port = paths.host_log_path("lab", &host("a", 2222));
        let lookalike = paths.host_log_path("lab", &host("a_2222", 22));
        let at_sign = paths.host_log_path("lab", &host("a@2222", 22));
        assert!(on_port.ends_with("logs/lab_a@2222.log"));
        assert!(lookalike.ends_with("logs/lab_a_2222.log"));
        assert_ne!(on_port, lookalike);
        assert_ne!(on_port, at_sign);
    }

    #[test]
    fn resolve_prefers_existing_file_then_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HostrunPaths::new(temp.path().join("home"));
        paths.ensure_dirs().expect("dirs");

        let named = paths.inventory_path("lab");
        fs::write(&named, "hosts: []\n").expect("write");
        let (path, name) = paths.resolve_inventory("lab").expect("resolve name");
        assert_eq!(path, named);
        assert_eq!(name, "lab");

        let direct = temp.path().join("edge.yml");
        fs::write(&direct, "hosts: []\n").expect("write");
        let (path, name) = paths
            .resolve_inventory(direct.to_str().expect("utf8"))
            .expect("resolve path");
        assert_eq!(path, direct);
        assert_eq!(name, "edge");
    }

    #[test]
    fn resolve_missing_inventory_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HostrunPaths::new(temp.path());
        let err = paths.resolve_inventory("nope").unwrap_err();
        assert!(err.to_string().contains("inventory 'nope' not found"));
    }

    #[test]
    fn expand_tilde_leaves_plain_paths() {
        assert_eq!(
            expand_tilde(Path::new("/etc/key")),
            PathBuf::from("/etc/key")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.ssh/id")), home.join(".ssh/id"));
        }
    }
}
