//! Upgrade configuration.
//!
//! Loaded from `/etc/distro-upgrader.toml` when present. Every field has a
//! default matching a stock Plesk on CentOS 7 host, so an empty file (or no
//! file at all) is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Config file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/distro-upgrader.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpgradeConfig {
    pub systemd: SystemdConfig,
    pub services: ServicesConfig,
    pub conversion: ConversionConfig,
    pub paths: PathsConfig,
    pub checks: ChecksConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemdConfig {
    pub systemctl: PathBuf,
    /// Where packaged units live; probed to decide whether a service exists.
    pub system_unit_dir: PathBuf,
    /// Where the resume unit is written.
    pub admin_unit_dir: PathBuf,
    pub resume_unit: String,
}

impl Default for SystemdConfig {
    fn default() -> Self {
        Self {
            systemctl: PathBuf::from("/usr/bin/systemctl"),
            system_unit_dir: PathBuf::from("/usr/lib/systemd/system"),
            admin_unit_dir: PathBuf::from("/etc/systemd/system"),
            resume_unit: "distro-upgrader-resume.service".to_string(),
        }
    }
}

impl SystemdConfig {
    pub fn resume_unit_path(&self) -> PathBuf {
        self.admin_unit_dir.join(&self.resume_unit)
    }
}

/// A pair of mutually exclusive units; the primary wins when installed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Alternative {
    pub primary: String,
    pub fallback: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServicesConfig {
    /// Units stopped and disabled for the duration of the conversion.
    pub stop_candidates: Vec<String>,
    /// Units needed for the panel to be reachable after the final boot.
    pub basic_candidates: Vec<String>,
    /// Postfix stays installed when qmail replaces it, so only one of the
    /// two may be touched.
    pub mail_transport: Option<Alternative>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            stop_candidates: to_strings(&[
                "crond.service",
                "dovecot.service",
                "drwebd.service",
                "fail2ban.service",
                "httpd.service",
                "mailman.service",
                "mariadb.service",
                "mysqld.service",
                "named-chroot.service",
                "plesk-ext-monitoring-hcd.service",
                "plesk-ip-remapping.service",
                "plesk-ssh-terminal.service",
                "plesk-task-manager.service",
                "plesk-web-socket.service",
                "psa.service",
                "sw-collectd.service",
                "sw-cp-server.service",
                "sw-engine.service",
            ]),
            basic_candidates: to_strings(&[
                "mariadb.service",
                "mysqld.service",
                "plesk-task-manager.service",
                "plesk-web-socket.service",
                "sw-cp-server.service",
                "sw-engine.service",
            ]),
            mail_transport: Some(Alternative {
                primary: "qmail.service".to_string(),
                fallback: "postfix.service".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionConfig {
    pub tool: PathBuf,
    pub analyze_args: Vec<String>,
    pub apply_args: Vec<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("leapp"),
            analyze_args: to_strings(&["preupgrade"]),
            apply_args: to_strings(&["upgrade"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
    pub motd: PathBuf,
    pub named_user_options: PathBuf,
    pub named_chroot_user_options: PathBuf,
    pub selinux_config: PathBuf,
    pub modprobe_blacklist: PathBuf,
    pub repos_dir: PathBuf,
    pub sys_class_net: PathBuf,
    pub lsmod: PathBuf,
    pub rmmod: PathBuf,
    pub rpm: PathBuf,
    pub plesk: PathBuf,
    pub os_release: PathBuf,
    pub uname: PathBuf,
    pub yum: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/distro-upgrader"),
            log_file: PathBuf::from("/var/log/distro-upgrader.log"),
            motd: PathBuf::from("/etc/motd"),
            named_user_options: PathBuf::from("/etc/named-user-options.conf"),
            named_chroot_user_options: PathBuf::from(
                "/var/named/chroot/etc/named-user-options.conf",
            ),
            selinux_config: PathBuf::from("/etc/selinux/config"),
            modprobe_blacklist: PathBuf::from("/etc/modprobe.d/pataacpibl.conf"),
            repos_dir: PathBuf::from("/etc/yum.repos.d"),
            sys_class_net: PathBuf::from("/sys/class/net"),
            lsmod: PathBuf::from("/usr/sbin/lsmod"),
            rmmod: PathBuf::from("/usr/sbin/rmmod"),
            rpm: PathBuf::from("/usr/bin/rpm"),
            plesk: PathBuf::from("/usr/sbin/plesk"),
            os_release: PathBuf::from("/etc/os-release"),
            uname: PathBuf::from("/usr/bin/uname"),
            yum: PathBuf::from("/usr/bin/yum"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChecksConfig {
    pub required_space_bytes: u64,
    /// The conversion tool stages the target root filesystem under here.
    pub space_probe_path: PathBuf,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            required_space_bytes: 5 * 1024 * 1024 * 1024,
            space_probe_path: PathBuf::from("/var/lib"),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl UpgradeConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
    /// used if present and built-in defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.is_file() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config '{}'", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.systemd.resume_unit.trim().is_empty() {
            bail!("systemd.resume_unit must not be empty");
        }
        let mut units: Vec<&String> = self
            .services
            .stop_candidates
            .iter()
            .chain(self.services.basic_candidates.iter())
            .collect();
        units.push(&self.systemd.resume_unit);
        if let Some(alt) = &self.services.mail_transport {
            units.push(&alt.primary);
            units.push(&alt.fallback);
        }
        for unit in units {
            if !unit.ends_with(".service") {
                bail!("'{}' is not a service unit name (expected '*.service')", unit);
            }
        }
        if self.checks.required_space_bytes == 0 {
            bail!("checks.required_space_bytes must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = UpgradeConfig::from_toml("").unwrap();
        assert_eq!(config.services.stop_candidates.len(), 18);
        assert_eq!(config.services.basic_candidates.len(), 6);
        assert_eq!(
            config.systemd.resume_unit_path(),
            PathBuf::from("/etc/systemd/system/distro-upgrader-resume.service")
        );
        assert_eq!(config.conversion.analyze_args, vec!["preupgrade"]);
        assert_eq!(config.conversion.apply_args, vec!["upgrade"]);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config = UpgradeConfig::from_toml(
            r#"
            [services]
            stop_candidates = ["a.service", "b.service"]

            [systemd]
            system_unit_dir = "/tmp/units"
            "#,
        )
        .unwrap();
        assert_eq!(config.services.stop_candidates, vec!["a.service", "b.service"]);
        assert_eq!(config.services.basic_candidates.len(), 6);
        assert_eq!(config.systemd.system_unit_dir, PathBuf::from("/tmp/units"));
        assert_eq!(config.systemd.systemctl, PathBuf::from("/usr/bin/systemctl"));
    }

    #[test]
    fn test_check_tool_paths_override() {
        let config = UpgradeConfig::from_toml(
            "[paths]\nos_release = \"/run/os-release\"\nyum = \"/usr/local/bin/yum\"\n",
        )
        .unwrap();
        assert_eq!(config.paths.os_release, PathBuf::from("/run/os-release"));
        assert_eq!(config.paths.yum, PathBuf::from("/usr/local/bin/yum"));
        assert_eq!(config.paths.uname, PathBuf::from("/usr/bin/uname"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = UpgradeConfig::from_toml("[services]\nstop = []\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_non_service_unit_rejected() {
        let result = UpgradeConfig::from_toml("[services]\nbasic_candidates = [\"sshd\"]\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("'sshd' is not a service unit name"));
    }

    #[test]
    fn test_mail_transport_override() {
        let config = UpgradeConfig::from_toml(
            "[services.mail_transport]\nprimary = \"exim.service\"\nfallback = \"postfix.service\"\n",
        )
        .unwrap();
        assert_eq!(
            config.services.mail_transport,
            Some(Alternative {
                primary: "exim.service".into(),
                fallback: "postfix.service".into(),
            })
        );
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        assert!(UpgradeConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("upgrader.toml");
        fs::write(&path, "[checks]\nrequired_space_bytes = 1024\n").unwrap();
        let config = UpgradeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.checks.required_space_bytes, 1024);
    }
}
