//! Host configuration tweaks the conversion needs.
//!
//! Each of these touches one file or one service. Reverts are guarded by
//! existence checks or backups, so they are no-ops on an untouched host.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{Action, ActiveAction, Host};
use crate::files;
use crate::process::CommandLine;

// ─────────────────────────────────────────────────────────────────────────────
// SSH login messages
// ─────────────────────────────────────────────────────────────────────────────

const BANNER_RULE: &str =
    "===============================================================================";

/// Banner shown to administrators logging in while the conversion runs.
pub fn in_progress_message(entry_point: &Path) -> String {
    format!(
        "\n{rule}\n\
         Message from the Plesk distro upgrader:\n\
         The server is being converted to AlmaLinux 8. Please wait.\n\
         To see the current conversion status, run the '{path} --status' command.\n\
         {rule}\n",
        rule = BANNER_RULE,
        path = entry_point.display()
    )
}

/// Banner left behind once the conversion has finished.
pub fn finish_message(motd: &Path) -> String {
    format!(
        "\n{rule}\n\
         Message from the Plesk distro upgrader:\n\
         The server has been converted to AlmaLinux 8.\n\
         You can remove this message from the {path} file.\n\
         {rule}\n",
        rule = BANNER_RULE,
        path = motd.display()
    )
}

/// Put the motd back the way it was before the in-progress banner.
fn restore_motd(motd: &Path, entry_point: &Path) -> Result<()> {
    if files::restore_file_from_backup(motd)? {
        return Ok(());
    }
    // No backup means there was no motd; drop our banner from the one we made.
    files::replace_string(motd, &in_progress_message(entry_point), "")
}

/// Parent directory of the motd missing means there is nowhere to write to.
fn motd_writable(motd: &Path) -> bool {
    motd.parent().map(Path::is_dir).unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct AddInProgressSshLoginMessage {
    motd: PathBuf,
    entry_point: PathBuf,
}

impl AddInProgressSshLoginMessage {
    pub fn new(motd: impl Into<PathBuf>, entry_point: impl Into<PathBuf>) -> Self {
        Self {
            motd: motd.into(),
            entry_point: entry_point.into(),
        }
    }
}

impl Action for AddInProgressSshLoginMessage {
    fn name(&self) -> &str {
        "add in progress ssh login message"
    }

    fn prepare(&self, _host: &Host) -> Result<()> {
        if !motd_writable(&self.motd) {
            warn!(path = %self.motd.display(), "motd cannot be created, skipping login message");
            return Ok(());
        }
        let banner = in_progress_message(&self.entry_point);
        let current = fs::read_to_string(&self.motd).unwrap_or_default();
        if current.contains(&banner) {
            return Ok(());
        }
        files::backup_file(&self.motd)?;
        files::append_to_file(&self.motd, &banner)
    }
}

impl ActiveAction for AddInProgressSshLoginMessage {
    fn revert(&self, _host: &Host) -> Result<()> {
        restore_motd(&self.motd, &self.entry_point)
    }
}

#[derive(Debug, Clone)]
pub struct AddFinishSshLoginMessage {
    motd: PathBuf,
    entry_point: PathBuf,
}

impl AddFinishSshLoginMessage {
    pub fn new(motd: impl Into<PathBuf>, entry_point: impl Into<PathBuf>) -> Self {
        Self {
            motd: motd.into(),
            entry_point: entry_point.into(),
        }
    }
}

impl Action for AddFinishSshLoginMessage {
    fn name(&self) -> &str {
        "add finish ssh login message"
    }

    fn prepare(&self, _host: &Host) -> Result<()> {
        Ok(())
    }

    fn post(&self, _host: &Host) -> Result<()> {
        if !motd_writable(&self.motd) {
            warn!(path = %self.motd.display(), "motd cannot be created, skipping login message");
            return Ok(());
        }
        restore_motd(&self.motd, &self.entry_point)?;
        files::append_to_file(&self.motd, &finish_message(&self.motd))
    }
}

impl ActiveAction for AddFinishSshLoginMessage {
    fn revert(&self, _host: &Host) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// named
// ─────────────────────────────────────────────────────────────────────────────

/// The converted system's named expects the user options file outside the
/// chroot; point it at the chrooted copy for the duration of the upgrade.
#[derive(Debug, Clone)]
pub struct FixNamedConfig {
    user_options: PathBuf,
    chrooted: PathBuf,
}

impl FixNamedConfig {
    pub fn new(user_options: impl Into<PathBuf>, chrooted: impl Into<PathBuf>) -> Self {
        Self {
            user_options: user_options.into(),
            chrooted: chrooted.into(),
        }
    }

    /// Only a link pointing at the chrooted file is ours to remove.
    fn remove_link(&self) -> Result<()> {
        let Ok(target) = fs::read_link(&self.user_options) else {
            return Ok(());
        };
        if target != self.chrooted {
            return Ok(());
        }
        fs::remove_file(&self.user_options)
            .with_context(|| format!("removing symlink '{}'", self.user_options.display()))
    }
}

impl Action for FixNamedConfig {
    fn name(&self) -> &str {
        "fix named configuration"
    }

    fn is_required(&self, _host: &Host) -> Result<bool> {
        Ok(self.chrooted.exists())
    }

    fn prepare(&self, _host: &Host) -> Result<()> {
        if self.user_options.exists() || self.user_options.is_symlink() {
            return Ok(());
        }
        std::os::unix::fs::symlink(&self.chrooted, &self.user_options).with_context(|| {
            format!(
                "linking '{}' to '{}'",
                self.user_options.display(),
                self.chrooted.display()
            )
        })
    }

    fn post(&self, _host: &Host) -> Result<()> {
        self.remove_link()
    }
}

impl ActiveAction for FixNamedConfig {
    fn revert(&self, _host: &Host) -> Result<()> {
        self.remove_link()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SELinux
// ─────────────────────────────────────────────────────────────────────────────

/// Switch SELinux to permissive while the conversion runs.
///
/// The original config is kept as a backup and put back by both `post` and
/// `revert`, so a host that was already permissive stays that way.
#[derive(Debug, Clone)]
pub struct RuleSelinux {
    config: PathBuf,
}

impl RuleSelinux {
    pub fn new(config: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
        }
    }

    fn restore(&self) -> Result<()> {
        files::restore_file_from_backup(&self.config)?;
        Ok(())
    }
}

impl Action for RuleSelinux {
    fn name(&self) -> &str {
        "rule selinux status"
    }

    fn is_required(&self, _host: &Host) -> Result<bool> {
        Ok(self.config.exists())
    }

    fn prepare(&self, _host: &Host) -> Result<()> {
        // A second prepare must not overwrite the pristine backup.
        if !files::backup_path(&self.config).exists() {
            files::backup_file(&self.config)?;
        }
        files::replace_string(&self.config, "SELINUX=enforcing", "SELINUX=permissive")
    }

    fn post(&self, _host: &Host) -> Result<()> {
        self.restore()
    }
}

impl ActiveAction for RuleSelinux {
    fn revert(&self, _host: &Host) -> Result<()> {
        self.restore()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Kernel modules
// ─────────────────────────────────────────────────────────────────────────────

/// Modules known to break the conversion's boot into the upgrade initramfs.
pub const SUSPICIOUS_MODULES: &[&str] = &["pata_acpi", "btrfs", "floppy"];

#[derive(Debug, Clone)]
pub struct DisableSuspiciousKernelModules {
    blacklist: PathBuf,
    lsmod: PathBuf,
    rmmod: PathBuf,
}

impl DisableSuspiciousKernelModules {
    pub fn new(
        blacklist: impl Into<PathBuf>,
        lsmod: impl Into<PathBuf>,
        rmmod: impl Into<PathBuf>,
    ) -> Self {
        Self {
            blacklist: blacklist.into(),
            lsmod: lsmod.into(),
            rmmod: rmmod.into(),
        }
    }

    fn blacklist_line(module: &str) -> String {
        format!("blacklist {}\n", module)
    }

    /// Suspicious modules currently loaded, per `lsmod`.
    fn loaded_modules(&self, host: &Host) -> Result<Vec<String>> {
        let listing = host.runner().check_output(&CommandLine::new(&self.lsmod))?;
        Ok(listing
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter(|name| SUSPICIOUS_MODULES.contains(name))
            .map(str::to_string)
            .collect())
    }

    fn drop_blacklist(&self) -> Result<()> {
        for module in SUSPICIOUS_MODULES {
            files::replace_string(&self.blacklist, &Self::blacklist_line(module), "")?;
        }
        Ok(())
    }
}

impl Action for DisableSuspiciousKernelModules {
    fn name(&self) -> &str {
        "rule suspicious kernel modules"
    }

    fn prepare(&self, host: &Host) -> Result<()> {
        if let Some(parent) = self.blacklist.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating '{}'", parent.display()))?;
        }
        let existing = fs::read_to_string(&self.blacklist).unwrap_or_default();
        let missing: String = SUSPICIOUS_MODULES
            .iter()
            .map(|m| Self::blacklist_line(m))
            .filter(|line| !existing.contains(line.as_str()))
            .collect();
        files::append_to_file(&self.blacklist, &missing)?;

        for module in self.loaded_modules(host)? {
            info!(module = %module, "Unloading kernel module");
            host.runner()
                .check_call(&CommandLine::new(&self.rmmod).arg(module))?;
        }
        Ok(())
    }

    fn post(&self, _host: &Host) -> Result<()> {
        self.drop_blacklist()
    }
}

impl ActiveAction for DisableSuspiciousKernelModules {
    fn revert(&self, _host: &Host) -> Result<()> {
        self.drop_blacklist()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// spamassassin
// ─────────────────────────────────────────────────────────────────────────────

const SPAMASSASSIN_PACKAGE: &str = "psa-spamassassin";
const SPAMASSASSIN_UNIT: &str = "spamassassin.service";

/// The panel rewrites spamassassin's unit on the converted system; keep it
/// down until then. Must run before anything issues `daemon-reload`.
#[derive(Debug, Clone)]
pub struct FixSpamassassinConfig {
    rpm: PathBuf,
    plesk: PathBuf,
}

impl FixSpamassassinConfig {
    pub fn new(rpm: impl Into<PathBuf>, plesk: impl Into<PathBuf>) -> Self {
        Self {
            rpm: rpm.into(),
            plesk: plesk.into(),
        }
    }

    fn unit() -> Vec<String> {
        vec![SPAMASSASSIN_UNIT.to_string()]
    }
}

impl Action for FixSpamassassinConfig {
    fn name(&self) -> &str {
        "fix spamassassin configuration"
    }

    fn is_required(&self, host: &Host) -> Result<bool> {
        host.runner()
            .succeeds(&CommandLine::new(&self.rpm).args(["-q", SPAMASSASSIN_PACKAGE]))
    }

    fn prepare(&self, host: &Host) -> Result<()> {
        host.systemctl().stop(&Self::unit())?;
        host.systemctl().disable(&Self::unit())?;
        Ok(())
    }

    fn post(&self, host: &Host) -> Result<()> {
        host.runner().check_call(
            &CommandLine::new(&self.plesk).args(["sbin", "spammng", "--enable"]),
        )?;
        host.runner().check_call(&CommandLine::new(&self.plesk).args([
            "sbin",
            "spammng",
            "--update",
            "--enable-server-configs",
            "--enable-user-configs",
        ]))?;
        host.systemctl().daemon_reload()?;
        host.systemctl().enable(&Self::unit())?;
        Ok(())
    }
}

impl ActiveAction for FixSpamassassinConfig {
    fn revert(&self, host: &Host) -> Result<()> {
        host.systemctl().enable(&Self::unit())?;
        host.systemctl().start(&Self::unit())?;
        Ok(())
    }
}
