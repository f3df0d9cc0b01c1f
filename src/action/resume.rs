//! Resume checkpoint: a unit that runs `<entry point> -s finish` on the next
//! boot.
//!
//! The unit file is the checkpoint itself. While it exists, the next boot
//! resumes the pipeline; once the finish stage completes or the upgrade is
//! reverted it is disabled and removed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::{Action, ActiveAction, Host};
use crate::systemd::{Section, UnitFile};

/// Argument pair that selects the finish stage. The unit written by one
/// version of the tool may be executed by the next, so this never changes.
pub const RESUME_ARGS: &str = "-s finish";

/// Render the resume unit for the given entry point.
pub fn resume_unit(entry_point: &Path) -> UnitFile {
    UnitFile::new()
        .with(
            Section::new("Unit")
                .directive(
                    "Description",
                    "First boot service for upgrade process from CentOS 7 to AlmaLinux8.",
                )
                .directive("After", "network.target network-online.target"),
        )
        .with(
            Section::new("Service")
                .directive("Type", "simple")
                .comment("want to run it once per boot time")
                .directive("RemainAfterExit", "yes")
                .directive(
                    "ExecStart",
                    format!("{} {}", entry_point.display(), RESUME_ARGS),
                ),
        )
        .with(Section::new("Install").directive("WantedBy", "multi-user.target"))
}

/// Installs the resume unit for the next boot.
#[derive(Debug, Clone)]
pub struct AddUpgradeSystemdService {
    entry_point: PathBuf,
    unit_name: String,
    unit_path: PathBuf,
}

impl AddUpgradeSystemdService {
    pub fn new(entry_point: impl Into<PathBuf>, unit_dir: &Path, unit_name: &str) -> Self {
        Self {
            entry_point: entry_point.into(),
            unit_name: unit_name.to_string(),
            unit_path: unit_dir.join(unit_name),
        }
    }

    pub fn unit_path(&self) -> &Path {
        &self.unit_path
    }

    /// Whether a resume is pending on this host.
    pub fn is_pending(&self) -> bool {
        self.unit_path.exists()
    }

    fn remove_unit(&self, host: &Host) -> Result<()> {
        if !self.unit_path.exists() {
            debug!(unit = %self.unit_name, "Resume unit already removed");
            return Ok(());
        }
        host.systemctl().disable(&[self.unit_name.clone()])?;
        fs::remove_file(&self.unit_path)
            .with_context(|| format!("removing resume unit '{}'", self.unit_path.display()))?;
        info!(unit = %self.unit_name, "Removed resume unit");
        Ok(())
    }
}

impl Action for AddUpgradeSystemdService {
    fn name(&self) -> &str {
        "adding resume service"
    }

    fn prepare(&self, host: &Host) -> Result<()> {
        let unit = resume_unit(&self.entry_point);
        if let Some(parent) = self.unit_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating unit directory '{}'", parent.display()))?;
        }
        fs::write(&self.unit_path, unit.to_string())
            .with_context(|| format!("writing resume unit '{}'", self.unit_path.display()))?;

        // Enable only: the unit must fire on the next boot, not now.
        host.systemctl().enable(&[self.unit_name.clone()])?;
        info!(unit = %self.unit_name, path = %self.unit_path.display(), "Installed resume unit");
        Ok(())
    }

    fn post(&self, host: &Host) -> Result<()> {
        self.remove_unit(host)
    }
}

impl ActiveAction for AddUpgradeSystemdService {
    fn revert(&self, host: &Host) -> Result<()> {
        self.remove_unit(host)
    }
}
