//! systemd integration: `systemctl` invocations and unit file rendering.

pub mod unit;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::process::{CommandLine, CommandRunner};

pub use unit::{Section, UnitFile};

/// `systemctl` front end over a [`CommandRunner`].
///
/// Unit lists are passed through as given, including an empty list, so every
/// lifecycle action issues the same commands regardless of what discovery
/// found on the host.
pub struct Systemctl<'a> {
    runner: &'a dyn CommandRunner,
    program: PathBuf,
}

impl<'a> Systemctl<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, verb: &str, units: &[String]) -> CommandLine {
        CommandLine::new(&self.program)
            .arg(verb)
            .args(units.iter().cloned())
    }

    pub fn stop(&self, units: &[String]) -> Result<()> {
        self.runner.check_call(&self.command("stop", units))
    }

    pub fn disable(&self, units: &[String]) -> Result<()> {
        self.runner.check_call(&self.command("disable", units))
    }

    pub fn enable(&self, units: &[String]) -> Result<()> {
        self.runner.check_call(&self.command("enable", units))
    }

    pub fn start(&self, units: &[String]) -> Result<()> {
        self.runner.check_call(&self.command("start", units))
    }

    pub fn daemon_reload(&self) -> Result<()> {
        self.runner.check_call(&self.command("daemon-reload", &[]))
    }

    pub fn reboot(&self) -> Result<()> {
        self.runner.check_call(&self.command("reboot", &[]))
    }

    /// Whether `systemctl is-enabled <unit>` reports the unit enabled.
    pub fn is_enabled(&self, unit: &str) -> Result<bool> {
        self.runner
            .succeeds(&self.command("is-enabled", &[unit.to_string()]))
    }
}
