//! In-memory host used by the unit tests.
//!
//! Records every command and simulates the parts of the host the actions
//! observe: systemd enabled/active sets, `rpm -q`, `lsmod`, the installed
//! and running kernels, pending yum updates.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;

use crate::action::Host;
use crate::error::CommandError;
use crate::process::{CommandLine, CommandRunner};

pub(crate) const SYSTEMCTL: &str = "/usr/bin/systemctl";

/// Observable service-manager state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServiceState {
    pub(crate) enabled: BTreeSet<String>,
    pub(crate) active: BTreeSet<String>,
    pub(crate) reboots: u32,
}

#[derive(Default)]
pub(crate) struct FakeHost {
    commands: RefCell<Vec<CommandLine>>,
    state: RefCell<ServiceState>,
    failures: RefCell<Vec<String>>,
    installed_packages: RefCell<BTreeSet<String>>,
    loaded_modules: RefCell<Vec<String>>,
    kernels: RefCell<Vec<String>>,
    running_kernel: RefCell<String>,
    pending_updates: RefCell<bool>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn host(&self) -> Host<'_> {
        Host::new(self, Path::new(SYSTEMCTL))
    }

    /// Mark units as enabled and running, as on a live panel host.
    pub(crate) fn with_running(self, units: &[&str]) -> Self {
        {
            let mut state = self.state.borrow_mut();
            for unit in units {
                state.enabled.insert(unit.to_string());
                state.active.insert(unit.to_string());
            }
        }
        self
    }

    pub(crate) fn with_package(self, name: &str) -> Self {
        self.installed_packages.borrow_mut().insert(name.to_string());
        self
    }

    pub(crate) fn with_loaded_module(self, name: &str) -> Self {
        self.loaded_modules.borrow_mut().push(name.to_string());
        self
    }

    /// Install kernel packages, given as `<name>-<version>-<release>.<arch>`.
    pub(crate) fn with_kernels(self, packages: &[&str]) -> Self {
        self.kernels
            .borrow_mut()
            .extend(packages.iter().map(|p| p.to_string()));
        self
    }

    /// Release `uname -r` reports.
    pub(crate) fn with_running_kernel(self, release: &str) -> Self {
        *self.running_kernel.borrow_mut() = release.to_string();
        self
    }

    pub(crate) fn with_pending_updates(self) -> Self {
        *self.pending_updates.borrow_mut() = true;
        self
    }

    /// Fail every command whose rendered form starts with `prefix`.
    pub(crate) fn fail_on(&self, prefix: &str) {
        self.failures.borrow_mut().push(prefix.to_string());
    }

    pub(crate) fn clear_failures(&self) {
        self.failures.borrow_mut().clear();
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    pub(crate) fn clear_commands(&self) {
        self.commands.borrow_mut().clear();
    }

    pub(crate) fn state(&self) -> ServiceState {
        self.state.borrow().clone()
    }

    pub(crate) fn is_enabled(&self, unit: &str) -> bool {
        self.state.borrow().enabled.contains(unit)
    }

    pub(crate) fn is_active(&self, unit: &str) -> bool {
        self.state.borrow().active.contains(unit)
    }

    fn execute(&self, cmd: &CommandLine) -> Result<(bool, String)> {
        self.commands.borrow_mut().push(cmd.clone());

        let rendered = cmd.to_string();
        if self
            .failures
            .borrow()
            .iter()
            .any(|prefix| rendered.starts_with(prefix.as_str()))
        {
            return Err(CommandError::Failed {
                command: rendered,
                code: 1,
                stderr: "injected failure".to_string(),
            }
            .into());
        }

        match cmd.program_name() {
            "systemctl" => Ok(self.systemctl(cmd)),
            "rpm" if cmd.args.get(1).map(String::as_str) == Some("-a") => {
                Ok((true, self.query_kernels(&cmd.args[2..])))
            }
            "rpm" => {
                let installed = self.installed_packages.borrow();
                let all = cmd.args.iter().skip(1).all(|p| installed.contains(p));
                Ok((all, String::new()))
            }
            "lsmod" => {
                let mut out = String::from("Module                  Size  Used by\n");
                for module in self.loaded_modules.borrow().iter() {
                    out.push_str(&format!("{:<24}{:>6}  0\n", module, 16384));
                }
                Ok((true, out))
            }
            "rmmod" => {
                let mut loaded = self.loaded_modules.borrow_mut();
                loaded.retain(|m| !cmd.args.contains(m));
                Ok((true, String::new()))
            }
            "uname" => Ok((true, format!("{}\n", self.running_kernel.borrow()))),
            "yum" if cmd.args.first().map(String::as_str) == Some("check-update") => {
                Ok((!*self.pending_updates.borrow(), String::new()))
            }
            _ => Ok((true, String::new())),
        }
    }

    /// `rpm -q -a <names>`: one line per installed kernel of those names.
    fn query_kernels(&self, names: &[String]) -> String {
        let mut out = String::new();
        for package in self.kernels.borrow().iter() {
            let matches = names.iter().any(|name| {
                package
                    .strip_prefix(name.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .map(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
                    .unwrap_or(false)
            });
            if matches {
                out.push_str(package);
                out.push('\n');
            }
        }
        out
    }

    fn systemctl(&self, cmd: &CommandLine) -> (bool, String) {
        let Some((verb, units)) = cmd.args.split_first() else {
            return (true, String::new());
        };
        let mut state = self.state.borrow_mut();
        match verb.as_str() {
            "stop" => units.iter().for_each(|u| {
                state.active.remove(u);
            }),
            "start" => units.iter().for_each(|u| {
                state.active.insert(u.clone());
            }),
            "enable" => units.iter().for_each(|u| {
                state.enabled.insert(u.clone());
            }),
            "disable" => units.iter().for_each(|u| {
                state.enabled.remove(u);
            }),
            "is-enabled" => {
                let enabled = units.iter().all(|u| state.enabled.contains(u));
                return (enabled, String::new());
            }
            "reboot" => state.reboots += 1,
            _ => {}
        }
        (true, String::new())
    }
}

impl CommandRunner for FakeHost {
    fn check_call(&self, cmd: &CommandLine) -> Result<()> {
        let (ok, _) = self.execute(cmd)?;
        if !ok {
            return Err(CommandError::Failed {
                command: cmd.to_string(),
                code: 1,
                stderr: String::new(),
            }
            .into());
        }
        Ok(())
    }

    fn check_output(&self, cmd: &CommandLine) -> Result<String> {
        let (ok, out) = self.execute(cmd)?;
        if !ok {
            return Err(CommandError::Failed {
                command: cmd.to_string(),
                code: 1,
                stderr: String::new(),
            }
            .into());
        }
        Ok(out)
    }

    fn succeeds(&self, cmd: &CommandLine) -> Result<bool> {
        let (ok, _) = self.execute(cmd)?;
        Ok(ok)
    }
}
