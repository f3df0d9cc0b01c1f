//! Pipeline steps.
//!
//! Every step implements [`Action`]: a forward `prepare` run before the
//! conversion and a `post` run by the first boot of the converted system.
//! Steps that can be undone additionally implement [`ActiveAction`], which
//! adds `revert` and the duration hints used for progress display.
//!
//! Actions keep no state between phases. The process that runs `prepare`
//! and the one that runs `post` are separated by a reboot, so anything an
//! action needs is either re-discovered or lives on disk.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use distro_upgrader::action::{Action, ActiveAction, Host, Step};
//!
//! struct Banner;
//!
//! impl Action for Banner {
//!     fn name(&self) -> &str { "show banner" }
//!     fn prepare(&self, _host: &Host) -> Result<()> { Ok(()) }
//! }
//!
//! impl ActiveAction for Banner {
//!     fn revert(&self, _host: &Host) -> Result<()> { Ok(()) }
//! }
//!
//! let step = Step::reversible(Banner);
//! assert!(step.as_reversible().is_some());
//! ```

pub mod convert;
pub mod resume;
pub mod services;
pub mod system;

use std::fmt;

use anyhow::Result;

use crate::process::{CommandRunner, SystemRunner};
use crate::systemd::Systemctl;

pub use convert::DoConvert;
pub use resume::AddUpgradeSystemdService;
pub use services::{RulePleskRelatedServices, StartPleskBasicServices};
pub use system::{
    AddFinishSshLoginMessage, AddInProgressSshLoginMessage, DisableSuspiciousKernelModules,
    FixNamedConfig, FixSpamassassinConfig, RuleSelinux,
};

/// Estimate used for steps that do not provide their own.
pub const DEFAULT_ESTIMATE_SECS: u64 = 1;

/// Phase of a step, for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Post,
    Revert,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Post => write!(f, "post"),
            Phase::Revert => write!(f, "revert"),
        }
    }
}

/// What an action runs against: the command runner and the service manager.
pub struct Host<'a> {
    runner: &'a dyn CommandRunner,
    systemctl: Systemctl<'a>,
}

impl<'a> Host<'a> {
    pub fn new(runner: &'a dyn CommandRunner, systemctl_path: &std::path::Path) -> Self {
        Self {
            runner,
            systemctl: Systemctl::new(runner, systemctl_path),
        }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner
    }

    pub fn systemctl(&self) -> &Systemctl<'a> {
        &self.systemctl
    }
}

impl Host<'static> {
    /// Host backed by real process execution.
    pub fn system(systemctl_path: &std::path::Path) -> Self {
        static RUNNER: SystemRunner = SystemRunner;
        Self::new(&RUNNER, systemctl_path)
    }
}

/// A named pipeline step.
pub trait Action {
    /// Name for logging and progress display.
    fn name(&self) -> &str;

    /// Whether the step applies to this host. Steps that are not required are
    /// skipped in every phase.
    fn is_required(&self, _host: &Host) -> Result<bool> {
        Ok(true)
    }

    /// Forward change, run before the conversion.
    fn prepare(&self, host: &Host) -> Result<()>;

    /// Follow-up, run once the converted system has booted.
    fn post(&self, _host: &Host) -> Result<()> {
        Ok(())
    }
}

/// A step that can be undone.
///
/// `revert` must succeed without a prior `prepare` and must be idempotent:
/// the orchestrator reverts eagerly and does not track which phase each step
/// reached.
pub trait ActiveAction: Action {
    fn revert(&self, host: &Host) -> Result<()>;

    fn estimate_prepare_time(&self) -> u64 {
        DEFAULT_ESTIMATE_SECS
    }

    fn estimate_post_time(&self) -> u64 {
        DEFAULT_ESTIMATE_SECS
    }

    fn estimate_revert_time(&self) -> u64 {
        DEFAULT_ESTIMATE_SECS
    }
}

/// A pipeline entry tagged with its reversibility.
pub enum Step {
    OneWay(Box<dyn Action>),
    Reversible(Box<dyn ActiveAction>),
}

impl Step {
    pub fn one_way(action: impl Action + 'static) -> Self {
        Step::OneWay(Box::new(action))
    }

    pub fn reversible(action: impl ActiveAction + 'static) -> Self {
        Step::Reversible(Box::new(action))
    }

    pub fn name(&self) -> &str {
        match self {
            Step::OneWay(action) => action.name(),
            Step::Reversible(action) => action.name(),
        }
    }

    pub fn is_required(&self, host: &Host) -> Result<bool> {
        match self {
            Step::OneWay(action) => action.is_required(host),
            Step::Reversible(action) => action.is_required(host),
        }
    }

    pub fn as_reversible(&self) -> Option<&dyn ActiveAction> {
        match self {
            Step::OneWay(_) => None,
            Step::Reversible(action) => Some(action.as_ref()),
        }
    }

    /// Run the given phase. `Revert` on a one-way step is a no-op.
    pub fn run(&self, phase: Phase, host: &Host) -> Result<()> {
        match (self, phase) {
            (Step::OneWay(action), Phase::Prepare) => action.prepare(host),
            (Step::OneWay(action), Phase::Post) => action.post(host),
            (Step::OneWay(_), Phase::Revert) => Ok(()),
            (Step::Reversible(action), Phase::Prepare) => action.prepare(host),
            (Step::Reversible(action), Phase::Post) => action.post(host),
            (Step::Reversible(action), Phase::Revert) => action.revert(host),
        }
    }

    /// Duration hint in seconds for the given phase.
    pub fn estimate(&self, phase: Phase) -> u64 {
        match (self, phase) {
            (Step::OneWay(_), _) => DEFAULT_ESTIMATE_SECS,
            (Step::Reversible(action), Phase::Prepare) => action.estimate_prepare_time(),
            (Step::Reversible(action), Phase::Post) => action.estimate_post_time(),
            (Step::Reversible(action), Phase::Revert) => action.estimate_revert_time(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::OneWay(action) => f.debug_tuple("OneWay").field(&action.name()).finish(),
            Step::Reversible(action) => {
                f.debug_tuple("Reversible").field(&action.name()).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting {
        prepared: Rc<Cell<u32>>,
        reverted: Rc<Cell<u32>>,
    }

    impl Action for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn prepare(&self, _host: &Host) -> Result<()> {
            self.prepared.set(self.prepared.get() + 1);
            Ok(())
        }
    }

    impl ActiveAction for Counting {
        fn revert(&self, _host: &Host) -> Result<()> {
            self.reverted.set(self.reverted.get() + 1);
            Ok(())
        }

        fn estimate_revert_time(&self) -> u64 {
            42
        }
    }

    struct OneShot;

    impl Action for OneShot {
        fn name(&self) -> &str {
            "one shot"
        }

        fn is_required(&self, _host: &Host) -> Result<bool> {
            Ok(false)
        }

        fn prepare(&self, _host: &Host) -> Result<()> {
            anyhow::bail!("must not run")
        }
    }

    #[test]
    fn test_step_dispatches_phases() {
        let fake = FakeHost::new();
        let host = fake.host();
        let prepared = Rc::new(Cell::new(0));
        let reverted = Rc::new(Cell::new(0));
        let step = Step::reversible(Counting {
            prepared: prepared.clone(),
            reverted: reverted.clone(),
        });

        step.run(Phase::Prepare, &host).unwrap();
        step.run(Phase::Post, &host).unwrap();
        step.run(Phase::Revert, &host).unwrap();

        assert_eq!(prepared.get(), 1);
        assert_eq!(reverted.get(), 1);
        assert_eq!(step.estimate(Phase::Revert), 42);
        assert_eq!(step.estimate(Phase::Prepare), DEFAULT_ESTIMATE_SECS);
    }

    #[test]
    fn test_one_way_step_has_no_revert() {
        let fake = FakeHost::new();
        let host = fake.host();
        let step = Step::one_way(OneShot);

        assert!(step.as_reversible().is_none());
        assert!(!step.is_required(&host).unwrap());
        step.run(Phase::Revert, &host).unwrap();
        assert!(step.run(Phase::Prepare, &host).is_err());
        assert!(fake.commands().is_empty());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Prepare.to_string(), "prepare");
        assert_eq!(Phase::Post.to_string(), "post");
        assert_eq!(Phase::Revert.to_string(), "revert");
    }
}
