//! The upgrade pipeline: which steps run, in which order, in which stage.

mod orchestrator;

pub use orchestrator::Orchestrator;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::action::{
    AddFinishSshLoginMessage, AddInProgressSshLoginMessage, AddUpgradeSystemdService,
    DisableSuspiciousKernelModules, DoConvert, FixNamedConfig, FixSpamassassinConfig, Phase,
    RulePleskRelatedServices, RuleSelinux, StartPleskBasicServices, Step,
};
use crate::config::UpgradeConfig;
use crate::discovery::ServiceDiscovery;

/// Invocation of the tool. `Start` runs before the conversion reboot,
/// `Finish` on the first boot of the converted system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Start,
    Finish,
    Revert,
}

impl Stage {
    /// The action phase this stage drives.
    pub fn phase(self) -> Phase {
        match self {
            Stage::Start => Phase::Prepare,
            Stage::Finish => Phase::Post,
            Stage::Revert => Phase::Revert,
        }
    }

    /// Whether the host is rebooted once the stage succeeds.
    pub fn reboots(self) -> bool {
        matches!(self, Stage::Start | Stage::Finish)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Start => write!(f, "start"),
            Stage::Finish => write!(f, "finish"),
            Stage::Revert => write!(f, "revert"),
        }
    }
}

/// Assemble the steps for this host.
///
/// Services are discovered here, so the start and finish stages each see the
/// units installed at the time they run. The conversion is always last.
pub fn build_pipeline(config: &UpgradeConfig, entry_point: &Path) -> Vec<Step> {
    let discovery = ServiceDiscovery::new(&config.systemd.system_unit_dir);
    let paths = &config.paths;

    vec![
        Step::reversible(AddInProgressSshLoginMessage::new(&paths.motd, entry_point)),
        Step::reversible(AddUpgradeSystemdService::new(
            entry_point,
            &config.systemd.admin_unit_dir,
            &config.systemd.resume_unit,
        )),
        Step::reversible(RulePleskRelatedServices::discover(
            &discovery,
            &config.services,
        )),
        // Before anything that reloads the service manager.
        Step::reversible(FixSpamassassinConfig::new(&paths.rpm, &paths.plesk)),
        Step::reversible(FixNamedConfig::new(
            &paths.named_user_options,
            &paths.named_chroot_user_options,
        )),
        Step::reversible(RuleSelinux::new(&paths.selinux_config)),
        Step::reversible(DisableSuspiciousKernelModules::new(
            &paths.modprobe_blacklist,
            &paths.lsmod,
            &paths.rmmod,
        )),
        Step::reversible(StartPleskBasicServices::discover(
            &discovery,
            &config.services,
        )),
        Step::reversible(AddFinishSshLoginMessage::new(&paths.motd, entry_point)),
        Step::one_way(DoConvert::new(&config.conversion)),
    ]
}
