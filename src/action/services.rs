//! Panel service lifecycle around the conversion.

use anyhow::Result;
use tracing::info;

use super::{Action, ActiveAction, Host};
use crate::config::ServicesConfig;
use crate::discovery::{ServiceDiscovery, ServiceSet};

/// Stops and disables every installed panel service before the conversion.
///
/// `post` only re-enables: the pipeline ends with a reboot that starts them.
/// `revert` re-enables and starts, restoring the pre-upgrade running state.
#[derive(Debug, Clone)]
pub struct RulePleskRelatedServices {
    services: ServiceSet,
}

impl RulePleskRelatedServices {
    pub fn new(services: ServiceSet) -> Self {
        Self { services }
    }

    /// Discover the installed units from the configured candidates, then
    /// append whichever mail transport is present.
    pub fn discover(discovery: &ServiceDiscovery, config: &ServicesConfig) -> Self {
        let mut services = discovery.resolve(&config.stop_candidates);
        // Both transports may be installed, and they conflict when started.
        if let Some(alt) = &config.mail_transport {
            services.push(discovery.resolve_alternative(&alt.primary, &alt.fallback));
        }
        Self::new(services)
    }

    pub fn services(&self) -> &ServiceSet {
        &self.services
    }
}

impl Action for RulePleskRelatedServices {
    fn name(&self) -> &str {
        "rule plesk services"
    }

    fn prepare(&self, host: &Host) -> Result<()> {
        let units = self.services.names();
        info!(count = units.len(), "Stopping panel services");
        host.systemctl().stop(&units)?;
        host.systemctl().disable(&units)?;
        Ok(())
    }

    fn post(&self, host: &Host) -> Result<()> {
        host.systemctl().enable(&self.services.names())
    }
}

impl ActiveAction for RulePleskRelatedServices {
    fn revert(&self, host: &Host) -> Result<()> {
        let units = self.services.names();
        host.systemctl().enable(&units)?;
        host.systemctl().start(&units)?;
        Ok(())
    }

    fn estimate_prepare_time(&self) -> u64 {
        10
    }

    fn estimate_post_time(&self) -> u64 {
        5
    }

    fn estimate_revert_time(&self) -> u64 {
        10
    }
}

/// Brings up the minimal set of units the panel needs to be reachable.
///
/// Nothing happens before the conversion. `post` and `revert` are the same
/// on purpose: this is the final recovery step whichever way the pipeline
/// ends.
#[derive(Debug, Clone)]
pub struct StartPleskBasicServices {
    services: ServiceSet,
}

impl StartPleskBasicServices {
    pub fn new(services: ServiceSet) -> Self {
        Self { services }
    }

    pub fn discover(discovery: &ServiceDiscovery, config: &ServicesConfig) -> Self {
        Self::new(discovery.resolve(&config.basic_candidates))
    }

    pub fn services(&self) -> &ServiceSet {
        &self.services
    }

    fn enable_services(&self, host: &Host) -> Result<()> {
        let units = self.services.names();
        host.systemctl().enable(&units)?;
        host.systemctl().start(&units)?;
        Ok(())
    }
}

impl Action for StartPleskBasicServices {
    fn name(&self) -> &str {
        "starting plesk services"
    }

    fn prepare(&self, _host: &Host) -> Result<()> {
        Ok(())
    }

    fn post(&self, host: &Host) -> Result<()> {
        self.enable_services(host)
    }
}

impl ActiveAction for StartPleskBasicServices {
    fn revert(&self, host: &Host) -> Result<()> {
        self.enable_services(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Alternative;
    use crate::testing::FakeHost;
    use std::fs;
    use tempfile::TempDir;

    fn unit_dir_with(units: &[&str]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for unit in units {
            fs::write(temp.path().join(unit), "").unwrap();
        }
        temp
    }

    fn config(stop: &[&str], basic: &[&str], mail: Option<(&str, &str)>) -> ServicesConfig {
        ServicesConfig {
            stop_candidates: stop.iter().map(|s| s.to_string()).collect(),
            basic_candidates: basic.iter().map(|s| s.to_string()).collect(),
            mail_transport: mail.map(|(primary, fallback)| Alternative {
                primary: primary.to_string(),
                fallback: fallback.to_string(),
            }),
        }
    }

    #[test]
    fn test_prepare_stops_then_disables_discovered_set() {
        let dir = unit_dir_with(&["a.service"]);
        let discovery = ServiceDiscovery::new(dir.path());
        let action = RulePleskRelatedServices::discover(
            &discovery,
            &config(&["a.service", "b.service"], &[], None),
        );
        assert_eq!(action.services().names(), vec!["a.service"]);

        let fake = FakeHost::new().with_running(&["a.service"]);
        action.prepare(&fake.host()).unwrap();

        assert_eq!(
            fake.commands(),
            vec![
                "/usr/bin/systemctl stop a.service",
                "/usr/bin/systemctl disable a.service",
            ]
        );
        assert!(!fake.is_active("a.service"));
        assert!(!fake.is_enabled("a.service"));
    }

    #[test]
    fn test_mail_transport_appended_after_candidates() {
        let dir = unit_dir_with(&["httpd.service", "postfix.service"]);
        let discovery = ServiceDiscovery::new(dir.path());
        let action = RulePleskRelatedServices::discover(
            &discovery,
            &config(
                &["httpd.service"],
                &[],
                Some(("qmail.service", "postfix.service")),
            ),
        );

        assert_eq!(
            action.services().names(),
            vec!["httpd.service", "postfix.service"]
        );
    }

    #[test]
    fn test_qmail_wins_over_postfix() {
        let dir = unit_dir_with(&["qmail.service", "postfix.service"]);
        let discovery = ServiceDiscovery::new(dir.path());
        let action = RulePleskRelatedServices::discover(
            &discovery,
            &config(&[], &[], Some(("qmail.service", "postfix.service"))),
        );

        assert_eq!(action.services().names(), vec!["qmail.service"]);
    }

    #[test]
    fn test_post_enables_without_starting() {
        let fake = FakeHost::new().with_running(&["a.service"]);
        let dir = unit_dir_with(&["a.service"]);
        let action = RulePleskRelatedServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&["a.service"], &[], None),
        );
        let host = fake.host();

        action.prepare(&host).unwrap();
        fake.clear_commands();
        action.post(&host).unwrap();

        assert_eq!(fake.commands(), vec!["/usr/bin/systemctl enable a.service"]);
        assert!(fake.is_enabled("a.service"));
        assert!(!fake.is_active("a.service"));
    }

    #[test]
    fn test_revert_restores_running_state() {
        let fake = FakeHost::new().with_running(&["a.service", "b.service"]);
        let before = fake.state();
        let dir = unit_dir_with(&["a.service", "b.service"]);
        let action = RulePleskRelatedServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&["a.service", "b.service"], &[], None),
        );
        let host = fake.host();

        action.prepare(&host).unwrap();
        action.revert(&host).unwrap();

        assert_eq!(fake.state(), before);
    }

    #[test]
    fn test_revert_twice_same_as_once() {
        let fake = FakeHost::new();
        let dir = unit_dir_with(&["a.service"]);
        let action = RulePleskRelatedServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&["a.service"], &[], None),
        );
        let host = fake.host();

        action.prepare(&host).unwrap();
        action.revert(&host).unwrap();
        let once = fake.state();
        action.revert(&host).unwrap();

        assert_eq!(fake.state(), once);
    }

    #[test]
    fn test_revert_from_idle_leaves_running_host_unchanged() {
        let fake = FakeHost::new().with_running(&["a.service"]);
        let before = fake.state();
        let dir = unit_dir_with(&["a.service"]);
        let action = RulePleskRelatedServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&["a.service"], &[], None),
        );

        action.revert(&fake.host()).unwrap();

        assert_eq!(fake.state(), before);
    }

    #[test]
    fn test_empty_set_still_issues_commands() {
        let dir = unit_dir_with(&[]);
        let action = RulePleskRelatedServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&["a.service"], &[], None),
        );
        let fake = FakeHost::new();

        action.prepare(&fake.host()).unwrap();

        assert_eq!(
            fake.commands(),
            vec!["/usr/bin/systemctl stop", "/usr/bin/systemctl disable"]
        );
    }

    #[test]
    fn test_stop_failure_propagates_before_disable() {
        let dir = unit_dir_with(&["a.service"]);
        let action = RulePleskRelatedServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&["a.service"], &[], None),
        );
        let fake = FakeHost::new();
        fake.fail_on("/usr/bin/systemctl stop");

        assert!(action.prepare(&fake.host()).is_err());
        assert_eq!(fake.commands(), vec!["/usr/bin/systemctl stop a.service"]);
    }

    #[test]
    fn test_estimates() {
        let action = RulePleskRelatedServices::new(ServiceSet::default());
        assert_eq!(action.estimate_prepare_time(), 10);
        assert_eq!(action.estimate_post_time(), 5);
        assert_eq!(action.estimate_revert_time(), 10);
    }

    #[test]
    fn test_basic_services_prepare_is_noop() {
        let dir = unit_dir_with(&["sw-engine.service"]);
        let action = StartPleskBasicServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&[], &["sw-engine.service", "mariadb.service"], None),
        );
        let fake = FakeHost::new();

        action.prepare(&fake.host()).unwrap();

        assert!(fake.commands().is_empty());
    }

    #[test]
    fn test_basic_services_post_and_revert_match() {
        let dir = unit_dir_with(&["sw-engine.service", "mariadb.service"]);
        let action = StartPleskBasicServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&[], &["sw-engine.service", "mariadb.service"], None),
        );

        let post_host = FakeHost::new();
        action.post(&post_host.host()).unwrap();
        let revert_host = FakeHost::new();
        action.revert(&revert_host.host()).unwrap();

        assert_eq!(post_host.commands(), revert_host.commands());
        assert_eq!(
            post_host.commands(),
            vec![
                "/usr/bin/systemctl enable sw-engine.service mariadb.service",
                "/usr/bin/systemctl start sw-engine.service mariadb.service",
            ]
        );
        assert!(post_host.is_active("mariadb.service"));
        assert_eq!(post_host.state(), revert_host.state());
    }

    #[test]
    fn test_basic_services_revert_idempotent() {
        let dir = unit_dir_with(&["sw-engine.service"]);
        let action = StartPleskBasicServices::discover(
            &ServiceDiscovery::new(dir.path()),
            &config(&[], &["sw-engine.service"], None),
        );
        let fake = FakeHost::new();
        let host = fake.host();

        action.revert(&host).unwrap();
        let once = fake.state();
        action.revert(&host).unwrap();

        assert_eq!(fake.state(), once);
    }
}
