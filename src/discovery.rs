//! Service discovery: which of the known panel units are installed here.
//!
//! The probe is a plain existence check of `<system unit dir>/<unit>`. It is
//! repeated on every run; nothing about the result is persisted, so the run
//! after the reboot sees the units of the converted system.

use std::path::{Path, PathBuf};

use tracing::debug;

/// A unit name with its existence resolved at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub name: String,
    pub exists: bool,
}

/// Ordered, existence-filtered units selected for one lifecycle action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSet {
    units: Vec<ServiceUnit>,
}

impl ServiceSet {
    pub fn push(&mut self, unit: ServiceUnit) {
        self.units.push(unit);
    }

    pub fn units(&self) -> &[ServiceUnit] {
        &self.units
    }

    /// Unit names in discovery order, ready to hand to `systemctl`.
    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}

/// Probes the service manager's system unit directory.
#[derive(Debug, Clone)]
pub struct ServiceDiscovery {
    unit_dir: PathBuf,
}

impl ServiceDiscovery {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }

    /// Probe a single unit.
    pub fn probe(&self, name: &str) -> ServiceUnit {
        let exists = self.unit_dir.join(name).exists();
        debug!(unit = name, exists, "Probed service unit");
        ServiceUnit {
            name: name.to_string(),
            exists,
        }
    }

    /// Keep the candidates that are installed, in input order.
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S]) -> ServiceSet {
        let mut set = ServiceSet::default();
        for candidate in candidates {
            let unit = self.probe(candidate.as_ref());
            if unit.exists {
                set.push(unit);
            }
        }
        set
    }

    /// `primary` when installed, otherwise `fallback`.
    ///
    /// The fallback is taken as-is; nothing further is probed.
    pub fn resolve_alternative(&self, primary: &str, fallback: &str) -> ServiceUnit {
        let unit = self.probe(primary);
        if unit.exists {
            return unit;
        }
        ServiceUnit {
            name: fallback.to_string(),
            exists: self.unit_dir.join(fallback).exists(),
        }
    }
}
