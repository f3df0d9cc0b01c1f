//! Reboot-resilient orchestration of a Plesk host upgrade from CentOS 7 to
//! AlmaLinux 8.
//!
//! The upgrade is a pipeline of steps. The start stage prepares the host,
//! installs a one-shot resume unit and hands over to the conversion tool; the
//! host then reboots into the converted system, where the resume unit runs the
//! finish stage. Any failure rolls the host back.
//!
//! - **Actions** - [`action::Action`] / [`action::ActiveAction`] steps with
//!   `prepare`, `post` and `revert`
//! - **Service discovery** - which of the known panel units are installed
//! - **Orchestrator** - stage execution, rollback, run manifest, reboot
//! - **Preflight checks** - host validation before anything is changed
//!
//! # Architecture
//!
//! ```text
//! distro-upgrader -s start                 (before reboot)
//!     │
//!     ├── preflight checks
//!     ├── prepare: motd, resume unit, stop services, ..., conversion
//!     └── reboot
//!
//! distro-upgrader-resume.service
//!     │
//!     └── distro-upgrader -s finish        (first boot of AlmaLinux 8)
//!             ├── preflight: running AlmaLinux 8
//!             ├── post: remove resume unit, enable services, ...
//!             └── reboot
//! ```

pub mod action;
pub mod config;
pub mod discovery;
pub mod error;
pub mod files;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod run_state;
pub mod systemd;

#[cfg(test)]
mod testing;

pub use action::{Action, ActiveAction, Host, Phase, Step};
pub use config::UpgradeConfig;
pub use discovery::{ServiceDiscovery, ServiceSet, ServiceUnit};
pub use error::{CommandError, Rollback, StageError};
pub use pipeline::{build_pipeline, Orchestrator, Stage};
pub use run_state::{RunManifest, RunStatus};
