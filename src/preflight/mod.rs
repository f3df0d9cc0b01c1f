//! Preflight checks run before a stage changes anything.
//!
//! The start stage validates that the host can be converted; the finish stage
//! only confirms it booted into the converted system.
//! A failed check carries an operator-facing description of how to fix it.
//!
//! # Example
//!
//! ```rust
//! use distro_upgrader::preflight::command_exists;
//!
//! if !command_exists("leapp") {
//!     println!("leapp is not installed");
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::action::Host;
use crate::config::UpgradeConfig;
use crate::files;
use crate::pipeline::Stage;
use crate::process::CommandLine;

/// Check if a command exists on the host system.
///
/// Absolute paths are checked directly, bare names are looked up in PATH.
pub fn command_exists(cmd: impl AsRef<std::ffi::OsStr>) -> bool {
    which::which(cmd).is_ok()
}

/// A single host validation.
pub trait Check {
    fn name(&self) -> &str;

    /// How to fix the host. Only meaningful after [`Check::run`] returned
    /// `false`; may include what the check found.
    fn description(&self) -> String;

    /// `Ok(true)` when the host passes.
    fn run(&mut self, host: &Host) -> Result<bool>;
}

/// Run every check and collect the failures as `"<name>: <description>"`.
///
/// A check that errors counts as failed; the remaining checks still run.
pub fn run_checks(checks: &mut [Box<dyn Check>], host: &Host) -> Vec<String> {
    let mut failures = Vec::new();
    for check in checks.iter_mut() {
        info!(check = %check.name(), "Running preflight check");
        match check.run(host) {
            Ok(true) => debug!(check = %check.name(), "Check passed"),
            Ok(false) => {
                warn!(check = %check.name(), "Check failed");
                failures.push(format!("{}: {}", check.name(), check.description()));
            }
            Err(err) => {
                warn!(check = %check.name(), error = %format!("{:#}", err), "Check errored");
                failures.push(format!("{}: {:#}", check.name(), err));
            }
        }
    }
    failures
}

/// The checks `stage` runs, configured from `config`.
///
/// Revert has none: it must work on whatever state a failed run left behind.
pub fn default_checks(config: &UpgradeConfig, stage: Stage) -> Vec<Box<dyn Check>> {
    let paths = &config.paths;
    match stage {
        Stage::Start => vec![
            Box::new(DistroIs::centos7(&paths.os_release)),
            Box::new(ConversionToolInstalled::new(&config.conversion.tool)),
            Box::new(AvailableSpace::new(
                &config.checks.space_probe_path,
                config.checks.required_space_bytes,
            )),
            Box::new(RedHatKernelInstalled::new(&paths.rpm)),
            Box::new(LastInstalledKernelInUse::new(&paths.rpm, &paths.uname)),
            Box::new(KernelNamedNics::new(&paths.sys_class_net)),
            Box::new(LocalRepositories::new(&paths.repos_dir)),
            Box::new(DuplicateRepositories::new(&paths.repos_dir)),
            Box::new(OutdatedLetsencryptRepo::new(&paths.repos_dir)),
            Box::new(PackagesUpToDate::new(&paths.yum)),
        ],
        Stage::Finish => vec![Box::new(DistroIs::almalinux8(&paths.os_release))],
        Stage::Revert => Vec::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// Key/value pairs of an os-release(5) file, quotes stripped.
pub fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// The running distribution, as named by `/etc/os-release`.
///
/// `version` matches `VERSION_ID` exactly or as its leading component, so
/// `8` accepts `8.9`.
pub struct DistroIs {
    os_release: PathBuf,
    id: &'static str,
    version: &'static str,
    label: &'static str,
    reason: &'static str,
    found: Option<String>,
}

impl DistroIs {
    pub fn centos7(os_release: impl Into<PathBuf>) -> Self {
        Self {
            os_release: os_release.into(),
            id: "centos",
            version: "7",
            label: "CentOS 7",
            reason: "The conversion can only be started on CentOS 7.",
            found: None,
        }
    }

    pub fn almalinux8(os_release: impl Into<PathBuf>) -> Self {
        Self {
            os_release: os_release.into(),
            id: "almalinux",
            version: "8",
            label: "AlmaLinux 8",
            reason: "The finalization stage can only be started on AlmaLinux 8.",
            found: None,
        }
    }

    fn version_matches(&self, version_id: &str) -> bool {
        version_id == self.version
            || version_id
                .strip_prefix(self.version)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false)
    }
}

impl Check for DistroIs {
    fn name(&self) -> &str {
        "checking the running distribution"
    }

    fn description(&self) -> String {
        format!(
            "You are running a distribution other than {} ({}). {}",
            self.label,
            self.found.as_deref().unwrap_or("unknown"),
            self.reason
        )
    }

    fn run(&mut self, _host: &Host) -> Result<bool> {
        let content = fs::read_to_string(&self.os_release)
            .with_context(|| format!("reading '{}'", self.os_release.display()))?;
        let release = parse_os_release(&content);
        let id = release.get("ID").map(String::as_str).unwrap_or_default();
        let version_id = release
            .get("VERSION_ID")
            .map(String::as_str)
            .unwrap_or_default();
        debug!(id, version_id, "Detected distribution");
        self.found = Some(
            release
                .get("PRETTY_NAME")
                .cloned()
                .unwrap_or_else(|| format!("{} {}", id, version_id)),
        );
        Ok(id == self.id && self.version_matches(version_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// Numeric components of a kernel release, with any leading package name
/// dropped: `kernel-3.10.0-1160.el7.x86_64` and `3.10.0-1160.el7.x86_64`
/// both give `[3, 10, 0, 1160]`.
pub fn kernel_version_key(release: &str) -> Vec<u64> {
    let start = release
        .char_indices()
        .find(|&(i, c)| c.is_ascii_digit() && (i == 0 || release[..i].ends_with('-')))
        .map(|(i, _)| i)
        .unwrap_or(release.len());
    release[start..]
        .split(['.', '-', '_'])
        .map_while(|part| part.parse::<u64>().ok())
        .collect()
}

fn query_kernels(host: &Host, rpm: &Path, packages: &[&str]) -> Result<Vec<String>> {
    let cmd = CommandLine::new(rpm)
        .args(["-q", "-a"])
        .args(packages.iter().copied());
    let output = host.runner().check_output(&cmd)?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// The conversion boots from the newest kernel; running an older one means a
/// pending reboot the conversion would take by surprise.
pub struct LastInstalledKernelInUse {
    rpm: PathBuf,
    uname: PathBuf,
    in_use: Option<String>,
    last_installed: Option<String>,
}

impl LastInstalledKernelInUse {
    pub fn new(rpm: impl Into<PathBuf>, uname: impl Into<PathBuf>) -> Self {
        Self {
            rpm: rpm.into(),
            uname: uname.into(),
            in_use: None,
            last_installed: None,
        }
    }
}

impl Check for LastInstalledKernelInUse {
    fn name(&self) -> &str {
        "checking if the last installed kernel is in use"
    }

    fn description(&self) -> String {
        match (&self.in_use, &self.last_installed) {
            (Some(in_use), Some(last)) => format!(
                "The last installed kernel is not in use. The kernel version in use is '{}'. \
                 The last installed kernel version is '{}'. \
                 Reboot the system to use the last installed kernel.",
                in_use, last
            ),
            _ => "There is no appropriate kernel package installed. To proceed with the \
                  conversion, install a kernel by running: \
                  'yum install kernel kernel-tools kernel-tools-libs'"
                .to_string(),
        }
    }

    fn run(&mut self, host: &Host) -> Result<bool> {
        let installed = query_kernels(
            host,
            &self.rpm,
            &["kernel", "kernel-plus", "kernel-rt-core"],
        )?;
        debug!(kernels = %installed.join(", "), "Installed kernels");
        let Some(last) = installed.into_iter().max_by_key(|k| kernel_version_key(k)) else {
            self.in_use = None;
            self.last_installed = None;
            return Ok(false);
        };

        let in_use = host
            .runner()
            .check_output(&CommandLine::new(&self.uname).arg("-r"))?
            .trim()
            .to_string();
        let passes = kernel_version_key(&in_use) == kernel_version_key(&last);
        self.in_use = Some(in_use);
        self.last_installed = Some(last);
        Ok(passes)
    }
}

/// The conversion only knows how to replace the distribution's own kernel.
pub struct RedHatKernelInstalled {
    rpm: PathBuf,
}

impl RedHatKernelInstalled {
    pub fn new(rpm: impl Into<PathBuf>) -> Self {
        Self { rpm: rpm.into() }
    }
}

impl Check for RedHatKernelInstalled {
    fn name(&self) -> &str {
        "checking if the Red Hat kernel is installed"
    }

    fn description(&self) -> String {
        "No Red Hat signed kernel is installed. Install one with \
         'yum install kernel kernel-tools kernel-tools-libs', make it the default boot entry \
         with grub2-set-default, regenerate the grub configuration with \
         'grub2-mkconfig -o /boot/grub2/grub.cfg' and reboot."
            .to_string()
    }

    fn run(&mut self, host: &Host) -> Result<bool> {
        Ok(!query_kernels(host, &self.rpm, &["kernel", "kernel-rt"])?.is_empty())
    }
}

/// Packages pending an update would be upgraded twice, once by yum and once
/// by the conversion.
pub struct PackagesUpToDate {
    yum: PathBuf,
}

impl PackagesUpToDate {
    pub fn new(yum: impl Into<PathBuf>) -> Self {
        Self { yum: yum.into() }
    }
}

impl Check for PackagesUpToDate {
    fn name(&self) -> &str {
        "checking if all packages are up to date"
    }

    fn description(&self) -> String {
        "There are packages which are not up to date. \
         Run 'yum update -y && reboot' to update them."
            .to_string()
    }

    fn run(&mut self, host: &Host) -> Result<bool> {
        let runner = host.runner();
        runner.check_call(&CommandLine::new(&self.yum).args(["clean", "all"]))?;
        // check-update exits 100 when updates are available.
        runner.succeeds(&CommandLine::new(&self.yum).arg("check-update"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────

pub struct ConversionToolInstalled {
    tool: PathBuf,
}

impl ConversionToolInstalled {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Check for ConversionToolInstalled {
    fn name(&self) -> &str {
        "checking if the conversion tool is installed"
    }

    fn description(&self) -> String {
        format!(
            "'{}' was not found. Install the leapp packages and try again.",
            self.tool.display()
        )
    }

    fn run(&mut self, _host: &Host) -> Result<bool> {
        Ok(command_exists(&self.tool))
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// Free space where the conversion tool stages the target filesystem.
pub struct AvailableSpace {
    path: PathBuf,
    required: u64,
    available: Option<u64>,
}

impl AvailableSpace {
    pub fn new(path: impl Into<PathBuf>, required: u64) -> Self {
        Self {
            path: path.into(),
            required,
            available: None,
        }
    }
}

impl Check for AvailableSpace {
    fn name(&self) -> &str {
        "checking available space"
    }

    fn description(&self) -> String {
        format!(
            "There is insufficient disk space available. At least {} of free space is required \
             on the disk where '{}' is located. Available space: {}. \
             Free up enough disk space and try again.",
            humanize_size(self.required),
            self.path.display(),
            self.available
                .map(humanize_size)
                .unwrap_or_else(|| "unknown".to_string())
        )
    }

    fn run(&mut self, _host: &Host) -> Result<bool> {
        let available = available_space(&self.path)?;
        self.available = Some(available);
        Ok(available >= self.required)
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn available_space(path: &Path) -> Result<u64> {
    fs2::available_space(path)
        .with_context(|| format!("querying free space of '{}'", path.display()))
}

pub fn humanize_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{} B", bytes)
}

// ─────────────────────────────────────────────────────────────────────────────

/// More than one `ethN` interface may be renamed by the conversion.
pub struct KernelNamedNics {
    sys_class_net: PathBuf,
    found: Vec<String>,
}

impl KernelNamedNics {
    pub fn new(sys_class_net: impl Into<PathBuf>) -> Self {
        Self {
            sys_class_net: sys_class_net.into(),
            found: Vec::new(),
        }
    }

    fn is_kernel_name(name: &str) -> bool {
        name.strip_prefix("eth")
            .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    }
}

impl Check for KernelNamedNics {
    fn name(&self) -> &str {
        "checking if there is more than one NIC using kernel names"
    }

    fn description(&self) -> String {
        format!(
            "The system has network interfaces using kernel names (ethX). \
             Their names are not guaranteed to survive the conversion. \
             Give those interfaces persistent names (enpXsY) to proceed. Interfaces: {}",
            self.found.join(", ")
        )
    }

    fn run(&mut self, _host: &Host) -> Result<bool> {
        // Nothing to inspect, nothing to block on.
        if !self.sys_class_net.is_dir() {
            return Ok(true);
        }
        let entries = fs::read_dir(&self.sys_class_net)
            .with_context(|| format!("reading '{}'", self.sys_class_net.display()))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("reading '{}'", self.sys_class_net.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_kernel_name(&name) {
                found.push(name);
            }
        }
        found.sort();
        self.found = found;
        Ok(self.found.len() <= 1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// Shipped by default on CentOS 7 and tolerated by the conversion tool.
const MEDIA_REPO_FILE: &str = "CentOS-Media.repo";

fn repo_files(repos_dir: &Path) -> Result<Vec<PathBuf>> {
    files::find_files_case_insensitive(repos_dir, &["*.repo"])
}

fn uses_local_storage(content: &str) -> bool {
    content.lines().any(|line| {
        let Some((key, value)) = line.split_once('=') else {
            return false;
        };
        matches!(key.trim(), "baseurl" | "metalink" | "mirrorlist")
            && value.trim_start().starts_with("file:")
    })
}

pub struct LocalRepositories {
    repos_dir: PathBuf,
    found: Vec<PathBuf>,
}

impl LocalRepositories {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            found: Vec::new(),
        }
    }
}

impl Check for LocalRepositories {
    fn name(&self) -> &str {
        "checking if a local repository is present"
    }

    fn description(&self) -> String {
        format!(
            "Repositories with local storage are not supported by the conversion tool. \
             Remove them to proceed. Files defining local repositories: {}",
            join_paths(&self.found)
        )
    }

    fn run(&mut self, _host: &Host) -> Result<bool> {
        let mut found = Vec::new();
        for path in repo_files(&self.repos_dir)? {
            if path.file_name().and_then(|n| n.to_str()) == Some(MEDIA_REPO_FILE) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading '{}'", path.display()))?;
            if uses_local_storage(&content) {
                found.push(path);
            }
        }
        self.found = found;
        Ok(self.found.is_empty())
    }
}

pub struct DuplicateRepositories {
    repos_dir: PathBuf,
    duplicates: Vec<String>,
}

impl DuplicateRepositories {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            duplicates: Vec::new(),
        }
    }
}

impl Check for DuplicateRepositories {
    fn name(&self) -> &str {
        "checking if there are duplicate repositories"
    }

    fn description(&self) -> String {
        format!(
            "There are duplicate repositories present: {}. Remove the duplicates to proceed.",
            self.duplicates.join(", ")
        )
    }

    fn run(&mut self, _host: &Host) -> Result<bool> {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for path in repo_files(&self.repos_dir)? {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading '{}'", path.display()))?;
            for line in content.lines().map(str::trim) {
                if line.starts_with('[') && line.ends_with(']') {
                    *seen.entry(line.to_string()).or_default() += 1;
                }
            }
        }
        self.duplicates = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id)
            .collect();
        Ok(self.duplicates.is_empty())
    }
}

/// Repository files left behind by old releases of the Let's Encrypt
/// extension; their packages block the conversion.
pub const OUTDATED_LETSENCRYPT_REPOS: &[&str] =
    &["plesk-letsencrypt.repo", "plesk-ext-letsencrypt.repo"];

pub struct OutdatedLetsencryptRepo {
    repos_dir: PathBuf,
    found: Option<PathBuf>,
}

impl OutdatedLetsencryptRepo {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            found: None,
        }
    }
}

impl Check for OutdatedLetsencryptRepo {
    fn name(&self) -> &str {
        "checking if outdated repository for letsencrypt extension is used"
    }

    fn description(&self) -> String {
        let path = self
            .found
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        format!(
            "An outdated repository for the letsencrypt extension is used. \
             Update the extension from the Plesk web interface, remove the packages \
             plesk-letsencrypt-pre plesk-py27-pip plesk-py27-setuptools plesk-py27-virtualenv \
             plesk-wheel-cffi plesk-wheel-cryptography plesk-wheel-psutil, then remove {}",
            path
        )
    }

    fn run(&mut self, _host: &Host) -> Result<bool> {
        self.found = OUTDATED_LETSENCRYPT_REPOS
            .iter()
            .map(|name| self.repos_dir.join(name))
            .find(|path| path.exists());
        Ok(self.found.is_none())
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
