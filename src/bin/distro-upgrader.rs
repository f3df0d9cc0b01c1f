use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use distro_upgrader::run_state::{self, RunManifest};
use distro_upgrader::{build_pipeline, preflight, Host, Orchestrator, Stage, UpgradeConfig};

mod logging;

#[derive(Parser)]
#[command(name = "distro-upgrader")]
#[command(version, about = "Upgrade a Plesk server from CentOS 7 to AlmaLinux 8", long_about = None)]
struct Cli {
    /// Stage to run; `finish` is started by the resume unit after the reboot
    #[arg(short = 's', long = "stage", value_enum, default_value_t = Stage::Start)]
    stage: Stage,

    /// Print the status of the last run and exit
    #[arg(long)]
    status: bool,

    /// Configuration file (default: /etc/distro-upgrader.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not reboot after the start or finish stage
    #[arg(long)]
    no_reboot: bool,

    /// Skip the preflight checks of the start and finish stages
    #[arg(long)]
    skip_checks: bool,

    /// Log debug output, including the output of external commands
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = UpgradeConfig::load(cli.config.as_deref())?;

    if cli.status {
        return print_status(&config);
    }

    logging::init(cli.verbose, &config.paths.log_file);

    let entry_point = std::env::current_exe()
        .and_then(|exe| exe.canonicalize())
        .context("resolving path of the running executable")?;
    info!(stage = %cli.stage, entry_point = %entry_point.display(), "distro-upgrader invoked");

    let checks = if cli.skip_checks {
        Vec::new()
    } else {
        preflight::default_checks(&config, cli.stage)
    };
    let host = Host::system(&config.systemd.systemctl);
    let steps = build_pipeline(&config, &entry_point);

    Orchestrator::new(host, steps, &config.paths.state_dir)
        .with_checks(cli.stage, checks)
        .with_reboot(!cli.no_reboot)
        .run(cli.stage)?;
    Ok(())
}

fn print_status(config: &UpgradeConfig) -> Result<()> {
    let pending = config.systemd.resume_unit_path().exists();
    match run_state::load_manifest(&config.paths.state_dir)? {
        None => println!("No upgrade has been run on this host."),
        Some(manifest) => print_manifest(&manifest),
    }
    println!(
        "Resume on next boot: {}",
        if pending { "pending" } else { "not scheduled" }
    );
    Ok(())
}

fn print_manifest(manifest: &RunManifest) {
    println!("Stage:    {}", manifest.stage);
    println!("Status:   {}", manifest.status);
    if let Some(action) = &manifest.current_action {
        println!("Action:   {}", action);
    }
    println!("Progress: {}%", manifest.progress_percent);
    println!("Started:  {}", manifest.started_at_utc);
    if let Some(finished) = &manifest.finished_at_utc {
        println!("Finished: {}", finished);
    }
    if let Some(error) = &manifest.error {
        println!("Error:    {}", error);
    }
}
