//! The conversion itself, delegated to the external conversion tool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use super::{Action, Host};
use crate::config::ConversionConfig;
use crate::process::CommandLine;

/// Runs the tool's analysis phase, then the apply phase.
///
/// There is no revert: once the tool starts rewriting the system, undoing it
/// is outside this pipeline's reach.
#[derive(Debug, Clone)]
pub struct DoConvert {
    tool: PathBuf,
    analyze_args: Vec<String>,
    apply_args: Vec<String>,
}

impl DoConvert {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            tool: config.tool.clone(),
            analyze_args: config.analyze_args.clone(),
            apply_args: config.apply_args.clone(),
        }
    }

    fn analyze_command(&self) -> CommandLine {
        CommandLine::new(&self.tool).args(self.analyze_args.iter().cloned())
    }

    fn apply_command(&self) -> CommandLine {
        CommandLine::new(&self.tool).args(self.apply_args.iter().cloned())
    }
}

impl Action for DoConvert {
    fn name(&self) -> &str {
        "do conversion"
    }

    fn prepare(&self, host: &Host) -> Result<()> {
        info!(tool = %self.tool.display(), "Analyzing host for conversion");
        host.runner()
            .check_call(&self.analyze_command())
            .context("conversion analysis failed")?;

        info!(tool = %self.tool.display(), "Applying conversion");
        host.runner()
            .check_call(&self.apply_command())
            .context("conversion failed")?;
        Ok(())
    }
}
