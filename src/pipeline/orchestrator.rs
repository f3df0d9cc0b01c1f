use std::path::PathBuf;

use tracing::{error, info, warn};

use super::Stage;
use crate::action::{Host, Phase, Step};
use crate::error::{Rollback, StageError};
use crate::preflight::{self, Check};
use crate::run_state::{self, RunManifest, RunStatus};

/// Drives one stage of the pipeline against a host.
///
/// Holds no state across stages: every invocation is a fresh process, and a
/// failed stage is rolled back before this returns.
pub struct Orchestrator<'a> {
    host: Host<'a>,
    steps: Vec<Step>,
    checks: Vec<(Stage, Vec<Box<dyn Check>>)>,
    state_dir: PathBuf,
    reboot: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(host: Host<'a>, steps: Vec<Step>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            host,
            steps,
            checks: Vec::new(),
            state_dir: state_dir.into(),
            reboot: true,
        }
    }

    /// Preflight checks to run before `stage` changes anything.
    pub fn with_checks(mut self, stage: Stage, checks: Vec<Box<dyn Check>>) -> Self {
        self.checks.push((stage, checks));
        self
    }

    /// Whether to reboot after a successful start or finish stage.
    pub fn with_reboot(mut self, reboot: bool) -> Self {
        self.reboot = reboot;
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn run(&mut self, stage: Stage) -> Result<(), StageError> {
        let mut manifest = RunManifest::begin(stage).map_err(|e| StageError::Status {
            stage,
            source: e.into(),
        })?;
        run_state::write_manifest(&self.state_dir, &manifest).map_err(|e| {
            StageError::Status {
                stage,
                source: e.into(),
            }
        })?;
        info!(stage = %stage, steps = self.steps.len(), "Starting stage");

        let result = self.run_stage(stage, &mut manifest);

        let (status, message) = match &result {
            Ok(()) if stage == Stage::Revert => (RunStatus::Reverted, None),
            Ok(()) => (RunStatus::Success, None),
            Err(err) => (RunStatus::Failed, Some(error_chain(err))),
        };
        if let Err(err) = manifest.finish(status, message) {
            warn!(error = %format!("{:#}", err), "Could not timestamp run manifest");
        }
        self.record(&manifest);
        result?;

        info!(stage = %stage, "Stage completed");
        if self.reboot && stage.reboots() {
            info!("Rebooting");
            self.host
                .systemctl()
                .reboot()
                .map_err(|e| StageError::Reboot {
                    stage,
                    source: e.into(),
                })?;
        }
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, manifest: &mut RunManifest) -> Result<(), StageError> {
        let mut failures = Vec::new();
        for (check_stage, checks) in self.checks.iter_mut() {
            if *check_stage == stage {
                failures.extend(preflight::run_checks(checks, &self.host));
            }
        }
        if !failures.is_empty() {
            return Err(StageError::Preflight { failures });
        }

        let phase = stage.phase();
        let required = self.required_steps(stage)?;
        match stage {
            Stage::Start | Stage::Finish => self.run_forward(stage, phase, &required, manifest),
            Stage::Revert => self.run_revert(&required, manifest),
        }
    }

    /// Indices of the steps that apply to this host, in pipeline order.
    fn required_steps(&self, stage: Stage) -> Result<Vec<usize>, StageError> {
        let mut required = Vec::new();
        for (idx, step) in self.steps.iter().enumerate() {
            match step.is_required(&self.host) {
                Ok(true) => required.push(idx),
                Ok(false) => info!(action = %step.name(), "Skipping action, not required on this host"),
                Err(err) => {
                    return Err(StageError::Action {
                        stage,
                        action: step.name().to_string(),
                        phase: stage.phase(),
                        rollback: Rollback::NotAttempted,
                        source: err.into(),
                    })
                }
            }
        }
        Ok(required)
    }

    fn run_forward(
        &self,
        stage: Stage,
        phase: Phase,
        required: &[usize],
        manifest: &mut RunManifest,
    ) -> Result<(), StageError> {
        let total: u64 = required.iter().map(|&i| self.steps[i].estimate(phase)).sum();
        let mut done = 0;

        for (pos, &idx) in required.iter().enumerate() {
            let step = &self.steps[idx];
            manifest.current_action = Some(step.name().to_string());
            manifest.progress_percent = run_state::progress_percent(done, total);
            self.record(manifest);

            info!(action = %step.name(), phase = %phase, "Running action");
            if let Err(err) = step.run(phase, &self.host) {
                error!(
                    action = %step.name(),
                    phase = %phase,
                    error = %format!("{:#}", err),
                    "Action failed, rolling back"
                );
                // The failing step may have half-applied its change.
                let reached = match stage {
                    Stage::Start => &required[..=pos],
                    _ => required,
                };
                let rollback = self.rollback(reached);
                return Err(StageError::Action {
                    stage,
                    action: step.name().to_string(),
                    phase,
                    rollback,
                    source: err.into(),
                });
            }
            done += step.estimate(phase);
        }
        Ok(())
    }

    /// Revert the reversible steps among `reached`, last first. Keeps going
    /// past failures.
    fn rollback(&self, reached: &[usize]) -> Rollback {
        let mut complete = true;
        for &idx in reached.iter().rev() {
            let step = &self.steps[idx];
            if step.as_reversible().is_none() {
                continue;
            }
            info!(action = %step.name(), "Reverting action");
            if let Err(err) = step.run(Phase::Revert, &self.host) {
                complete = false;
                error!(
                    action = %step.name(),
                    error = %format!("{:#}", err),
                    "Revert failed, continuing rollback"
                );
            }
        }
        if complete {
            Rollback::Complete
        } else {
            Rollback::Incomplete
        }
    }

    fn run_revert(&self, required: &[usize], manifest: &mut RunManifest) -> Result<(), StageError> {
        let reversible: Vec<usize> = required
            .iter()
            .copied()
            .filter(|&i| self.steps[i].as_reversible().is_some())
            .collect();
        let total: u64 = reversible
            .iter()
            .map(|&i| self.steps[i].estimate(Phase::Revert))
            .sum();
        let mut done = 0;
        let mut first_failure = None;

        for &idx in reversible.iter().rev() {
            let step = &self.steps[idx];
            manifest.current_action = Some(step.name().to_string());
            manifest.progress_percent = run_state::progress_percent(done, total);
            self.record(manifest);

            info!(action = %step.name(), "Reverting action");
            if let Err(err) = step.run(Phase::Revert, &self.host) {
                error!(
                    action = %step.name(),
                    error = %format!("{:#}", err),
                    "Revert failed, continuing"
                );
                if first_failure.is_none() {
                    first_failure = Some((step.name().to_string(), err));
                }
            }
            done += step.estimate(Phase::Revert);
        }

        match first_failure {
            None => Ok(()),
            Some((action, err)) => Err(StageError::Action {
                stage: Stage::Revert,
                action,
                phase: Phase::Revert,
                rollback: Rollback::Incomplete,
                source: err.into(),
            }),
        }
    }

    /// Status writes are informational; a failure to write is only logged.
    fn record(&self, manifest: &RunManifest) {
        if let Err(err) = run_state::write_manifest(&self.state_dir, manifest) {
            warn!(error = %format!("{:#}", err), "Could not update run manifest");
        }
    }
}

fn error_chain(err: &StageError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}
