//! Classified failures the orchestrator and the binary inspect.
//!
//! Everything else travels as `anyhow::Error` with context attached at the
//! filesystem and process boundaries.

use std::fmt;
use std::io;

use crate::action::Phase;
use crate::pipeline::Stage;

/// Failure of an external command (service manager, conversion tool, ...).
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' exited with status {code}{}", stderr_suffix(.stderr))]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("'{command}' was terminated by a signal")]
    Terminated { command: String },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Outcome of the rollback that follows a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// The stage does not roll back (the revert stage itself).
    NotAttempted,
    /// Every reversible step that was reached has been reverted.
    Complete,
    /// At least one revert failed; the host needs manual attention.
    Incomplete,
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rollback::NotAttempted => write!(f, "no rollback attempted"),
            Rollback::Complete => write!(f, "changes rolled back"),
            Rollback::Incomplete => write!(f, "rollback incomplete, manual intervention required"),
        }
    }
}

/// Why a pipeline stage did not finish.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("preflight checks failed:\n{}", format_failures(.failures))]
    Preflight { failures: Vec<String> },

    #[error("{stage} stage failed at {phase} of '{action}' ({rollback})")]
    Action {
        stage: Stage,
        action: String,
        phase: Phase,
        rollback: Rollback,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("{stage} stage could not record its status")]
    Status {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("{stage} stage completed but the reboot could not be requested")]
    Reboot {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

fn format_failures(failures: &[String]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_command_message_includes_stderr() {
        let err = CommandError::Failed {
            command: "/usr/bin/systemctl stop a.service".into(),
            code: 5,
            stderr: "Unit a.service not loaded.\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "'/usr/bin/systemctl stop a.service' exited with status 5: Unit a.service not loaded."
        );
    }

    #[test]
    fn test_failed_command_message_without_stderr() {
        let err = CommandError::Failed {
            command: "leapp upgrade".into(),
            code: 1,
            stderr: "  ".into(),
        };
        assert_eq!(err.to_string(), "'leapp upgrade' exited with status 1");
    }

    #[test]
    fn test_preflight_lists_failures() {
        let err = StageError::Preflight {
            failures: vec!["checking available space".into(), "checking NICs".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("  - checking available space"));
        assert!(msg.contains("  - checking NICs"));
    }
}
