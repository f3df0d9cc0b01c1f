//! External command execution.
//!
//! Every side effect on the host that is not a plain file write goes through
//! a [`CommandRunner`], so actions can be exercised against a fake host.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::Result;
use tracing::{debug, info};

use crate::error::CommandError;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program file name, e.g. `systemctl` for `/usr/bin/systemctl`.
    pub fn program_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Runs external commands on the host.
pub trait CommandRunner {
    /// Run to completion; any non-zero exit is an error.
    fn check_call(&self, cmd: &CommandLine) -> Result<()>;

    /// Run to completion and return stdout; any non-zero exit is an error.
    fn check_output(&self, cmd: &CommandLine) -> Result<String>;

    /// Run to completion and report whether it exited with status 0.
    ///
    /// Only failure to spawn is an error.
    fn succeeds(&self, cmd: &CommandLine) -> Result<bool>;
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn output(cmd: &CommandLine) -> Result<Output, CommandError> {
        Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .map_err(|source| CommandError::Spawn {
                command: cmd.to_string(),
                source,
            })
    }

    fn log_streams(cmd: &CommandLine, output: &Output) {
        let program = cmd.program_name();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(target: "distro_upgrader::process", "{}: {}", program, line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!(target: "distro_upgrader::process", "{} (stderr): {}", program, line);
        }
    }
}

fn check_status(cmd: &CommandLine, output: &Output) -> Result<(), CommandError> {
    if output.status.success() {
        return Ok(());
    }
    match output.status.code() {
        Some(code) => Err(CommandError::Failed {
            command: cmd.to_string(),
            code,
            stderr: stderr_tail(&output.stderr),
        }),
        None => Err(CommandError::Terminated {
            command: cmd.to_string(),
        }),
    }
}

/// Last few lines of stderr, enough to identify the failure in a log line.
fn stderr_tail(stderr: &[u8]) -> String {
    const TAIL_LINES: usize = 5;
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    lines[start..].join("\n")
}

impl CommandRunner for SystemRunner {
    fn check_call(&self, cmd: &CommandLine) -> Result<()> {
        info!(command = %cmd, "Running");
        let output = Self::output(cmd)?;
        Self::log_streams(cmd, &output);
        check_status(cmd, &output)?;
        Ok(())
    }

    fn check_output(&self, cmd: &CommandLine) -> Result<String> {
        debug!(command = %cmd, "Running");
        let output = Self::output(cmd)?;
        check_status(cmd, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn succeeds(&self, cmd: &CommandLine) -> Result<bool> {
        debug!(command = %cmd, "Checking exit status");
        let output = Self::output(cmd)?;
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_display_quotes_whitespace() {
        let cmd = CommandLine::new("/usr/sbin/plesk")
            .args(["sbin", "spammng"])
            .arg("two words");
        assert_eq!(cmd.to_string(), "/usr/sbin/plesk sbin spammng 'two words'");
        assert_eq!(cmd.program_name(), "plesk");
    }

    #[test]
    fn test_system_runner_success_and_output() {
        let runner = SystemRunner;
        runner
            .check_call(&CommandLine::new("sh").args(["-c", "exit 0"]))
            .unwrap();
        let out = runner
            .check_output(&CommandLine::new("sh").args(["-c", "echo hello"]))
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_system_runner_nonzero_exit_is_classified() {
        let runner = SystemRunner;
        let err = runner
            .check_call(&CommandLine::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .unwrap_err();
        match err.downcast_ref::<CommandError>() {
            Some(CommandError::Failed { code, stderr, .. }) => {
                assert_eq!(*code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_system_runner_missing_program() {
        let runner = SystemRunner;
        let err = runner
            .check_call(&CommandLine::new("/definitely/not/a/real/program"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CommandError>(),
            Some(CommandError::Spawn { .. })
        ));
    }

    #[test]
    fn test_succeeds_reports_exit_status() {
        let runner = SystemRunner;
        assert!(runner.succeeds(&CommandLine::new("true")).unwrap());
        assert!(!runner.succeeds(&CommandLine::new("false")).unwrap());
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let tail = stderr_tail(b"1\n2\n3\n4\n5\n6\n7\n");
        assert_eq!(tail, "3\n4\n5\n6\n7");
    }
}
