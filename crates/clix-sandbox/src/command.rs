//! Captured invocations of helper binaries such as the engine and `git`.

use std::path::Path;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::error::SandboxError;

const COMMAND_TARGET: &str = "clix_sandbox::command";

/// Runs `program args...` to completion with stdout and stderr captured.
///
/// Only a failure to start the process is an error here; callers decide what
/// a non-zero exit means.
///
/// # Errors
///
/// Returns [`SandboxError::ToolLaunch`] if the process cannot be spawned.
pub fn run_captured(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<Output, SandboxError> {
    debug!(target: COMMAND_TARGET, program, ?args, "running helper command");
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command
        .output()
        .map_err(|source| SandboxError::ToolLaunch {
            program: program.to_owned(),
            source,
        })
}

/// Runs `program args...` and returns its trimmed stdout on success.
///
/// # Errors
///
/// Returns [`SandboxError::ToolLaunch`] if the process cannot be spawned and
/// [`SandboxError::EngineCommand`] if it exits unsuccessfully.
pub fn stdout_of(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<String, SandboxError> {
    let output = run_captured(program, args, cwd)?;
    require_success(program, args, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// Converts an unsuccessful [`Output`] into [`SandboxError::EngineCommand`].
///
/// # Errors
///
/// Returns [`SandboxError::EngineCommand`] when `output.status` is not success.
pub fn require_success(program: &str, args: &[&str], output: &Output) -> Result<(), SandboxError> {
    if output.status.success() {
        return Ok(());
    }
    Err(SandboxError::EngineCommand {
        program: program.to_owned(),
        subcommand: args.first().copied().unwrap_or_default().to_owned(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}
