//! Command-line runtime for `clix`.
//!
//! `clix [config flags] <script> [args...]` loads the script, optionally
//! builds its image from git, and then runs it through the configured
//! sandbox backend or the host Go toolchain. The script's exit status
//! becomes `clix`'s exit status; setup failures print one `clix: ...` line
//! and exit 1.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use clix_config::Config;
use clix_sandbox::{RunOutcome, SandboxIo, ScriptConfig, sandbox_for};
use tracing::debug;

mod cli;
mod config;
mod errors;
pub mod image_build;
pub mod script;
pub mod telemetry;
pub mod toolchain;

use cli::Cli;
use config::split_config_arguments;
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub use errors::AppError;
pub use script::Script;

const CLI_TARGET: &str = "clix_cli";

/// Runs the CLI with the process arguments and writers for help output and
/// diagnostics.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    match execute(args, stderr, loader) {
        Ok(outcome) => exit_code(outcome),
        Err(AppError::CliUsage(error))
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(stderr, "clix: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<I, E, L>(args: I, progress: &mut E, loader: &L) -> Result<RunOutcome, AppError>
where
    I: IntoIterator<Item = OsString>,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = Cli::try_parse_from(&split.command_arguments).map_err(AppError::CliUsage)?;
    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;

    let script = Script::load(&cli.script)?;
    debug!(target: CLI_TARGET, script = %cli.script.display(), "loaded script");
    dispatch(script, &cli.arguments, &config, progress)
}

/// Runs `script` as `clix` would: build, then image, then Go.
///
/// # Errors
///
/// Returns an [`AppError`] for any failure before the script's program
/// reports an exit status.
pub fn dispatch(
    mut script: Script,
    args: &[String],
    config: &Config,
    progress: &mut impl Write,
) -> Result<RunOutcome, AppError> {
    if let Some(build) = script.build.take() {
        let tag = image_build::ImageBuilder::from_config(config).build(&build, progress)?;
        script.image = Some(tag);
    }

    if script.image().is_some() {
        return run_sandboxed(config, &script.into_sandbox_config(), args);
    }

    if let Some(go) = script.go.take() {
        if script.mounts.is_empty() {
            return toolchain::GoToolchain::default().run(&go, args);
        }
        let (sandbox_config, argv) = go.containerised(script.into_sandbox_config(), args)?;
        return run_sandboxed(config, &sandbox_config, &argv);
    }

    Err(AppError::MissingConfiguration)
}

fn run_sandboxed(
    config: &Config,
    script: &ScriptConfig,
    args: &[String],
) -> Result<RunOutcome, AppError> {
    let sandbox = sandbox_for(config)?;
    Ok(sandbox.run(script, args, SandboxIo::inherit())?)
}

/// Maps a run outcome onto the process exit code.
#[must_use]
pub fn exit_code(outcome: RunOutcome) -> ExitCode {
    u8::try_from(outcome.code()).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[cfg(test)]
mod tests;
