//! Command-line interface definition for `clix`.
//!
//! Shared by the runtime parser and the build script that renders the manual
//! page, so it must not depend on anything outside `clap`.

use std::path::PathBuf;

use clap::Parser;

/// Runs the tool described by a YAML script, usually inside a sandbox.
///
/// Configuration flags (`--sandbox`, `--engine`, `--vcs`, `--log-filter`,
/// `--log-format`, `--config-path`) must come before the script path.
/// Everything after the script path is passed to the script untouched.
#[derive(Parser, Debug)]
#[command(name = "clix", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Path to the script describing the tool to run.
    #[arg(value_name = "SCRIPT")]
    pub(crate) script: PathBuf,
    /// Arguments forwarded to the script's program.
    #[arg(
        value_name = "ARG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) arguments: Vec<String>,
}
