//! Configuration loading helpers for the `clix` CLI.
//!
//! Configuration flags are only recognised before the script path. The
//! leading run of known flags is handed to `ortho-config`; everything from
//! the script path onwards belongs to the script.

use std::ffi::{OsStr, OsString};

use clix_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `clix_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--sandbox",
    "--image-source",
    "--engine",
    "--vcs",
    "--log-filter",
    "--log-format",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the filtered configuration arguments.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if flag.starts_with("--") && CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Result of separating configuration flags from the script invocation.
pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the recognised configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Program name followed by the script path and its arguments.
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_arguments: Vec::new(),
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut remaining = rest.iter();
    let mut command_arguments = vec![program.clone()];
    while let Some(argument) = remaining.next() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                if needs_value {
                    config_arguments.extend(remaining.next().cloned());
                }
            }
            FlagAction::Stop => {
                command_arguments.push(argument.clone());
                break;
            }
        }
    }
    command_arguments.extend(remaining.cloned());

    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}
