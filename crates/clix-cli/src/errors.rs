//! Error type for the CLI runtime.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clix_sandbox::SandboxError;
use thiserror::Error;

use crate::image_build::BuildError;
use crate::telemetry::TelemetryError;

/// Everything that stops `clix` before the script's program reports an exit
/// status. Each is printed as one line and exits with status 1.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration flags, files or environment variables are invalid.
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    /// The command line does not name a script.
    #[error("{0}")]
    CliUsage(clap::Error),
    /// Diagnostics could not be set up.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The script file could not be read.
    #[error("error reading script file {}: {source}", .path.display())]
    ReadScript {
        /// Script path as given.
        path: PathBuf,
        /// Underlying read error.
        #[source]
        source: io::Error,
    },
    /// The script file is not a valid script.
    #[error("error parsing script file {}: {source}", .path.display())]
    ParseScript {
        /// Script path as given.
        path: PathBuf,
        /// YAML error.
        #[source]
        source: serde_saphyr::Error,
    },
    /// The script names neither an image nor a Go package.
    #[error("script configuration missing (expected 'go' or 'image')")]
    MissingConfiguration,
    /// The `go` section does not name a package.
    #[error("'go.run' missing in script")]
    MissingGoPackage,
    /// Building the script's image failed.
    #[error("error building image: {0}")]
    Build(#[from] BuildError),
    /// The sandbox could not be set up or started.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    /// The Go toolchain could not be started.
    #[error("failed to run {program}: {source}")]
    Toolchain {
        /// Toolchain binary.
        program: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },
}
