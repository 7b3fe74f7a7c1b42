//! Execution backends and the factory that selects one per process.
//!
//! Both backends run exactly one foreground child and wait for it. A child
//! that exits non-zero yields [`RunOutcome::FailedExit`]; only setup problems
//! are returned as [`SandboxError`].

use std::io::{self, IsTerminal};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};

use clix_config::{Config, ImageSourceKind, SandboxBackend};
use tracing::debug;

use crate::error::SandboxError;
use crate::script::ScriptConfig;

mod chroot;
mod engine;

pub use chroot::ChrootSandbox;
pub use engine::ContainerEngineSandbox;

const SANDBOX_TARGET: &str = "clix_sandbox::sandbox";

/// Exit code base for children terminated by a signal, as shells report it.
const SIGNAL_EXIT_BASE: i32 = 128;

/// A way of running a script's program in isolation.
pub trait Sandbox {
    /// Runs `config` with the trailing `args`, wired to `streams`.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] if the run cannot be set up or the child
    /// cannot be started. A child that runs and fails is not an error.
    fn run(
        &self,
        config: &ScriptConfig,
        args: &[String],
        streams: SandboxIo,
    ) -> Result<RunOutcome, SandboxError>;
}

/// Selects the backend named by `config`.
///
/// # Errors
///
/// Returns [`SandboxError::CurrentDirectory`] or [`SandboxError::NonUtf8Path`]
/// if the container engine backend cannot read the working directory, and
/// [`SandboxError::Registry`] if the chroot backend's registry client cannot
/// be set up.
pub fn sandbox_for(config: &Config) -> Result<Box<dyn Sandbox>, SandboxError> {
    debug!(
        target: SANDBOX_TARGET,
        backend = %config.sandbox(),
        image_source = %config.image_source(),
        "selecting sandbox backend"
    );
    match (config.sandbox(), config.image_source()) {
        (SandboxBackend::ContainerEngine, _) => {
            Ok(Box::new(ContainerEngineSandbox::from_config(config)?))
        }
        (SandboxBackend::Chroot, ImageSourceKind::Registry) => {
            Ok(Box::new(ChrootSandbox::with_registry()?))
        }
        (SandboxBackend::Chroot, ImageSourceKind::Engine) => {
            Ok(Box::new(ChrootSandbox::with_engine(config.engine())))
        }
    }
}

/// Standard streams handed to the sandboxed child.
#[derive(Debug)]
pub struct SandboxIo {
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    interactive: bool,
}

impl SandboxIo {
    /// Inherits the caller's streams.
    ///
    /// The run is interactive when standard input is a terminal.
    #[must_use]
    pub fn inherit() -> Self {
        Self {
            stdin: Stdio::inherit(),
            stdout: Stdio::inherit(),
            stderr: Stdio::inherit(),
            interactive: io::stdin().is_terminal(),
        }
    }

    /// Uses explicit streams for a non-interactive run.
    #[must_use]
    pub const fn new(stdin: Stdio, stdout: Stdio, stderr: Stdio) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            interactive: false,
        }
    }

    /// Overrides terminal detection.
    #[must_use]
    pub const fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Whether a pseudo-terminal should be requested.
    #[must_use]
    pub const fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// Terminal state of a run whose child was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The child exited with status 0.
    Succeeded,
    /// The child exited non-zero or was killed by a signal.
    FailedExit {
        /// Exit code to propagate; `128 + signal` for signalled children.
        code: i32,
    },
}

impl RunOutcome {
    /// Maps a child's exit status onto an outcome.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Succeeded,
            Some(code) => Self::FailedExit { code },
            None => Self::FailedExit {
                code: SIGNAL_EXIT_BASE + status.signal().unwrap_or_default(),
            },
        }
    }

    /// Exit code the caller should terminate with.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::FailedExit { code } => code,
        }
    }

    /// Returns `true` for [`RunOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Runs `command` to completion with `streams` attached.
pub(crate) fn launch(
    program: &str,
    command: &mut Command,
    streams: SandboxIo,
) -> Result<RunOutcome, SandboxError> {
    let SandboxIo {
        stdin,
        stdout,
        stderr,
        ..
    } = streams;
    let status = command
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr)
        .status()
        .map_err(|source| SandboxError::Launch {
            program: program.to_owned(),
            source,
        })?;
    let outcome = RunOutcome::from_status(status);
    debug!(target: SANDBOX_TARGET, program, code = outcome.code(), "sandboxed process exited");
    Ok(outcome)
}
