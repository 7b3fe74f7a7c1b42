//! Execution under `chroot(2)` in a local or unpacked image root.
//!
//! Mounts and environment variables cannot be honoured here, so a script
//! declaring either is refused before anything is provisioned.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::unistd;
use tracing::debug;

use super::{RunOutcome, SANDBOX_TARGET, Sandbox, SandboxIo, launch};
use crate::error::SandboxError;
use crate::rootfs::{
    EngineImageSource, ImageSource, RegistryImageSource, RootFs, RootFsProvisioner,
};
use crate::script::ScriptConfig;

/// Runs scripts with their root directory changed to the image.
#[derive(Debug, Clone)]
pub struct ChrootSandbox<S = RegistryImageSource> {
    provisioner: RootFsProvisioner<S>,
}

impl ChrootSandbox<RegistryImageSource> {
    /// Creates the backend pulling images straight from their registries.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Registry`] if the HTTP client cannot be set up.
    pub fn with_registry() -> Result<Self, SandboxError> {
        Ok(Self::new(RootFsProvisioner::new(RegistryImageSource::new()?)))
    }
}

impl ChrootSandbox<EngineImageSource> {
    /// Creates the backend pulling and exporting images through `engine`.
    #[must_use]
    pub fn with_engine(engine: &str) -> Self {
        Self::new(RootFsProvisioner::new(EngineImageSource::new(engine)))
    }
}

impl<S> ChrootSandbox<S> {
    /// Creates the backend with an explicit provisioner.
    #[must_use]
    pub const fn new(provisioner: RootFsProvisioner<S>) -> Self {
        Self { provisioner }
    }
}

impl<S: ImageSource + Sync> Sandbox for ChrootSandbox<S> {
    fn run(
        &self,
        config: &ScriptConfig,
        args: &[String],
        streams: SandboxIo,
    ) -> Result<RunOutcome, SandboxError> {
        let image = config.image().ok_or(SandboxError::MissingRoot)?;
        reject_unsupported(config)?;
        let (program, rest) = command_line(config, args)?;

        let root = self.provisioner.prepare(image)?;
        let outcome = spawn_in_root(&root, program, rest, streams);
        root.release();
        outcome
    }
}

fn reject_unsupported(config: &ScriptConfig) -> Result<(), SandboxError> {
    if !config.mounts.is_empty() {
        return Err(SandboxError::UnsupportedFeature { feature: "mounts" });
    }
    if !config.env.is_empty() {
        return Err(SandboxError::UnsupportedFeature {
            feature: "environment variables",
        });
    }
    Ok(())
}

/// The entrypoint with all arguments, or else the first argument as the
/// program.
fn command_line<'a>(
    config: &'a ScriptConfig,
    args: &'a [String],
) -> Result<(&'a str, &'a [String]), SandboxError> {
    if let Some(entrypoint) = config.entrypoint() {
        return Ok((entrypoint, args));
    }
    args.split_first()
        .map(|(program, rest)| (program.as_str(), rest))
        .ok_or(SandboxError::MissingCommand)
}

fn spawn_in_root(
    root: &RootFs,
    program: &str,
    args: &[String],
    streams: SandboxIo,
) -> Result<RunOutcome, SandboxError> {
    let root_path = CString::new(root.path().as_os_str().as_bytes()).map_err(|error| {
        SandboxError::Launch {
            program: program.to_owned(),
            source: io::Error::new(io::ErrorKind::InvalidInput, error),
        }
    })?;
    debug!(
        target: SANDBOX_TARGET,
        root = %root.path().display(),
        program,
        "launching chrooted process"
    );

    let mut command = Command::new(program);
    command.args(args);
    // SAFETY: the hook runs between fork and exec and only calls chroot(2)
    // and chdir(2) on a path allocated before the fork.
    unsafe {
        command.pre_exec(move || {
            unistd::chroot(root_path.as_c_str())?;
            unistd::chdir(c"/")?;
            Ok(())
        });
    }
    launch(program, &mut command, streams)
}
