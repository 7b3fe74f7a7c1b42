//! Delegation to a container engine such as Docker or Podman.

use std::process::Command;

use clix_config::Config;
use tracing::debug;

use super::{RunOutcome, SANDBOX_TARGET, Sandbox, SandboxIo, launch};
use crate::digest::{EngineAddresser, ImageAddresser};
use crate::error::SandboxError;
use crate::invocation::InvocationBuilder;
use crate::mounts::MountResolver;
use crate::script::ScriptConfig;

/// Runs scripts with `<engine> run`.
#[derive(Debug, Clone)]
pub struct ContainerEngineSandbox<A = EngineAddresser> {
    engine: String,
    builder: InvocationBuilder<A>,
}

impl ContainerEngineSandbox {
    /// Creates the backend from the configured engine and version-control
    /// binaries, resolving mounts against the current process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be read.
    pub fn from_config(config: &Config) -> Result<Self, SandboxError> {
        let resolver = MountResolver::from_environment(config.vcs())?;
        let addresser = EngineAddresser::new(config.engine());
        Ok(Self::new(
            config.engine(),
            InvocationBuilder::new(resolver, addresser),
        ))
    }
}

impl<A> ContainerEngineSandbox<A> {
    /// Creates the backend with an explicit engine binary and builder.
    #[must_use]
    pub fn new(engine: impl Into<String>, builder: InvocationBuilder<A>) -> Self {
        Self {
            engine: engine.into(),
            builder,
        }
    }
}

impl<A: ImageAddresser> Sandbox for ContainerEngineSandbox<A> {
    fn run(
        &self,
        config: &ScriptConfig,
        args: &[String],
        streams: SandboxIo,
    ) -> Result<RunOutcome, SandboxError> {
        let argv = self.builder.build(config, args, streams.is_interactive())?;
        debug!(target: SANDBOX_TARGET, engine = %self.engine, ?argv, "launching container engine");
        let mut command = Command::new(&self.engine);
        command.args(&argv);
        launch(&self.engine, &mut command, streams)
    }
}
