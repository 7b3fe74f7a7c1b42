//! Argument vectors for container engine runs.

use crate::digest::ImageAddresser;
use crate::error::SandboxError;
use crate::mounts::{self, MountResolver};
use crate::script::ScriptConfig;

/// Builds `run` argument vectors for a container engine.
///
/// The vector has the shape
/// `run -i [-t] [-v host:guest]* [-e NAME=VALUE]* -w <cwd> [--entrypoint E] <image> [args...]`.
/// The image digest is only requested from the addresser when a mount uses
/// the cache directory token.
#[derive(Debug, Clone)]
pub struct InvocationBuilder<A> {
    resolver: MountResolver,
    addresser: A,
}

impl<A> InvocationBuilder<A> {
    /// Creates a builder resolving mounts with `resolver` and digests with
    /// `addresser`.
    #[must_use]
    pub const fn new(resolver: MountResolver, addresser: A) -> Self {
        Self {
            resolver,
            addresser,
        }
    }

    /// The mount resolver in use.
    #[must_use]
    pub const fn resolver(&self) -> &MountResolver {
        &self.resolver
    }
}

impl<A: ImageAddresser> InvocationBuilder<A> {
    /// Builds the argument vector for running `config` with `args`.
    ///
    /// `interactive` adds the pseudo-terminal flag; standard input is always
    /// attached.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::MissingImage`] without an image, the
    /// addresser's error if a digest is needed and cannot be found, and any
    /// mount resolution error.
    pub fn build(
        &self,
        config: &ScriptConfig,
        args: &[String],
        interactive: bool,
    ) -> Result<Vec<String>, SandboxError> {
        let image = config.image().ok_or(SandboxError::MissingImage)?;
        let digest = if mounts::needs_digest(&config.mounts) {
            Some(self.addresser.digest(image)?)
        } else {
            None
        };
        let resolved = self.resolver.resolve(&config.mounts, digest.as_ref())?;

        let mut argv = vec![String::from("run"), String::from("-i")];
        if interactive {
            argv.push(String::from("-t"));
        }
        for mount in &resolved {
            argv.push(String::from("-v"));
            argv.push(mount.bind_argument());
        }
        for var in &config.env {
            argv.push(String::from("-e"));
            argv.push(format!("{}={}", var.name, var.value));
        }
        argv.push(String::from("-w"));
        argv.push(self.resolver.cwd().to_string());
        if let Some(entrypoint) = config.entrypoint() {
            argv.push(String::from("--entrypoint"));
            argv.push(entrypoint.to_owned());
        }
        argv.push(image.to_owned());
        argv.extend(args.iter().cloned());
        Ok(argv)
    }
}
