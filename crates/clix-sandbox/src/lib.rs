//! Sandbox provisioning and invocation for `clix` scripts.
//!
//! A [`ScriptConfig`] names an image, an optional entrypoint, bind mounts and
//! environment variables. A [`Sandbox`] runs it with one of two backends,
//! chosen once per process by [`sandbox_for`]:
//!
//! - [`ContainerEngineSandbox`] resolves mounts with a [`MountResolver`],
//!   builds a `run` argument vector with an [`InvocationBuilder`] and hands
//!   it to the engine binary.
//! - [`ChrootSandbox`] obtains a root directory from a [`RootFsProvisioner`],
//!   unpacking an image pulled from its registry (or exported by the engine)
//!   when needed, and runs the program with its root changed to it.
//!
//! ```rust,no_run
//! use clix_config::Config;
//! use clix_sandbox::{SandboxIo, ScriptConfig, sandbox_for};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sandbox = sandbox_for(&Config::default())?;
//! let config = ScriptConfig::for_image("alpine").with_entrypoint("echo");
//! let outcome = sandbox.run(&config, &[String::from("hello")], SandboxIo::inherit())?;
//! std::process::exit(outcome.code());
//! # }
//! ```
//!
//! A child that exits non-zero is reported as [`RunOutcome::FailedExit`]
//! rather than an error; callers decide how to terminate. Temporary roots are
//! removed before `run` returns, whatever the outcome.

pub mod command;
mod digest;
mod error;
mod invocation;
pub mod mounts;
pub mod rootfs;
mod sandbox;
mod script;

#[cfg(test)]
mod tests;

pub use self::digest::{EngineAddresser, ImageAddresser, ImageDigest};
pub use self::error::SandboxError;
pub use self::invocation::InvocationBuilder;
pub use self::mounts::{MountResolver, ResolvedMount};
pub use self::rootfs::{
    EngineImageSource, ImageReference, ImageSource, Platform, RegistryImageSource, RootFs,
    RootFsProvisioner,
};
pub use self::sandbox::{
    ChrootSandbox, ContainerEngineSandbox, RunOutcome, Sandbox, SandboxIo, sandbox_for,
};
pub use self::script::{EnvVar, MountSpec, ScriptConfig};
