use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Execution backend used to confine script invocations.
///
/// The selection is made once per process, either through the `sandbox`
/// configuration key or the `CLIX_SANDBOX` environment variable, and is never
/// changed while a script runs.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SandboxBackend {
    /// Delegates execution to a container engine such as Docker or Podman.
    #[default]
    #[serde(alias = "docker")]
    #[strum(to_string = "container_engine", serialize = "docker")]
    ContainerEngine,
    /// Changes the child's filesystem root to a local or unpacked image.
    Chroot,
}

/// Errors encountered while parsing a [`SandboxBackend`] from text.
pub type SandboxBackendParseError = strum::ParseError;

/// Where the chroot backend fetches image filesystems from.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ImageSourceKind {
    /// Talks to the image registry directly; no container daemon needed.
    #[default]
    Registry,
    /// Pulls and exports through the configured container engine.
    Engine,
}
