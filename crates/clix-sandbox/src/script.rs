//! Resolved description of one sandboxed execution.

use serde::{Deserialize, Serialize};

/// Image, entrypoint, mounts and environment for a single run.
///
/// The configuration is built by the script loader and is not modified once
/// it has been handed to a [`Sandbox`](crate::Sandbox).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    /// Image reference, or a local directory for the chroot backend.
    #[serde(default)]
    pub image: Option<String>,
    /// Program overriding the image's default entrypoint.
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Bind mounts in declaration order.
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// Environment variables in declaration order.
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl ScriptConfig {
    /// Creates a configuration that runs `image` with no extras.
    #[must_use]
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Self::default()
        }
    }

    /// Sets the entrypoint override.
    #[must_use]
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Appends a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Appends an environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Image reference, treating an empty string as absent.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref().filter(|image| !image.is_empty())
    }

    /// Entrypoint override, treating an empty string as absent.
    #[must_use]
    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref().filter(|entry| !entry.is_empty())
    }
}

/// A declared host-to-sandbox path binding.
///
/// `host_path` may carry the `${cacheDir}` token, the `git.repoRoot(cwd)`
/// sentinel or a leading `~`. See [`MountResolver`](crate::MountResolver).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSpec {
    /// Path on the host.
    pub host_path: String,
    /// Path inside the sandbox; defaults to the resolved host path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_path: Option<String>,
}

impl MountSpec {
    /// Binds `host_path` at the same location inside the sandbox.
    #[must_use]
    pub fn new(host_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            sandbox_path: None,
        }
    }

    /// Binds `host_path` at `sandbox_path`.
    #[must_use]
    pub fn bind(host_path: impl Into<String>, sandbox_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            sandbox_path: Some(sandbox_path.into()),
        }
    }
}

/// A name/value pair exported into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}
