//! Shared configuration for the `clix` launcher.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults are
//! overridden by a `.clix.toml` file, which is overridden by `CLIX_*`
//! environment variables, which are in turn overridden by command-line flags.
//! The resolved [`Config`] is loaded once at startup and handed explicitly to
//! the sandbox factory so the execution core never reads ambient state.

mod backend;
mod defaults;
mod logging;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use backend::{ImageSourceKind, SandboxBackend, SandboxBackendParseError};
pub use defaults::{
    DEFAULT_ENGINE, DEFAULT_LOG_FILTER, DEFAULT_VCS, default_engine, default_engine_string,
    default_image_source, default_log_filter, default_log_filter_string, default_log_format,
    default_sandbox_backend, default_vcs, default_vcs_string,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration for one `clix` process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CLIX")]
pub struct Config {
    /// Backend used to run scripts that name an image.
    #[ortho_config(default = crate::defaults::default_sandbox_backend())]
    pub sandbox: SandboxBackend,
    /// Where the chroot backend fetches images that are not local directories.
    #[ortho_config(default = crate::defaults::default_image_source())]
    pub image_source: ImageSourceKind,
    /// Container engine binary (for example `docker` or `podman`).
    #[ortho_config(default = crate::defaults::default_engine_string())]
    pub engine: String,
    /// Version-control binary used for repository lookups and clones.
    #[ortho_config(default = crate::defaults::default_vcs_string())]
    pub vcs: String,
    /// Tracing filter expression applied to diagnostics.
    #[ortho_config(default = crate::defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for diagnostics.
    #[ortho_config(default = crate::defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox: default_sandbox_backend(),
            image_source: default_image_source(),
            engine: default_engine_string(),
            vcs: default_vcs_string(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Selected sandbox backend.
    pub fn sandbox(&self) -> SandboxBackend {
        self.sandbox
    }

    /// Selected source for chroot image filesystems.
    pub fn image_source(&self) -> ImageSourceKind {
        self.image_source
    }

    /// Container engine binary.
    pub fn engine(&self) -> &str {
        self.engine.as_str()
    }

    /// Version-control binary.
    pub fn vcs(&self) -> &str {
        self.vcs.as_str()
    }

    /// Tracing filter expression.
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Diagnostic output format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.sandbox(), SandboxBackend::ContainerEngine);
        assert_eq!(config.image_source(), ImageSourceKind::Registry);
        assert_eq!(config.engine(), default_engine());
        assert_eq!(config.vcs(), default_vcs());
        assert_eq!(config.log_filter(), default_log_filter());
        assert_eq!(config.log_format(), LogFormat::Compact);
    }
}
