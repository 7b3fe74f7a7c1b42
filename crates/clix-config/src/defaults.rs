use crate::backend::{ImageSourceKind, SandboxBackend};
use crate::logging::LogFormat;

/// Container engine binary used when none is configured.
pub const DEFAULT_ENGINE: &str = "docker";

/// Version-control binary used when none is configured.
pub const DEFAULT_VCS: &str = "git";

/// Default log filter expression used by the binary.
///
/// Diagnostics stay quiet unless something needs attention so the sandboxed
/// program's own output is not drowned out.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Default container engine binary.
pub fn default_engine() -> &'static str {
    DEFAULT_ENGINE
}

/// Owned engine name used where allocation is required (e.g. serde).
pub fn default_engine_string() -> String {
    DEFAULT_ENGINE.to_string()
}

/// Default version-control binary.
pub fn default_vcs() -> &'static str {
    DEFAULT_VCS
}

/// Owned version-control binary name used where allocation is required.
pub fn default_vcs_string() -> String {
    DEFAULT_VCS.to_string()
}

/// Default log filter expression used by the binary.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binary.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default sandbox backend.
pub fn default_sandbox_backend() -> SandboxBackend {
    SandboxBackend::ContainerEngine
}

/// Default source of chroot image filesystems.
pub fn default_image_source() -> ImageSourceKind {
    ImageSourceKind::Registry
}
