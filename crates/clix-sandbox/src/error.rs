//! Domain errors raised while preparing or launching a sandboxed run.
//!
//! Every variant is a setup-time failure: the run is abandoned and the error
//! is reported once to the caller. A child that starts and then exits with a
//! non-zero status is not an error; it is reported through
//! [`RunOutcome`](crate::RunOutcome).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by mount resolution, image provisioning and process launch.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A mount references the cache directory token but no digest is known.
    #[error("mount '{mount}' uses the cache directory token but no image digest is available")]
    MissingDigest {
        /// Host path as declared in the script.
        mount: String,
    },

    /// The git-root token was used outside a repository.
    #[error("mount '{mount}' needs the repository root but {cwd} is not inside a git repository")]
    NotAGitRepo {
        /// Host path as declared in the script.
        mount: String,
        /// Directory the lookup ran from.
        cwd: PathBuf,
    },

    /// The container engine has no local image matching the reference.
    #[error("image not found locally: {image}")]
    ImageNotFound {
        /// Image reference that was queried.
        image: String,
    },

    /// The engine reported an identifier that is not a hex digest.
    #[error("image '{image}' reported an unusable digest '{digest}'")]
    InvalidDigest {
        /// Image reference that was queried.
        image: String,
        /// Raw identifier returned by the engine.
        digest: String,
    },

    /// An archive entry would land outside the extraction root.
    #[error("archive entry '{entry}' escapes the extraction root {root}")]
    PathTraversal {
        /// Path recorded in the archive.
        entry: PathBuf,
        /// Directory the archive was being unpacked into.
        root: PathBuf,
    },

    /// The chroot backend was given no image or root directory.
    #[error("the chroot sandbox requires an image or a root directory")]
    MissingRoot,

    /// The chroot backend was asked for something it cannot honour.
    #[error("{feature} are not supported by the chroot sandbox")]
    UnsupportedFeature {
        /// Human-readable name of the rejected feature.
        feature: &'static str,
    },

    /// Unpacking an image archive failed.
    #[error("failed to unpack {path}: {source}")]
    Extraction {
        /// Path being written when the failure occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The sandboxed child process could not be started.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        /// Program that was being started.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The container engine backend was given no image to run.
    #[error("the container engine sandbox requires an image")]
    MissingImage,

    /// Neither an entrypoint nor a first argument names a program.
    #[error("no command specified and no entrypoint in script")]
    MissingCommand,

    /// The invoking user's home directory could not be determined.
    #[error("cannot expand '{mount}': the home directory is unknown")]
    HomeUnavailable {
        /// Path as declared in the script.
        mount: String,
    },

    /// The per-user cache root could not be determined.
    #[error("cannot resolve '{mount}': the user cache directory is unknown")]
    CacheRootUnavailable {
        /// Host path as declared in the script.
        mount: String,
    },

    /// The content-addressed cache directory could not be created.
    #[error("failed to create cache directory {path}: {source}")]
    CacheDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The current working directory could not be read.
    #[error("failed to read the current directory: {source}")]
    CurrentDirectory {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A path needed for an argument vector is not valid UTF-8.
    #[error("path {path} is not valid UTF-8")]
    NonUtf8Path {
        /// Offending path.
        path: PathBuf,
    },

    /// An engine or version-control command exited unsuccessfully.
    #[error("`{program} {subcommand}` failed ({status}): {stderr}")]
    EngineCommand {
        /// Binary that was invoked.
        program: String,
        /// Subcommand that failed, for example `images` or `export`.
        subcommand: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Trimmed standard error of the failed command.
        stderr: String,
    },

    /// Streaming an image's filesystem out of the engine failed.
    #[error("failed to export image '{image}': {source}")]
    ImageExport {
        /// Image reference being exported.
        image: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An image reference could not be split into registry, repository and
    /// tag or digest.
    #[error("invalid image reference '{image}': {reason}")]
    InvalidReference {
        /// Reference as written in the script.
        image: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A registry request could not be sent or its body could not be read.
    #[error("registry request to {url} failed: {source}")]
    Registry {
        /// URL being requested.
        url: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The registry answered with a status other than success.
    #[error("registry returned {status} for {url}")]
    RegistryStatus {
        /// URL being requested.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A token endpoint answered without a token.
    #[error("registry token endpoint {realm} issued no token")]
    RegistryToken {
        /// Realm URL from the registry's challenge.
        realm: String,
    },

    /// A manifest or layer uses a format that cannot be flattened.
    #[error("image '{image}' cannot be unpacked: {reason}")]
    UnsupportedManifest {
        /// Image reference being fetched.
        image: String,
        /// The unsupported feature.
        reason: String,
    },

    /// An image index offers no manifest for the host platform.
    #[error("image '{image}' has no manifest for {platform}")]
    NoMatchingPlatform {
        /// Image reference being fetched.
        image: String,
        /// Platform that was looked for, as `os/architecture`.
        platform: String,
    },

    /// A downloaded layer does not hash to its recorded digest.
    #[error("layer {expected} failed verification: content hashes to {actual}")]
    LayerDigest {
        /// Digest named by the manifest.
        expected: String,
        /// Digest of the bytes actually received.
        actual: String,
    },

    /// A helper binary could not be started at all.
    #[error("failed to run '{program}': {source}")]
    ToolLaunch {
        /// Binary that was invoked.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    /// Returns `true` when an export stopped because its reader went away.
    ///
    /// This is the expected fate of a producer once the extraction side has
    /// already failed, so it must not mask the extraction error.
    #[must_use]
    pub fn is_broken_pipe(&self) -> bool {
        matches!(
            self,
            Self::ImageExport { source, .. } if source.kind() == io::ErrorKind::BrokenPipe
        )
    }
}
