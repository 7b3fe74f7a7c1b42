//! Resolution of declared mounts into concrete host and sandbox paths.
//!
//! Each host path is rewritten in a fixed order: the cache directory token,
//! then the repository-root sentinel, then a leading `~`. The sandbox path
//! only gets `~` normalisation, after which an empty value falls back to the
//! resolved host path. Mounts are returned in declaration order with no
//! deduplication; engines let later binds shadow earlier ones.

use std::env;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::command;
use crate::digest::ImageDigest;
use crate::error::SandboxError;
use crate::script::MountSpec;

const MOUNTS_TARGET: &str = "clix_sandbox::mounts";

/// Token replaced by the content-addressed cache directory of the image.
pub const CACHE_DIR_TOKEN: &str = "${cacheDir}";

/// Deprecated spelling of [`CACHE_DIR_TOKEN`]; still honoured with a warning.
pub const LEGACY_CACHE_DIR_TOKEN: &str = "{cacheDir}";

/// Host path sentinel replaced by the enclosing repository's top level.
pub const GIT_ROOT_TOKEN: &str = "git.repoRoot(cwd)";

/// Home directory assumed inside the sandbox.
///
/// The real home of the image's user is unknown, so `~` on the sandbox side
/// always means `/root`.
pub const SANDBOX_HOME: &str = "/root";

const CACHE_DIR_MODE: u32 = 0o755;

/// A mount whose paths are absolute and token-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    host_path: Utf8PathBuf,
    sandbox_path: Utf8PathBuf,
}

impl ResolvedMount {
    /// Path on the host.
    #[must_use]
    pub fn host_path(&self) -> &Utf8Path {
        &self.host_path
    }

    /// Path inside the sandbox.
    #[must_use]
    pub fn sandbox_path(&self) -> &Utf8Path {
        &self.sandbox_path
    }

    /// Renders the `host:sandbox` form used by engine `-v` flags.
    #[must_use]
    pub fn bind_argument(&self) -> String {
        format!("{}:{}", self.host_path, self.sandbox_path)
    }
}

/// Returns `true` if the mount references the cache directory in any spelling.
#[must_use]
pub fn uses_cache_dir(mount: &MountSpec) -> bool {
    // `${cacheDir}` contains `{cacheDir}`, so one check covers both.
    mount.host_path.contains(LEGACY_CACHE_DIR_TOKEN)
}

/// Returns `true` if any mount needs the image digest to resolve.
#[must_use]
pub fn needs_digest(mounts: &[MountSpec]) -> bool {
    mounts.iter().any(uses_cache_dir)
}

/// Rewrites [`MountSpec`]s into [`ResolvedMount`]s.
///
/// The resolver carries everything it would otherwise read from the process
/// environment, so tests can point it at scratch directories.
#[derive(Debug, Clone)]
pub struct MountResolver {
    cwd: Utf8PathBuf,
    vcs: String,
    home: Option<Utf8PathBuf>,
    cache_root: Option<Utf8PathBuf>,
}

impl MountResolver {
    /// Creates a resolver with no known home or cache directory.
    #[must_use]
    pub fn new(cwd: impl Into<Utf8PathBuf>, vcs: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            vcs: vcs.into(),
            home: None,
            cache_root: None,
        }
    }

    /// Builds a resolver from the current directory and the user's home and
    /// cache directories.
    ///
    /// Home and cache directories that cannot be determined, or are not
    /// UTF-8, only cause an error if a mount actually needs them.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::CurrentDirectory`] or
    /// [`SandboxError::NonUtf8Path`] if the working directory is unusable.
    pub fn from_environment(vcs: &str) -> Result<Self, SandboxError> {
        let cwd = env::current_dir().map_err(|source| SandboxError::CurrentDirectory { source })?;
        let utf8_cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|path| SandboxError::NonUtf8Path { path })?;
        let mut resolver = Self::new(utf8_cwd, vcs);
        resolver.home = dirs::home_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok());
        resolver.cache_root =
            dirs::cache_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok());
        Ok(resolver)
    }

    /// Sets the directory substituted for `~` on the host side.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<Utf8PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Sets the per-user cache root under which `clix/cache/<digest>` lives.
    #[must_use]
    pub fn with_cache_root(mut self, cache_root: impl Into<Utf8PathBuf>) -> Self {
        self.cache_root = Some(cache_root.into());
        self
    }

    /// Directory the run starts from.
    #[must_use]
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Resolves every mount, preserving order.
    ///
    /// `digest` is only consulted by mounts that use the cache directory
    /// token. Such a mount creates `<cache root>/clix/cache/<digest>` with
    /// mode `0755` if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails on the first mount that cannot be resolved; see
    /// [`SandboxError::MissingDigest`], [`SandboxError::NotAGitRepo`],
    /// [`SandboxError::HomeUnavailable`] and [`SandboxError::CacheDirectory`].
    pub fn resolve(
        &self,
        mounts: &[MountSpec],
        digest: Option<&ImageDigest>,
    ) -> Result<Vec<ResolvedMount>, SandboxError> {
        let resolved = mounts
            .iter()
            .map(|mount| self.resolve_one(mount, digest))
            .collect::<Result<Vec<_>, _>>()?;
        for mount in &resolved {
            debug!(
                target: MOUNTS_TARGET,
                host = %mount.host_path,
                sandbox = %mount.sandbox_path,
                "resolved mount"
            );
        }
        Ok(resolved)
    }

    fn resolve_one(
        &self,
        mount: &MountSpec,
        digest: Option<&ImageDigest>,
    ) -> Result<ResolvedMount, SandboxError> {
        let declared = mount.host_path.as_str();
        let cached = self.substitute_cache_dir(declared, digest)?;
        let rooted = if cached == GIT_ROOT_TOKEN {
            self.repo_root(declared)?.into_string()
        } else {
            cached
        };
        let host_path = self.expand_home(&rooted, declared)?;
        let sandbox_path = mount
            .sandbox_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .map_or_else(|| host_path.clone(), sandbox_home);
        Ok(ResolvedMount {
            host_path,
            sandbox_path,
        })
    }

    fn substitute_cache_dir(
        &self,
        declared: &str,
        digest: Option<&ImageDigest>,
    ) -> Result<String, SandboxError> {
        if !declared.contains(LEGACY_CACHE_DIR_TOKEN) {
            return Ok(declared.to_owned());
        }
        if declared
            .replace(CACHE_DIR_TOKEN, "")
            .contains(LEGACY_CACHE_DIR_TOKEN)
        {
            warn!(
                target: MOUNTS_TARGET,
                mount = declared,
                "{{cacheDir}} is deprecated and will be removed; use ${{cacheDir}} instead"
            );
        }

        let known = digest.ok_or_else(|| SandboxError::MissingDigest {
            mount: declared.to_owned(),
        })?;
        let cache_root =
            self.cache_root
                .as_ref()
                .ok_or_else(|| SandboxError::CacheRootUnavailable {
                    mount: declared.to_owned(),
                })?;
        let cache_dir = cache_root.join("clix").join("cache").join(known.as_str());
        DirBuilder::new()
            .recursive(true)
            .mode(CACHE_DIR_MODE)
            .create(&cache_dir)
            .map_err(|source| SandboxError::CacheDirectory {
                path: cache_dir.clone().into_std_path_buf(),
                source,
            })?;

        Ok(declared
            .replace(CACHE_DIR_TOKEN, cache_dir.as_str())
            .replace(LEGACY_CACHE_DIR_TOKEN, cache_dir.as_str()))
    }

    fn repo_root(&self, declared: &str) -> Result<Utf8PathBuf, SandboxError> {
        let output = command::run_captured(
            &self.vcs,
            &["rev-parse", "--show-toplevel"],
            Some(self.cwd.as_std_path()),
        )?;
        let root = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if !output.status.success() || root.is_empty() {
            return Err(SandboxError::NotAGitRepo {
                mount: declared.to_owned(),
                cwd: self.cwd.clone().into_std_path_buf(),
            });
        }
        Ok(Utf8PathBuf::from(root))
    }

    fn expand_home(&self, path: &str, declared: &str) -> Result<Utf8PathBuf, SandboxError> {
        let tail = if path == "~" {
            Some("")
        } else {
            path.strip_prefix("~/")
        };
        let Some(relative) = tail else {
            return Ok(Utf8PathBuf::from(path));
        };
        let home = self
            .home
            .as_ref()
            .ok_or_else(|| SandboxError::HomeUnavailable {
                mount: declared.to_owned(),
            })?;
        if relative.is_empty() {
            Ok(home.clone())
        } else {
            Ok(home.join(relative))
        }
    }
}

fn sandbox_home(path: &str) -> Utf8PathBuf {
    if path == "~" {
        return Utf8PathBuf::from(SANDBOX_HOME);
    }
    path.strip_prefix("~/").map_or_else(
        || Utf8PathBuf::from(path),
        |relative| Utf8Path::new(SANDBOX_HOME).join(relative),
    )
}

#[cfg(test)]
mod tests;
