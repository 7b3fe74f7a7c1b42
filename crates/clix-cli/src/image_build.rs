//! Building a script's image from a git repository.
//!
//! Images are tagged by repository and remote commit, so a tag that already
//! exists locally is reused and nothing is cloned.

use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use clix_config::Config;
use clix_sandbox::SandboxError;
use clix_sandbox::command::stdout_of;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

const BUILD_TARGET: &str = "clix_cli::image_build";

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Hex digits of the repository hash kept in the tag.
const REPO_HASH_BYTES: usize = 4;

/// The `build` section of a script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildConfig {
    /// Repository URL to clone.
    #[serde(default)]
    pub git: String,
    /// Branch to build instead of the remote `HEAD`.
    #[serde(default)]
    pub branch: Option<String>,
    /// Dockerfile path relative to the repository root.
    #[serde(default)]
    pub dockerfile: Option<String>,
}

impl BuildConfig {
    fn branch(&self) -> Option<&str> {
        self.branch.as_deref().filter(|branch| !branch.is_empty())
    }

    fn dockerfile(&self) -> &str {
        self.dockerfile
            .as_deref()
            .filter(|dockerfile| !dockerfile.is_empty())
            .unwrap_or(DEFAULT_DOCKERFILE)
    }
}

/// Errors raised while building an image.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The script has a `build` section without a repository.
    #[error("build.git is required")]
    MissingRepository,
    /// `ls-remote` printed nothing usable.
    #[error("no commit found for {repo}")]
    NoRemoteHead {
        /// Repository URL.
        repo: String,
    },
    /// A captured helper command failed.
    #[error(transparent)]
    Tool(#[from] SandboxError),
    /// The clone directory could not be created.
    #[error("failed to create build directory: {0}")]
    Workspace(#[source] io::Error),
    /// A streamed build step could not be started.
    #[error("failed to run {program}: {source}")]
    Launch {
        /// Binary that failed to start.
        program: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },
    /// A streamed build step exited unsuccessfully.
    #[error("{program} {step} failed: {status}")]
    StepFailed {
        /// Binary that ran the step.
        program: String,
        /// Subcommand, such as `clone` or `buildx`.
        step: &'static str,
        /// Exit status of the step.
        status: ExitStatus,
    },
}

/// Builds images with the configured engine and version-control binaries.
#[derive(Debug, Clone, Copy)]
pub struct ImageBuilder<'a> {
    engine: &'a str,
    vcs: &'a str,
}

impl<'a> ImageBuilder<'a> {
    /// Uses the engine and version-control binaries from `config`.
    #[must_use]
    pub fn from_config(config: &'a Config) -> Self {
        Self::new(config.engine(), config.vcs())
    }

    /// Uses explicit binaries.
    #[must_use]
    pub const fn new(engine: &'a str, vcs: &'a str) -> Self {
        Self { engine, vcs }
    }

    /// Returns the tag of an image built from `config`, building it first if
    /// the engine does not have it yet.
    ///
    /// Progress notes are written to `progress`; the output of the clone and
    /// the build goes to standard error.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the remote cannot be queried, the clone or
    /// the build fails, or the engine cannot be asked about existing images.
    pub fn build(&self, config: &BuildConfig, progress: &mut impl Write) -> Result<String, BuildError> {
        if config.git.is_empty() {
            return Err(BuildError::MissingRepository);
        }
        let commit = self.remote_head(&config.git, config.branch())?;
        let tag = image_tag(&config.git, &commit);
        if self.image_exists(&tag)? {
            info!(target: BUILD_TARGET, %tag, "reusing existing image");
            return Ok(tag);
        }

        let checkout = tempfile::Builder::new()
            .prefix("clix-build-")
            .tempdir()
            .map_err(BuildError::Workspace)?;
        let checkout_path = checkout.path().to_string_lossy().into_owned();

        let _ = writeln!(progress, "Cloning {}...", config.git);
        let mut clone_args = vec!["clone", "--depth", "1"];
        if let Some(branch) = config.branch() {
            clone_args.extend(["--branch", branch]);
        }
        clone_args.extend([config.git.as_str(), checkout_path.as_str()]);
        stream(self.vcs, "clone", &clone_args, None)?;

        let _ = writeln!(progress, "Building image {tag}...");
        let build_args = [
            "buildx",
            "build",
            "-f",
            config.dockerfile(),
            "--load",
            "--tag",
            tag.as_str(),
            ".",
        ];
        stream(self.engine, "buildx", &build_args, Some(checkout.path()))?;

        if let Err(error) = checkout.close() {
            warn!(target: BUILD_TARGET, %error, "failed to remove build directory");
        }
        info!(target: BUILD_TARGET, %tag, "built image");
        Ok(tag)
    }

    fn remote_head(&self, repo: &str, branch: Option<&str>) -> Result<String, BuildError> {
        let listing = stdout_of(self.vcs, &["ls-remote", repo, branch.unwrap_or("HEAD")], None)?;
        let commit = listing
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .ok_or_else(|| BuildError::NoRemoteHead {
                repo: repo.to_owned(),
            })?;
        debug!(target: BUILD_TARGET, repo, commit, "resolved remote head");
        Ok(commit.to_owned())
    }

    fn image_exists(&self, tag: &str) -> Result<bool, BuildError> {
        let listing = stdout_of(self.engine, &["images", "-q", tag], None)?;
        Ok(!listing.is_empty())
    }
}

/// Tag for an image built from `repo` at `commit`:
/// `clix-<name>-<hash>:<commit>`, where `<hash>` is the first eight hex digits
/// of the SHA-256 of the repository URL.
#[must_use]
pub fn image_tag(repo: &str, commit: &str) -> String {
    let digest = Sha256::digest(repo.as_bytes());
    let repo_hash: String = digest
        .iter()
        .take(REPO_HASH_BYTES)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("clix-{}-{repo_hash}:{commit}", repository_name(repo))
}

fn repository_name(repo: &str) -> String {
    let last = repo.rsplit('/').next().unwrap_or(repo);
    last.strip_suffix(".git").unwrap_or(last).replace(':', "-")
}

/// Runs a build step with its output forwarded to standard error.
fn stream(
    program: &str,
    step: &'static str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<(), BuildError> {
    debug!(target: BUILD_TARGET, program, ?args, "running build step");
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(io::stderr()));
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let status = command.status().map_err(|source| BuildError::Launch {
        program: program.to_owned(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(BuildError::StepFailed {
            program: program.to_owned(),
            step,
            status,
        })
    }
}
