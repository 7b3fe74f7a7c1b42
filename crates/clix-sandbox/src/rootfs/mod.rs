//! Root filesystems for the chroot backend.
//!
//! [`RootFsProvisioner::prepare`] either borrows an existing directory or
//! pulls an image and unpacks it into a fresh temporary directory. Images
//! come from an [`ImageSource`]: [`RegistryImageSource`] talks to the registry
//! directly, [`EngineImageSource`] goes through the container engine. The
//! export runs on its own thread and feeds the extraction through an OS pipe,
//! so unpacking starts before the export finishes.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;

use tempfile::{Builder, TempDir};
use tracing::{debug, info, warn};

use crate::error::SandboxError;

pub mod extract;
mod registry;
mod source;

pub use registry::{ImageReference, Platform, RegistryImageSource};
pub use source::{EngineImageSource, ImageSource};

const ROOTFS_TARGET: &str = "clix_sandbox::rootfs";

const ROOT_PREFIX: &str = "clix-chroot-";

/// A directory tree to chroot into.
#[derive(Debug)]
pub enum RootFs {
    /// An existing directory named by the script; never removed.
    Borrowed(PathBuf),
    /// A temporary directory holding an unpacked image; removed on release
    /// or drop.
    Owned(TempDir),
}

impl RootFs {
    /// Path of the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Borrowed(path) => path,
            Self::Owned(dir) => dir.path(),
        }
    }

    /// Returns `true` if this root will be deleted on release.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Releases the root, deleting it if it is owned.
    ///
    /// A failed deletion is logged rather than returned: by the time a root
    /// is released the run's outcome is already decided.
    pub fn release(self) {
        let Self::Owned(dir) = self else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(target: ROOTFS_TARGET, root = %path.display(), "removed root filesystem"),
            Err(error) => warn!(
                target: ROOTFS_TARGET,
                root = %path.display(),
                %error,
                "failed to remove root filesystem"
            ),
        }
    }
}

/// Produces [`RootFs`] values from image references.
#[derive(Debug, Clone)]
pub struct RootFsProvisioner<S> {
    source: S,
    scratch: Option<PathBuf>,
}

impl<S> RootFsProvisioner<S> {
    /// Creates a provisioner that fetches images from `source`.
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self {
            source,
            scratch: None,
        }
    }

    /// Creates temporary roots under `dir` instead of the system temp dir.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch = Some(dir.into());
        self
    }
}

impl<S: ImageSource + Sync> RootFsProvisioner<S> {
    /// Prepares a root filesystem for `image`.
    ///
    /// An existing directory is returned as [`RootFs::Borrowed`]. Anything
    /// else is pulled and unpacked into a new [`RootFs::Owned`]; if that
    /// fails the partial directory is removed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the source's pull or export error, or the extraction error,
    /// including [`SandboxError::PathTraversal`].
    pub fn prepare(&self, image: &str) -> Result<RootFs, SandboxError> {
        let local = Path::new(image);
        if local.is_dir() {
            debug!(target: ROOTFS_TARGET, root = image, "using local directory as root");
            return Ok(RootFs::Borrowed(local.to_path_buf()));
        }

        info!(target: ROOTFS_TARGET, image, "pulling image");
        self.source.pull(image)?;
        let root = self.scratch_root()?;
        self.unpack_into(image, root.path())?;
        info!(
            target: ROOTFS_TARGET,
            image,
            root = %root.path().display(),
            "unpacked image"
        );
        Ok(RootFs::Owned(root))
    }

    fn scratch_root(&self) -> Result<TempDir, SandboxError> {
        self.scratch
            .as_ref()
            .map_or_else(
                || Builder::new().prefix(ROOT_PREFIX).tempdir(),
                |dir| Builder::new().prefix(ROOT_PREFIX).tempdir_in(dir),
            )
            .map_err(|source| SandboxError::Extraction {
                path: self.scratch.clone().unwrap_or_else(std::env::temp_dir),
                source,
            })
    }

    fn unpack_into(&self, image: &str, root: &Path) -> Result<(), SandboxError> {
        let (mut reader, writer) = io::pipe().map_err(|source| SandboxError::ImageExport {
            image: image.to_owned(),
            source,
        })?;

        thread::scope(|scope| {
            let producer = scope.spawn(move || {
                let mut sink = writer;
                self.source.export(image, &mut sink)
            });

            let consumed = extract::unpack(&mut reader, root)
                .and_then(|()| drain(&mut reader, root));
            // Closing the read end unblocks a producer still writing.
            drop(reader);

            let produced = producer.join().unwrap_or_else(|_| {
                Err(SandboxError::ImageExport {
                    image: image.to_owned(),
                    source: io::Error::other("image export thread panicked"),
                })
            });
            settle(produced, consumed)
        })
    }
}

/// Reads past the archive's end-of-archive marker so the producer can finish.
fn drain(reader: &mut impl Read, root: &Path) -> Result<(), SandboxError> {
    io::copy(reader, &mut io::sink())
        .map(|_| ())
        .map_err(|source| SandboxError::Extraction {
            path: root.to_path_buf(),
            source,
        })
}

/// Picks the error to report from the two sides of the unpack pipeline.
///
/// A real producer failure wins. A broken pipe only means the consumer gave
/// up first, so the consumer's error is reported instead.
fn settle(
    produced: Result<(), SandboxError>,
    consumed: Result<(), SandboxError>,
) -> Result<(), SandboxError> {
    match (produced, consumed) {
        (Err(error), _) if !error.is_broken_pipe() => Err(error),
        (_, Err(error)) => Err(error),
        (outcome, Ok(())) => outcome,
    }
}
