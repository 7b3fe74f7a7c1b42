//! Content addressing of container images.
//!
//! A digest is only looked up when a mount needs a cache key, since the
//! query depends on the engine having the image locally.

use std::fmt;

use tracing::debug;

use crate::command;
use crate::error::SandboxError;

const DIGEST_TARGET: &str = "clix_sandbox::digest";

const DIGEST_ALGORITHM_PREFIX: &str = "sha256:";

/// Lowercase hex identifier of an image's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDigest(String);

impl ImageDigest {
    /// Parses an engine image identifier such as `sha256:ab12…`.
    ///
    /// The algorithm prefix is stripped and the remainder lowercased.
    /// Returns `None` unless the remainder is non-empty ASCII hex, so a
    /// digest is always safe to use as a single path segment.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix(DIGEST_ALGORITHM_PREFIX)
            .unwrap_or(trimmed);
        if hex.is_empty() || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(hex.to_ascii_lowercase()))
    }

    /// The hex identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Looks up the digest of an image reference.
///
/// Injected into the invocation builder so tests can substitute a fixed
/// answer without touching an engine.
pub trait ImageAddresser {
    /// Returns the digest of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ImageNotFound`] when no local image matches.
    fn digest(&self, image: &str) -> Result<ImageDigest, SandboxError>;
}

/// Queries `<engine> images --no-trunc --quiet <image>`.
///
/// No pull is attempted: an image that is not present locally is an error.
#[derive(Debug, Clone)]
pub struct EngineAddresser {
    engine: String,
}

impl EngineAddresser {
    /// Creates an addresser that queries `engine`.
    #[must_use]
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }
}

impl ImageAddresser for EngineAddresser {
    fn digest(&self, image: &str) -> Result<ImageDigest, SandboxError> {
        let stdout = command::stdout_of(
            &self.engine,
            &["images", "--no-trunc", "--quiet", image],
            None,
        )?;
        // Several tags of one image print the same identifier once each.
        let Some(first) = stdout.lines().map(str::trim).find(|line| !line.is_empty()) else {
            return Err(SandboxError::ImageNotFound {
                image: image.to_owned(),
            });
        };
        let digest = ImageDigest::parse(first).ok_or_else(|| SandboxError::InvalidDigest {
            image: image.to_owned(),
            digest: first.to_owned(),
        })?;
        debug!(target: DIGEST_TARGET, image, %digest, "resolved image digest");
        Ok(digest)
    }
}
