//! Image references in the familiar `[registry/]repository[:tag][@digest]`
//! shape.

use crate::error::SandboxError;

/// Registry assumed when a reference names none.
const DOCKER_HUB: &str = "docker.io";

/// Host actually serving Docker Hub's distribution API.
const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// Namespace of Docker Hub's single-segment repositories.
const OFFICIAL_NAMESPACE: &str = "library";

const DEFAULT_TAG: &str = "latest";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    registry: String,
    repository: String,
    reference: String,
}

impl ImageReference {
    /// Parses `image`, filling in Docker Hub and `latest` where omitted.
    ///
    /// A digest wins over a tag when both are given.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidReference`] for empty repositories,
    /// tags or digests.
    pub fn parse(image: &str) -> Result<Self, SandboxError> {
        let invalid = |reason| SandboxError::InvalidReference {
            image: image.to_owned(),
            reason,
        };
        if image.trim().is_empty() {
            return Err(invalid("empty reference"));
        }

        let (named, digest) = match image.split_once('@') {
            Some((named, digest)) => (named, Some(digest)),
            None => (image, None),
        };
        let (name, tag) = split_tag(named);
        let reference = match (digest, tag) {
            (Some(""), _) => return Err(invalid("empty digest")),
            (Some(digest), _) => digest,
            (None, Some("")) => return Err(invalid("empty tag")),
            (None, Some(tag)) => tag,
            (None, None) => DEFAULT_TAG,
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => (host, rest.to_owned()),
            _ => (DOCKER_HUB, name.to_owned()),
        };
        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository name"));
        }
        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("{OFFICIAL_NAMESPACE}/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry: registry.to_owned(),
            repository,
            reference: reference.to_owned(),
        })
    }

    /// Registry host, possibly with a port.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag or digest.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Base URL of the repository's distribution API.
    ///
    /// Loopback registries are spoken to over plain HTTP.
    #[must_use]
    pub fn api_base(&self) -> String {
        let host = if self.registry == DOCKER_HUB {
            DOCKER_HUB_API
        } else {
            self.registry.as_str()
        };
        let scheme = if is_loopback(host) { "http" } else { "https" };
        format!("{scheme}://{host}/v2/{}", self.repository)
    }
}

/// Splits a trailing `:tag` from the last path segment.
fn split_tag(named: &str) -> (&str, Option<&str>) {
    let last = named.rsplit('/').next().unwrap_or(named);
    match last.rsplit_once(':') {
        Some((_, tag)) => {
            let name = named
                .strip_suffix(tag)
                .and_then(|rest| rest.strip_suffix(':'))
                .unwrap_or(named);
            (name, Some(tag))
        }
        None => (named, None),
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

fn is_loopback(host: &str) -> bool {
    let bare = host
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map_or(host, |(bare, _)| bare);
    matches!(bare, "localhost" | "127.0.0.1" | "[::1]")
}
