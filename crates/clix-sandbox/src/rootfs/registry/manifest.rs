//! The subset of OCI and Docker manifest documents needed to find layers.

use std::fmt;

use serde::Deserialize;

/// Media types accepted from the manifest endpoint, most specific first.
pub const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.index.v1+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.docker.distribution.manifest.v2+json"
);

/// An image manifest or an image index; which one is told by the fields
/// present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// `1` for the legacy signed format, which is not supported.
    #[serde(default)]
    pub schema_version: Option<u32>,
    /// Declared media type, when the document carries one.
    #[serde(default)]
    pub media_type: Option<String>,
    /// Per-platform manifests of an index.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    /// Layers of an image manifest, base layer first.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Returns `true` for an index that points at per-platform manifests.
    #[must_use]
    pub fn is_index(&self) -> bool {
        !self.manifests.is_empty()
    }
}

/// A content-addressed reference to a blob or manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default)]
    pub media_type: String,
    /// Digest in `algorithm:hex` form.
    pub digest: String,
    /// Platform of an index entry.
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// Operating system and CPU architecture of an image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Platform {
    /// Operating system, for example `linux`.
    pub os: String,
    /// Architecture in Go's naming, for example `amd64`.
    pub architecture: String,
}

impl Platform {
    /// The platform this process runs on.
    #[must_use]
    pub fn host() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            "powerpc64" => "ppc64le",
            other => other,
        };
        Self {
            os: String::from("linux"),
            architecture: architecture.to_owned(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Picks the index entry built for `platform`.
#[must_use]
pub fn select_platform<'a>(entries: &'a [Descriptor], platform: &Platform) -> Option<&'a Descriptor> {
    entries
        .iter()
        .find(|entry| entry.platform.as_ref() == Some(platform))
}

/// How a layer blob is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerEncoding {
    /// A bare tar stream.
    Tar,
    /// A gzip-compressed tar stream.
    Gzip,
}

impl LayerEncoding {
    /// Classifies a layer media type; `None` for encodings such as zstd that
    /// cannot be read.
    #[must_use]
    pub fn of(media_type: &str) -> Option<Self> {
        if media_type.ends_with("gzip") {
            Some(Self::Gzip)
        } else if media_type.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}
