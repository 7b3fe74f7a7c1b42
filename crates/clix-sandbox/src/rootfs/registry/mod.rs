//! Image filesystems fetched straight from an OCI distribution registry.
//!
//! No container daemon is involved: the manifest is resolved (through an
//! image index when the registry offers one), each layer blob is downloaded,
//! checked against its digest and merged into a single tar stream by
//! [`Flattener`]. Pulls are anonymous. A `401` carrying a bearer challenge is
//! answered with a token from the advertised realm and the request is retried
//! once.

use std::io::{self, Read, Write};
use std::iter;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::source::ImageSource;
use crate::error::SandboxError;

mod flatten;
mod manifest;
mod reference;

use self::flatten::Flattener;
use self::manifest::{Descriptor, LayerEncoding, MANIFEST_ACCEPT, Manifest, select_platform};
pub use self::manifest::Platform;
pub use self::reference::ImageReference;

const REGISTRY_TARGET: &str = "clix_sandbox::rootfs::registry";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const SHA256_PREFIX: &str = "sha256:";

/// Pulls image filesystems over the distribution API.
#[derive(Debug, Clone)]
pub struct RegistryImageSource {
    client: Client,
    platform: Platform,
}

impl RegistryImageSource {
    /// Creates a source that picks the host platform from image indexes.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Registry`] if the HTTP client cannot be set up.
    pub fn new() -> Result<Self, SandboxError> {
        Self::for_platform(Platform::host())
    }

    /// Creates a source that picks `platform` from image indexes.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Registry`] if the HTTP client cannot be set up.
    pub fn for_platform(platform: Platform) -> Result<Self, SandboxError> {
        // Layer downloads may take arbitrarily long; only connecting is bounded.
        let client = Client::builder()
            .user_agent(concat!("clix/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .map_err(|source| SandboxError::Registry {
                url: String::from("(client setup)"),
                source,
            })?;
        Ok(Self::with_client(client, platform))
    }

    /// Wraps an already configured HTTP client.
    pub(crate) const fn with_client(client: Client, platform: Platform) -> Self {
        Self { client, platform }
    }

    fn session<'a>(&'a self, image: &'a str) -> Result<Session<'a>, SandboxError> {
        let parsed = ImageReference::parse(image)?;
        Ok(Session {
            client: &self.client,
            image,
            base: parsed.api_base(),
            repository: parsed.repository().to_owned(),
            reference: parsed.reference().to_owned(),
            token: None,
        })
    }
}

impl ImageSource for RegistryImageSource {
    fn pull(&self, image: &str) -> Result<(), SandboxError> {
        let mut session = self.session(image)?;
        let manifest = session.manifest(&self.platform)?;
        for layer in &manifest.layers {
            encoding_of(image, layer)?;
        }
        info!(
            target: REGISTRY_TARGET,
            image,
            layers = manifest.layers.len(),
            "resolved image manifest"
        );
        Ok(())
    }

    fn export(&self, image: &str, sink: &mut dyn Write) -> Result<(), SandboxError> {
        let export_error = |source| SandboxError::ImageExport {
            image: image.to_owned(),
            source,
        };
        let mut session = self.session(image)?;
        let manifest = session.manifest(&self.platform)?;
        let mut flattener = Flattener::new(sink);

        for layer in manifest.layers.iter().rev() {
            let encoding = encoding_of(image, layer)?;
            debug!(target: REGISTRY_TARGET, image, digest = %layer.digest, "fetching layer");
            let url = format!("{}/blobs/{}", session.base, layer.digest);
            let blob = session.get(&url, None)?;
            let mut verified = VerifyingReader::new(blob);
            match encoding {
                LayerEncoding::Gzip => flattener.add_layer(GzDecoder::new(&mut verified)),
                LayerEncoding::Tar => flattener.add_layer(&mut verified),
            }
            .map_err(export_error)?;
            verified.verify(image, &layer.digest)?;
        }
        flattener.finish().map_err(export_error)?;
        Ok(())
    }
}

/// Requests made on behalf of one image, sharing a bearer token.
struct Session<'a> {
    client: &'a Client,
    image: &'a str,
    base: String,
    repository: String,
    reference: String,
    token: Option<String>,
}

impl Session<'_> {
    /// Resolves the image manifest for `platform`.
    fn manifest(&mut self, platform: &Platform) -> Result<Manifest, SandboxError> {
        let reference = self.reference.clone();
        let top = self.fetch_manifest(&reference)?;
        if !top.is_index() {
            return Ok(top);
        }
        let entry = select_platform(&top.manifests, platform).ok_or_else(|| {
            SandboxError::NoMatchingPlatform {
                image: self.image.to_owned(),
                platform: platform.to_string(),
            }
        })?;
        let chosen = self.fetch_manifest(&entry.digest)?;
        if chosen.is_index() {
            return Err(self.unsupported("nested image index"));
        }
        Ok(chosen)
    }

    fn fetch_manifest(&mut self, reference: &str) -> Result<Manifest, SandboxError> {
        let url = format!("{}/manifests/{reference}", self.base);
        let manifest: Manifest = self
            .get(&url, Some(MANIFEST_ACCEPT))?
            .json()
            .map_err(|source| SandboxError::Registry {
                url: url.clone(),
                source,
            })?;
        if manifest.schema_version == Some(1) {
            return Err(self.unsupported("schema 1 manifest"));
        }
        debug!(
            target: REGISTRY_TARGET,
            url,
            media_type = manifest.media_type.as_deref().unwrap_or("unspecified"),
            "fetched manifest"
        );
        Ok(manifest)
    }

    fn get(&mut self, url: &str, accept: Option<&str>) -> Result<Response, SandboxError> {
        let response = self.send(url, accept)?;
        if response.status() != StatusCode::UNAUTHORIZED || self.token.is_some() {
            return successful(url, response);
        }
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerChallenge::parse);
        let Some(challenge) = challenge else {
            return successful(url, response);
        };
        self.token = Some(self.fetch_token(&challenge)?);
        let retried = self.send(url, accept)?;
        successful(url, retried)
    }

    fn send(&self, url: &str, accept: Option<&str>) -> Result<Response, SandboxError> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().map_err(|source| SandboxError::Registry {
            url: url.to_owned(),
            source,
        })
    }

    fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, SandboxError> {
        let realm = challenge.realm.as_str();
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", self.repository));
        let mut request = self.client.get(realm).query(&[("scope", scope.as_str())]);
        if let Some(service) = &challenge.service {
            request = request.query(&[("service", service.as_str())]);
        }
        debug!(target: REGISTRY_TARGET, realm, scope, "requesting registry token");
        let failed = |source| SandboxError::Registry {
            url: realm.to_owned(),
            source,
        };
        let response = successful(realm, request.send().map_err(failed)?)?;
        let issued: TokenResponse = response.json().map_err(failed)?;
        issued
            .token
            .or(issued.access_token)
            .ok_or_else(|| SandboxError::RegistryToken {
                realm: realm.to_owned(),
            })
    }

    fn unsupported(&self, reason: &str) -> SandboxError {
        SandboxError::UnsupportedManifest {
            image: self.image.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

fn successful(url: &str, response: Response) -> Result<Response, SandboxError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SandboxError::RegistryStatus {
            url: url.to_owned(),
            status: status.as_u16(),
        })
    }
}

fn encoding_of(image: &str, layer: &Descriptor) -> Result<LayerEncoding, SandboxError> {
    LayerEncoding::of(&layer.media_type).ok_or_else(|| SandboxError::UnsupportedManifest {
        image: image.to_owned(),
        reason: format!("layer media type '{}'", layer.media_type),
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }
        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Splits `key=value, key="quoted, value"` lists.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut chars = input.chars().peekable();
    let mut params = Vec::new();
    loop {
        while chars
            .next_if(|c| *c == ',' || c.is_whitespace())
            .is_some()
        {}
        let key: String = iter::from_fn(|| chars.next_if(|c| *c != '=')).collect();
        if key.is_empty() || chars.next().is_none() {
            break;
        }
        let value = if chars.next_if_eq(&'"').is_some() {
            let mut value = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => value.extend(chars.next()),
                    other => value.push(other),
                }
            }
            value
        } else {
            let raw: String = iter::from_fn(|| chars.next_if(|c| *c != ',')).collect();
            raw.trim().to_owned()
        };
        params.push((key.trim().to_owned(), value));
    }
    params
}

/// Hashes everything read through it.
struct VerifyingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> VerifyingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Reads the rest of the blob and compares its hash with `expected`.
    ///
    /// Digests using algorithms other than SHA-256 are accepted unchecked.
    fn verify(mut self, image: &str, expected: &str) -> Result<(), SandboxError> {
        io::copy(&mut self, &mut io::sink()).map_err(|source| SandboxError::ImageExport {
            image: image.to_owned(),
            source,
        })?;
        let Some(hex) = expected.strip_prefix(SHA256_PREFIX) else {
            debug!(target: REGISTRY_TARGET, digest = expected, "layer digest not checked");
            return Ok(());
        };
        let actual = format!("{:x}", self.hasher.finalize());
        if actual.eq_ignore_ascii_case(hex) {
            Ok(())
        } else {
            Err(SandboxError::LayerDigest {
                expected: expected.to_owned(),
                actual: format!("{SHA256_PREFIX}{actual}"),
            })
        }
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if let Some(chunk) = buf.get(..read) {
            self.hasher.update(chunk);
        }
        Ok(read)
    }
}
