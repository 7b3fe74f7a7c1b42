//! Access to image filesystems through the container engine.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::command;
use crate::error::SandboxError;

const SOURCE_TARGET: &str = "clix_sandbox::rootfs::source";

/// Entrypoint given to the throwaway container; it is never started.
const EXPORT_ENTRYPOINT: &str = "/bin/true";

/// Yields an image's flattened filesystem as a tar stream.
pub trait ImageSource {
    /// Makes `image` available locally, fetching it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be fetched.
    fn pull(&self, image: &str) -> Result<(), SandboxError>;

    /// Writes the flattened filesystem of `image` to `sink` as a tar stream.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ImageExport`] if streaming fails, including
    /// a broken pipe once the reader has gone away.
    fn export(&self, image: &str, sink: &mut dyn Write) -> Result<(), SandboxError>;
}

/// Drives `<engine> pull`, `create`, `export` and `rm`.
#[derive(Debug, Clone)]
pub struct EngineImageSource {
    engine: String,
}

impl EngineImageSource {
    /// Creates a source backed by `engine`.
    #[must_use]
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }
}

impl ImageSource for EngineImageSource {
    fn pull(&self, image: &str) -> Result<(), SandboxError> {
        command::stdout_of(&self.engine, &["pull", image], None).map(|_| ())
    }

    fn export(&self, image: &str, sink: &mut dyn Write) -> Result<(), SandboxError> {
        let created = command::stdout_of(
            &self.engine,
            &["create", "--entrypoint", EXPORT_ENTRYPOINT, image],
            None,
        )?;
        let id = created
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| SandboxError::EngineCommand {
                program: self.engine.clone(),
                subcommand: String::from("create"),
                status: String::from("no container id"),
                stderr: String::new(),
            })?;
        let container = ScratchContainer {
            engine: &self.engine,
            id: id.to_owned(),
        };
        container.stream(image, sink)
    }
}

/// A created-but-never-started container, removed on drop.
struct ScratchContainer<'a> {
    engine: &'a str,
    id: String,
}

impl ScratchContainer<'_> {
    fn stream(&self, image: &str, sink: &mut dyn Write) -> Result<(), SandboxError> {
        let export_error = |source: io::Error| SandboxError::ImageExport {
            image: image.to_owned(),
            source,
        };

        debug!(target: SOURCE_TARGET, image, container = %self.id, "exporting container filesystem");
        let mut child = Command::new(self.engine)
            .args(["export", self.id.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SandboxError::ToolLaunch {
                program: self.engine.to_owned(),
                source,
            })?;
        let Some(mut stdout) = child.stdout.take() else {
            return Err(export_error(io::Error::other("export stdout was not captured")));
        };

        let copied = io::copy(&mut stdout, sink).and_then(|_| sink.flush());
        drop(stdout);
        if copied.is_err() {
            if let Err(error) = child.kill() {
                debug!(target: SOURCE_TARGET, %error, "export process already gone");
            }
        }
        let status = child.wait().map_err(export_error)?;
        copied.map_err(export_error)?;
        if status.success() {
            Ok(())
        } else {
            Err(SandboxError::EngineCommand {
                program: self.engine.to_owned(),
                subcommand: String::from("export"),
                status: status.to_string(),
                stderr: String::new(),
            })
        }
    }
}

impl Drop for ScratchContainer<'_> {
    fn drop(&mut self) {
        let removed = command::run_captured(self.engine, &["rm", "-f", self.id.as_str()], None)
            .and_then(|output| command::require_success(self.engine, &["rm"], &output));
        if let Err(error) = removed {
            warn!(target: SOURCE_TARGET, container = %self.id, %error, "failed to remove export container");
        }
    }
}
