//! Script files: YAML documents describing which tool to run and how.
//!
//! A script may start with a `#!/usr/bin/env clix` line so it can be made
//! executable; YAML treats that line as a comment.

use std::fs;
use std::path::Path;

use clix_sandbox::{EnvVar, MountSpec, ScriptConfig};
use serde::Deserialize;

use crate::AppError;
use crate::image_build::BuildConfig;
use crate::toolchain::GoConfig;

/// A parsed script file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// Runs a Go package instead of an image.
    #[serde(default)]
    pub go: Option<GoConfig>,
    /// Builds the image from a git repository before running it.
    #[serde(default)]
    pub build: Option<BuildConfig>,
    /// Image reference, or a local root directory for the chroot backend.
    #[serde(default)]
    pub image: Option<String>,
    /// Program overriding the image's entrypoint.
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Bind mounts in declaration order.
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// Environment variables in declaration order.
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl Script {
    /// Reads and parses the script at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ReadScript`] if the file cannot be read and
    /// [`AppError::ParseScript`] if it is not a valid script.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|source| AppError::ReadScript {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| AppError::ParseScript {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a script from YAML text.
    ///
    /// # Errors
    ///
    /// Returns the YAML error when the document does not describe a script.
    pub fn parse(text: &str) -> Result<Self, serde_saphyr::Error> {
        serde_saphyr::from_str(text)
    }

    /// The image, ignoring an empty string.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref().filter(|image| !image.is_empty())
    }

    /// Converts the script into the configuration a sandbox runs.
    #[must_use]
    pub fn into_sandbox_config(self) -> ScriptConfig {
        ScriptConfig {
            image: self.image,
            entrypoint: self.entrypoint,
            mounts: self.mounts,
            env: self.env,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_script_is_parsed() {
        let script = Script::parse(
            r#"#!/usr/bin/env clix
image: python:3.12
entrypoint: python
mounts:
  - hostPath: ${cacheDir}/pip
    sandboxPath: /root/.cache/pip
  - hostPath: git.repoRoot(cwd)
env:
  - name: PYTHONDONTWRITEBYTECODE
    value: "1"
"#,
        )
        .expect("parse script");

        assert_eq!(script.image(), Some("python:3.12"));
        assert_eq!(script.entrypoint.as_deref(), Some("python"));
        assert_eq!(
            script.mounts,
            vec![
                MountSpec::bind("${cacheDir}/pip", "/root/.cache/pip"),
                MountSpec::new("git.repoRoot(cwd)"),
            ]
        );
        let config = script.into_sandbox_config();
        assert_eq!(config.env.len(), 1);
        assert_eq!(config.image(), Some("python:3.12"));
    }

    #[test]
    fn go_and_build_sections_are_parsed() {
        let script = Script::parse(
            "go:\n  run: golang.org/x/tools/cmd/stringer\n  version: v0.20.0\nbuild:\n  git: https://example.com/tools.git\n  branch: main\n",
        )
        .expect("parse script");

        let go = script.go.expect("go section");
        assert_eq!(go.target(), Some(String::from("golang.org/x/tools/cmd/stringer@v0.20.0")));
        let build = script.build.expect("build section");
        assert_eq!(build.git, "https://example.com/tools.git");
        assert_eq!(build.branch.as_deref(), Some("main"));
        assert_eq!(build.dockerfile, None);
    }

    #[test]
    fn mounts_must_be_a_list() {
        assert!(Script::parse("mounts: /data\n").is_err());
    }
}
