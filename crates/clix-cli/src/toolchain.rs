//! Running Go packages named by a script's `go` section.

use std::process::Command;

use clix_sandbox::{RunOutcome, ScriptConfig};
use serde::Deserialize;
use tracing::debug;

use crate::AppError;

const TOOLCHAIN_TARGET: &str = "clix_cli::toolchain";

/// Image used when a Go script needs mounts and therefore a sandbox.
pub const GO_IMAGE: &str = "golang:latest";

/// The `go` section of a script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GoConfig {
    /// Package path passed to `go run`.
    #[serde(default)]
    pub run: String,
    /// Module version appended as `@version`.
    #[serde(default)]
    pub version: Option<String>,
}

impl GoConfig {
    /// The `go run` target, or `None` when no package is named.
    #[must_use]
    pub fn target(&self) -> Option<String> {
        if self.run.is_empty() {
            return None;
        }
        Some(match self.version.as_deref().filter(|v| !v.is_empty()) {
            Some(version) => format!("{}@{version}", self.run),
            None => self.run.clone(),
        })
    }

    fn require_target(&self) -> Result<String, AppError> {
        self.target().ok_or(AppError::MissingGoPackage)
    }

    /// Rewrites a Go script into a sandboxed run of `go run` in [`GO_IMAGE`].
    ///
    /// Returns the sandbox configuration and the arguments to run it with.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MissingGoPackage`] if no package is named.
    pub fn containerised(
        &self,
        base: ScriptConfig,
        args: &[String],
    ) -> Result<(ScriptConfig, Vec<String>), AppError> {
        let target = self.require_target()?;
        let config = ScriptConfig {
            image: Some(GO_IMAGE.to_owned()),
            ..base
        };
        let mut argv = vec![String::from("go"), String::from("run"), target];
        argv.extend_from_slice(args);
        Ok((config, argv))
    }
}

/// Runs `go run` on the host with inherited standard streams.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    program: String,
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self::new("go")
    }
}

impl GoToolchain {
    /// Uses `program` as the Go binary.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs the package named by `config` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MissingGoPackage`] if no package is named and
    /// [`AppError::Toolchain`] if the Go binary cannot be started.
    pub fn run(&self, config: &GoConfig, args: &[String]) -> Result<RunOutcome, AppError> {
        let target = config.require_target()?;
        debug!(target: TOOLCHAIN_TARGET, program = %self.program, %target, "running go package");
        let status = Command::new(&self.program)
            .arg("run")
            .arg(&target)
            .args(args)
            .status()
            .map_err(|source| AppError::Toolchain {
                program: self.program.clone(),
                source,
            })?;
        Ok(RunOutcome::from_status(status))
    }
}

#[cfg(test)]
mod tests {
    use clix_sandbox::MountSpec;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::tests::fake_tool;

    fn go(run: &str, version: Option<&str>) -> GoConfig {
        GoConfig {
            run: run.to_owned(),
            version: version.map(str::to_owned),
        }
    }

    #[rstest]
    #[case::plain(go("example.com/tool", None), Some("example.com/tool"))]
    #[case::versioned(go("example.com/tool", Some("v1.2.3")), Some("example.com/tool@v1.2.3"))]
    #[case::empty_version(go("example.com/tool", Some("")), Some("example.com/tool"))]
    #[case::missing(go("", Some("v1")), None)]
    fn target_appends_the_version(#[case] config: GoConfig, #[case] expected: Option<&str>) {
        assert_eq!(config.target().as_deref(), expected);
    }

    #[test]
    fn containerised_run_uses_the_go_image() {
        let base = ScriptConfig::default().with_mount(MountSpec::new("~/go"));
        let args = vec![String::from("-v")];

        let (config, argv) = go("example.com/tool", Some("latest"))
            .containerised(base, &args)
            .expect("containerised");

        assert_eq!(config.image(), Some(GO_IMAGE));
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(argv, vec!["go", "run", "example.com/tool@latest", "-v"]);
    }

    #[test]
    fn host_run_propagates_the_exit_code() {
        let scratch = TempDir::new().expect("scratch dir");
        let program = fake_tool(
            scratch.path(),
            "go",
            r#"[ "$1 $2 $3" = "run example.com/tool@v1 --flag" ] || exit 9
exit 7"#,
        );

        let outcome = GoToolchain::new(program)
            .run(&go("example.com/tool", Some("v1")), &[String::from("--flag")])
            .expect("run");

        assert_eq!(outcome, RunOutcome::FailedExit { code: 7 });
    }

    #[test]
    fn missing_package_is_reported() {
        let error = GoToolchain::new("go")
            .run(&GoConfig::default(), &[])
            .expect_err("no package");
        assert!(matches!(error, AppError::MissingGoPackage));
    }
}
