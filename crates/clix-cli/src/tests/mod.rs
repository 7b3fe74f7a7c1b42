//! Shared fixtures and in-process tests for the CLI runtime.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clix_config::{Config, SandboxBackend};
use clix_sandbox::RunOutcome;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::{AppError, ConfigLoader, run_with_loader};


/// Writes an executable `#!/bin/sh` script named `name` into `dir`.
pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
    path.to_str().expect("fake tool path is UTF-8").to_owned()
}

/// Writes a script file into `dir`.
pub(crate) fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("tool.yaml");
    fs::write(&path, body).expect("write script");
    path
}

/// An engine that appends its arguments to `engine.log` and exits with `code`.
pub(crate) fn recording_engine(dir: &Path, code: i32) -> String {
    let log = dir.join("engine.log");
    fake_tool(
        dir,
        "engine",
        &format!("echo \"$@\" >> '{}'\nexit {code}", log.display()),
    )
}

pub(crate) fn engine_log(dir: &Path) -> String {
    fs::read_to_string(dir.join("engine.log")).unwrap_or_default()
}

/// Hands out a fixed configuration.
pub(crate) struct StubLoader {
    pub(crate) config: Config,
}

impl StubLoader {
    pub(crate) fn with_engine(engine: &str) -> Self {
        Self {
            config: Config {
                engine: engine.to_owned(),
                ..Config::default()
            },
        }
    }
}

impl ConfigLoader for StubLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Output of one in-process run.
pub(crate) struct Captured {
    pub(crate) exit: ExitCode,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

pub(crate) fn run_captured(args: &[&str], loader: &StubLoader) -> Captured {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = run_with_loader(
        args.iter().map(OsString::from),
        &mut stdout,
        &mut stderr,
        loader,
    );
    Captured {
        exit,
        stdout: String::from_utf8(stdout).expect("utf8 stdout"),
        stderr: String::from_utf8(stderr).expect("utf8 stderr"),
    }
}

#[fixture]
fn scratch() -> TempDir {
    TempDir::new().expect("scratch dir")
}

#[rstest]
#[case(RunOutcome::Succeeded, ExitCode::SUCCESS)]
#[case(RunOutcome::FailedExit { code: 17 }, ExitCode::from(17))]
#[case(RunOutcome::FailedExit { code: 137 }, ExitCode::from(137))]
#[case(RunOutcome::FailedExit { code: 300 }, ExitCode::FAILURE)]
fn outcome_becomes_the_exit_code(#[case] outcome: RunOutcome, #[case] expected: ExitCode) {
    assert_eq!(crate::exit_code(outcome), expected);
}

#[test]
fn help_is_written_to_stdout() {
    let captured = run_captured(&["clix", "--help"], &StubLoader::with_engine("docker"));

    assert_eq!(captured.exit, ExitCode::SUCCESS);
    assert!(captured.stdout.contains("Usage: clix"));
    assert!(captured.stderr.is_empty());
}

#[test]
fn missing_script_is_a_usage_error() {
    let captured = run_captured(&["clix"], &StubLoader::with_engine("docker"));

    assert_eq!(captured.exit, ExitCode::FAILURE);
    assert!(captured.stderr.starts_with("clix: "));
    assert!(captured.stderr.contains("<SCRIPT>"));
}

#[rstest]
fn unreadable_script_is_reported(scratch: TempDir) {
    let missing = scratch.path().join("absent.yaml");
    let captured = run_captured(
        &["clix", missing.to_str().expect("utf8")],
        &StubLoader::with_engine("docker"),
    );

    assert_eq!(captured.exit, ExitCode::FAILURE);
    assert!(captured.stderr.contains("error reading script file"));
}

#[rstest]
fn script_without_image_or_go_is_rejected(scratch: TempDir) {
    let script = write_script(scratch.path(), "env:\n  - name: A\n    value: b\n");
    let captured = run_captured(
        &["clix", script.to_str().expect("utf8")],
        &StubLoader::with_engine("docker"),
    );

    assert_eq!(captured.exit, ExitCode::FAILURE);
    assert_eq!(
        captured.stderr,
        "clix: script configuration missing (expected 'go' or 'image')\n"
    );
}

#[rstest]
fn image_script_runs_through_the_engine(scratch: TempDir) {
    let engine = recording_engine(scratch.path(), 0);
    let script = write_script(scratch.path(), "image: alpine\nentrypoint: echo\n");

    let captured = run_captured(
        &["clix", script.to_str().expect("utf8"), "hello", "--loud"],
        &StubLoader::with_engine(&engine),
    );

    assert_eq!(captured.exit, ExitCode::SUCCESS);
    let log = engine_log(scratch.path());
    assert!(log.starts_with("run -i"), "engine saw {log}");
    assert!(log.trim_end().ends_with("--entrypoint echo alpine hello --loud"));
}

#[rstest]
fn engine_exit_status_is_propagated(scratch: TempDir) {
    let engine = recording_engine(scratch.path(), 3);
    let script = write_script(scratch.path(), "image: alpine\n");

    let captured = run_captured(
        &["clix", script.to_str().expect("utf8")],
        &StubLoader::with_engine(&engine),
    );

    assert_eq!(captured.exit, ExitCode::from(3));
    assert!(captured.stderr.is_empty());
}

#[rstest]
fn go_script_with_mounts_runs_in_the_go_image(scratch: TempDir) {
    let engine = recording_engine(scratch.path(), 0);
    let script = write_script(
        scratch.path(),
        "go:\n  run: example.com/tool\n  version: v1.0.0\nmounts:\n  - hostPath: /srv/data\n",
    );

    let captured = run_captured(
        &["clix", script.to_str().expect("utf8"), "-x"],
        &StubLoader::with_engine(&engine),
    );

    assert_eq!(captured.exit, ExitCode::SUCCESS);
    let log = engine_log(scratch.path());
    assert!(log.contains("-v /srv/data:/srv/data"));
    assert!(log.trim_end().ends_with("golang:latest go run example.com/tool@v1.0.0 -x"));
}

#[rstest]
fn chroot_backend_rejects_mounts(scratch: TempDir) {
    let script = write_script(
        scratch.path(),
        "image: alpine\nentrypoint: /bin/true\nmounts:\n  - hostPath: /srv/data\n",
    );
    let loader = StubLoader {
        config: Config {
            sandbox: SandboxBackend::Chroot,
            ..Config::default()
        },
    };

    let captured = run_captured(&["clix", script.to_str().expect("utf8")], &loader);

    assert_eq!(captured.exit, ExitCode::FAILURE);
    assert_eq!(
        captured.stderr,
        "clix: mounts are not supported by the chroot sandbox\n"
    );
}
