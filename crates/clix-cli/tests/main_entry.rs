//! Integration tests for the `clix` binary entry point.
//!
//! Covers configuration flags and environment overrides end to end, using
//! fake container engines written into scratch directories.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

fn fake_engine(dir: &Path, body: &str) -> String {
    let path = dir.join("engine");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write engine");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod engine");
    path.to_str().expect("utf8 path").to_owned()
}

fn clix(home: &TempDir) -> assert_cmd::Command {
    let mut command = cargo_bin_cmd!("clix");
    command
        .current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("XDG_CACHE_HOME", home.path().join(".cache"))
        .env_remove("CLIX_SANDBOX")
        .env_remove("CLIX_IMAGE_SOURCE")
        .env_remove("CLIX_ENGINE")
        .env_remove("CLIX_VCS")
        .env_remove("CLIX_LOG_FILTER")
        .env_remove("CLIX_LOG_FORMAT");
    command
}

#[test]
fn missing_script_exits_with_failure() {
    let home = TempDir::new().expect("home");
    clix(&home)
        .assert()
        .code(1)
        .stderr(contains("clix: "))
        .stderr(contains("<SCRIPT>"));
}

#[test]
fn engine_flag_selects_the_engine_binary() {
    let home = TempDir::new().expect("home");
    let engine = fake_engine(home.path(), r#"echo "$@""#);
    fs::write(home.path().join("tool.yaml"), "image: alpine\n").expect("script");

    clix(&home)
        .args(["--engine", engine.as_str(), "tool.yaml", "hello", "--engine"])
        .assert()
        .success()
        .stdout(contains("run -i"))
        .stdout(contains("alpine hello --engine"));
}

#[test]
fn environment_selects_the_engine_binary() {
    let home = TempDir::new().expect("home");
    let engine = fake_engine(home.path(), "exit 5");
    fs::write(home.path().join("tool.yaml"), "image: alpine\n").expect("script");

    clix(&home)
        .env("CLIX_ENGINE", &engine)
        .arg("tool.yaml")
        .assert()
        .code(5);
}

#[test]
fn chroot_backend_refuses_environment_variables() {
    let home = TempDir::new().expect("home");
    fs::write(
        home.path().join("tool.yaml"),
        "image: alpine\nentrypoint: /bin/true\nenv:\n  - name: A\n    value: b\n",
    )
    .expect("script");

    clix(&home)
        .args(["--sandbox", "chroot", "tool.yaml"])
        .assert()
        .code(1)
        .stderr(contains(
            "environment variables are not supported by the chroot sandbox",
        ));
}

#[test]
fn unknown_backend_fails_fast() {
    let home = TempDir::new().expect("home");
    fs::write(home.path().join("tool.yaml"), "image: alpine\n").expect("script");

    clix(&home)
        .env("CLIX_SANDBOX", "firecracker")
        .arg("tool.yaml")
        .assert()
        .code(1)
        .stderr(contains("failed to load configuration"));
}
