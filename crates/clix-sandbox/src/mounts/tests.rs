//! Unit tests for mount resolution.

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::tests::{fake_tool, utf8};

const DIGEST: &str = "4c2f3e9a";

#[fixture]
fn scratch() -> TempDir {
    TempDir::new().expect("scratch dir")
}

fn resolver(scratch: &TempDir) -> MountResolver {
    MountResolver::new(utf8(scratch.path()), "git")
        .with_home("/home/u")
        .with_cache_root(utf8(scratch.path()).join("cache"))
}

fn digest() -> ImageDigest {
    ImageDigest::parse(DIGEST).expect("valid digest")
}

#[rstest]
#[case::home_child("~/data", "/home/u/data")]
#[case::bare_home("~", "/home/u")]
#[case::absolute("/srv/data", "/srv/data")]
#[case::tilde_not_prefix("/srv/~data", "/srv/~data")]
fn host_path_defaults_sandbox_path(
    scratch: TempDir,
    #[case] declared: &str,
    #[case] expected: &str,
) {
    let resolved = resolver(&scratch)
        .resolve(&[MountSpec::new(declared)], None)
        .expect("resolve");

    let mount = resolved.first().expect("one mount");
    assert_eq!(mount.host_path().as_str(), expected);
    assert_eq!(mount.sandbox_path().as_str(), expected);
}

#[rstest]
#[case::home_child("~/.config", "/root/.config")]
#[case::bare_home("~", "/root")]
#[case::absolute("/work", "/work")]
fn sandbox_home_is_normalised_to_root(
    scratch: TempDir,
    #[case] sandbox: &str,
    #[case] expected: &str,
) {
    let resolved = resolver(&scratch)
        .resolve(&[MountSpec::bind("/srv/data", sandbox)], None)
        .expect("resolve");

    let mount = resolved.first().expect("one mount");
    assert_eq!(mount.host_path().as_str(), "/srv/data");
    assert_eq!(mount.sandbox_path().as_str(), expected);
}

#[rstest]
fn empty_sandbox_path_falls_back_to_host(scratch: TempDir) {
    let resolved = resolver(&scratch)
        .resolve(&[MountSpec::bind("~/src", "")], None)
        .expect("resolve");

    let mount = resolved.first().expect("one mount");
    assert_eq!(mount.sandbox_path().as_str(), "/home/u/src");
}

#[rstest]
#[case::current("${cacheDir}/python")]
#[case::legacy("{cacheDir}/python")]
fn cache_token_without_digest_fails(scratch: TempDir, #[case] declared: &str) {
    let error = resolver(&scratch)
        .resolve(&[MountSpec::bind(declared, "/tmp/.cache")], None)
        .expect_err("digest is required");

    assert!(matches!(error, SandboxError::MissingDigest { .. }));
}

#[rstest]
#[case::current("${cacheDir}/python")]
#[case::legacy("{cacheDir}/python")]
fn cache_token_resolves_under_digest_directory(scratch: TempDir, #[case] declared: &str) {
    let known = digest();
    let resolved = resolver(&scratch)
        .resolve(&[MountSpec::bind(declared, "/tmp/.cache")], Some(&known))
        .expect("resolve");

    let cache_dir = utf8(scratch.path()).join("cache/clix/cache").join(DIGEST);
    let mount = resolved.first().expect("one mount");
    assert_eq!(mount.host_path(), cache_dir.join("python").as_path());
    assert_eq!(mount.sandbox_path().as_str(), "/tmp/.cache");
    assert!(mount.host_path().as_str().contains(&format!("/{DIGEST}/python")));
    assert!(cache_dir.is_dir(), "cache directory should be created");
}

#[rstest]
fn cache_directory_is_created_with_0755(scratch: TempDir) {
    use std::os::unix::fs::PermissionsExt;

    let known = digest();
    resolver(&scratch)
        .resolve(&[MountSpec::new("${cacheDir}")], Some(&known))
        .expect("resolve");

    let cache_dir = scratch.path().join("cache/clix/cache").join(DIGEST);
    let mode = std::fs::metadata(&cache_dir)
        .expect("cache dir metadata")
        .permissions()
        .mode();
    // The process umask can only clear bits.
    assert_eq!(mode & 0o700, 0o700);
    assert_eq!(mode & !0o755 & 0o777, 0);
}

#[rstest]
fn cache_token_without_cache_root_fails(scratch: TempDir) {
    let known = digest();
    let error = MountResolver::new(utf8(scratch.path()), "git")
        .resolve(&[MountSpec::new("${cacheDir}")], Some(&known))
        .expect_err("cache root is unknown");

    assert!(matches!(error, SandboxError::CacheRootUnavailable { .. }));
}

#[rstest]
fn home_expansion_without_home_fails(scratch: TempDir) {
    let error = MountResolver::new(utf8(scratch.path()), "git")
        .resolve(&[MountSpec::new("~/data")], None)
        .expect_err("home is unknown");

    assert!(matches!(error, SandboxError::HomeUnavailable { .. }));
}

#[rstest]
fn git_root_token_uses_vcs_toplevel(scratch: TempDir) {
    let vcs = fake_tool(scratch.path(), "git", "echo /srv/repo");
    let resolved = MountResolver::new(utf8(scratch.path()), vcs)
        .resolve(&[MountSpec::new(GIT_ROOT_TOKEN)], None)
        .expect("resolve");

    let mount = resolved.first().expect("one mount");
    assert_eq!(mount.host_path().as_str(), "/srv/repo");
    assert_eq!(mount.sandbox_path().as_str(), "/srv/repo");
}

#[rstest]
fn git_root_token_runs_vcs_in_the_working_directory(scratch: TempDir) {
    let vcs = fake_tool(scratch.path(), "git", "pwd");
    let resolved = MountResolver::new(utf8(scratch.path()), vcs)
        .resolve(&[MountSpec::bind(GIT_ROOT_TOKEN, "/src")], None)
        .expect("resolve");

    let expected = utf8(&scratch.path().canonicalize().expect("canonical scratch"));
    let mount = resolved.first().expect("one mount");
    assert_eq!(
        mount
            .host_path()
            .canonicalize_utf8()
            .expect("canonical host path"),
        expected
    );
}

#[rstest]
fn git_root_outside_repository_is_reported(scratch: TempDir) {
    let error = MountResolver::new(utf8(scratch.path()), "/bin/false")
        .resolve(&[MountSpec::new(GIT_ROOT_TOKEN)], None)
        .expect_err("not a repository");

    assert!(matches!(error, SandboxError::NotAGitRepo { .. }));
}

#[rstest]
fn git_root_token_must_match_exactly(scratch: TempDir) {
    let resolved = resolver(&scratch)
        .resolve(&[MountSpec::new("/x/git.repoRoot(cwd)")], None)
        .expect("resolve");

    let mount = resolved.first().expect("one mount");
    assert_eq!(mount.host_path().as_str(), "/x/git.repoRoot(cwd)");
}

#[rstest]
fn order_is_preserved_without_deduplication(scratch: TempDir) {
    let mounts = [
        MountSpec::bind("/a", "/shared"),
        MountSpec::new("~/b"),
        MountSpec::bind("/c", "/shared"),
    ];
    let resolved = resolver(&scratch).resolve(&mounts, None).expect("resolve");

    let binds: Vec<String> = resolved.iter().map(ResolvedMount::bind_argument).collect();
    assert_eq!(
        binds,
        vec!["/a:/shared", "/home/u/b:/home/u/b", "/c:/shared"]
    );
}

#[test]
fn needs_digest_only_for_cache_tokens() {
    assert!(!needs_digest(&[MountSpec::new("~/data")]));
    assert!(needs_digest(&[
        MountSpec::new("/a"),
        MountSpec::new("{cacheDir}/go"),
    ]));
    assert!(needs_digest(&[MountSpec::new("${cacheDir}")]));
}
