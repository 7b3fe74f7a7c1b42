//! Streaming tar extraction confined to a destination root.
//!
//! Entries are unpacked in a single pass as they arrive. Every recorded path,
//! and every hard-link target, is normalised lexically against the root and
//! rejected if it would climb above it. Parent directories are then resolved
//! the way the chrooted process will see them: a symbolic link met on the way
//! is followed with the root standing in for `/`, so an earlier link can
//! never carry a later write outside the root. Symbolic link targets
//! themselves are written verbatim.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::{self, DirBuilder, File, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, Entry, EntryType};
use tracing::debug;

use crate::error::SandboxError;

const EXTRACT_TARGET: &str = "clix_sandbox::rootfs::extract";

const PERMISSION_BITS: u32 = 0o7777;

/// Mode of directories implied by an entry's path but not recorded.
const IMPLIED_DIR_MODE: u32 = 0o755;

/// Symbolic links followed while resolving one path, as in `MAXSYMLINKS`.
const MAX_LINK_HOPS: usize = 40;

/// Unpacks the tar stream `reader` beneath `root`.
///
/// Directory permissions are applied once every entry has been written, so
/// a read-only directory does not block its own contents. The caller owns
/// `root` and is responsible for removing it if this fails part-way.
///
/// # Errors
///
/// Returns [`SandboxError::PathTraversal`] for any entry that escapes `root`
/// and [`SandboxError::Extraction`] for malformed archives or I/O failures.
pub fn unpack<R: Read>(reader: R, root: &Path) -> Result<(), SandboxError> {
    let mut archive = Archive::new(reader);
    let entries = archive.entries().map_err(|source| failure(root, source))?;
    let mut directory_modes = Vec::new();

    for item in entries {
        let mut entry = item.map_err(|source| failure(root, source))?;
        unpack_entry(&mut entry, root, &mut directory_modes)?;
    }

    // Deepest directories were recorded last.
    for (path, mode) in directory_modes.into_iter().rev() {
        fs::set_permissions(&path, Permissions::from_mode(mode))
            .map_err(|source| SandboxError::Extraction { path, source })?;
    }
    Ok(())
}

/// Joins `recorded` onto `root`, refusing any path that climbs above it.
///
/// Absolute entry names are treated as relative to `root`.
///
/// # Errors
///
/// Returns [`SandboxError::PathTraversal`] when a `..` component would pop
/// past `root`.
pub fn contained_path(root: &Path, recorded: &Path) -> Result<PathBuf, SandboxError> {
    normalise(root, recorded).map(|relative| root.join(relative))
}

fn normalise(root: &Path, recorded: &Path) -> Result<PathBuf, SandboxError> {
    let mut relative = PathBuf::new();
    for component in recorded.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(SandboxError::PathTraversal {
                        entry: recorded.to_path_buf(),
                        root: root.to_path_buf(),
                    });
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(relative)
}

/// Resolves `relative` beneath `root` as if `root` were `/`.
///
/// Symbolic links are followed, absolute targets restart at `root` and `..`
/// stops at `root`, so the result always lies inside it. With `create` set,
/// missing components are created as directories.
///
/// # Errors
///
/// Returns an I/O error when a component is not a directory, a component is
/// missing and `create` is unset, or links nest deeper than
/// [`MAX_LINK_HOPS`].
fn resolve_in_root(root: &Path, relative: &Path, create: bool) -> io::Result<PathBuf> {
    let mut pending: VecDeque<OsString> = parts(relative).collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            resolved.pop();
            continue;
        }
        let candidate = root.join(&resolved).join(&part);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "too many levels of symbolic links",
                    ));
                }
                let link = fs::read_link(&candidate)?;
                if link.has_root() {
                    resolved.clear();
                }
                for step in parts(&link).rev() {
                    pending.push_front(step);
                }
            }
            Ok(meta) if meta.is_dir() => resolved.push(part),
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} is not a directory", candidate.display()),
                ));
            }
            Err(error) if create && error.kind() == io::ErrorKind::NotFound => {
                DirBuilder::new()
                    .mode(IMPLIED_DIR_MODE)
                    .create(&candidate)?;
                resolved.push(part);
            }
            Err(error) => return Err(error),
        }
    }
    Ok(root.join(resolved))
}

/// Normal and `..` components of `path`, in order.
fn parts(path: &Path) -> impl DoubleEndedIterator<Item = OsString> + '_ {
    path.components().filter_map(|component| match component {
        Component::Normal(part) => Some(part.to_os_string()),
        Component::ParentDir => Some(OsString::from("..")),
        Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
    })
}

/// Resolves the directory holding `relative` and joins its final name.
///
/// The final component is not followed: whatever sits there is replaced.
fn slot_for(root: &Path, relative: &Path, create: bool) -> Result<PathBuf, SandboxError> {
    let shown = root.join(relative);
    let Some(name) = relative.file_name() else {
        return Err(failure(
            &shown,
            io::Error::new(io::ErrorKind::InvalidData, "entry names the extraction root"),
        ));
    };
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    resolve_in_root(root, parent, create)
        .map(|dir| dir.join(name))
        .map_err(|source| failure(&shown, source))
}

fn unpack_entry<R: Read>(
    entry: &mut Entry<'_, R>,
    root: &Path,
    directory_modes: &mut Vec<(PathBuf, u32)>,
) -> Result<(), SandboxError> {
    let recorded = entry
        .path()
        .map_err(|source| failure(root, source))?
        .into_owned();
    let relative = normalise(root, &recorded)?;
    let shown = root.join(&relative);
    let mode = entry
        .header()
        .mode()
        .map_err(|source| failure(&shown, source))?
        & PERMISSION_BITS;

    match entry.header().entry_type() {
        EntryType::Directory => {
            let target =
                resolve_in_root(root, &relative, true).map_err(|source| failure(&shown, source))?;
            directory_modes.push((target, mode));
        }
        EntryType::Regular | EntryType::Continuous => {
            let target = slot_for(root, &relative, true)?;
            write_file(entry, &target, mode)?;
        }
        EntryType::Symlink => {
            let link = link_name(entry, &shown)?;
            let target = slot_for(root, &relative, true)?;
            clear_slot(&target)?;
            symlink(&link, &target).map_err(|source| failure(&target, source))?;
        }
        EntryType::Link => {
            let link = link_name(entry, &shown)?;
            let original = slot_for(root, &normalise(root, &link)?, false)?;
            let target = slot_for(root, &relative, true)?;
            clear_slot(&target)?;
            fs::hard_link(&original, &target).map_err(|source| failure(&target, source))?;
        }
        other => {
            debug!(
                target: EXTRACT_TARGET,
                entry = %recorded.display(),
                kind = ?other,
                "skipping unsupported archive entry"
            );
        }
    }
    Ok(())
}

fn write_file<R: Read>(
    entry: &mut Entry<'_, R>,
    target: &Path,
    mode: u32,
) -> Result<(), SandboxError> {
    clear_slot(target)?;
    let mut file = File::create(target).map_err(|source| failure(target, source))?;
    io::copy(entry, &mut file).map_err(|source| failure(target, source))?;
    fs::set_permissions(target, Permissions::from_mode(mode))
        .map_err(|source| failure(target, source))
}

fn link_name<R: Read>(entry: &Entry<'_, R>, target: &Path) -> Result<PathBuf, SandboxError> {
    let name = entry
        .link_name()
        .map_err(|source| failure(target, source))?;
    name.map(std::borrow::Cow::into_owned).ok_or_else(|| {
        failure(
            target,
            io::Error::new(io::ErrorKind::InvalidData, "link entry has no target"),
        )
    })
}

/// Removes any non-directory at `target`, so a write never follows a
/// previously unpacked link.
fn clear_slot(target: &Path) -> Result<(), SandboxError> {
    match fs::symlink_metadata(target) {
        Ok(existing) if !existing.is_dir() => {
            fs::remove_file(target).map_err(|source| failure(target, source))
        }
        _ => Ok(()),
    }
}

fn failure(path: &Path, source: io::Error) -> SandboxError {
    SandboxError::Extraction {
        path: path.to_path_buf(),
        source,
    }
}
