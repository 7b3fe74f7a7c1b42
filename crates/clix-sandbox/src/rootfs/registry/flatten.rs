//! Merges image layers into the single tar stream the image presents.
//!
//! Layers are fed top layer first. An entry is emitted only the first time
//! its path is seen, so upper layers win. Whiteout markers (`.wh.<name>`)
//! hide a path and everything beneath it in lower layers; an opaque marker
//! (`.wh..wh..opq`) hides a directory's lower contents but not the
//! directory itself. Anything beneath a path an upper layer made a
//! non-directory is dropped too.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, Builder, Entry, EntryType};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// Streams the union of successive layers into one archive.
pub struct Flattener<W: Write> {
    builder: Builder<W>,
    seen: HashSet<PathBuf>,
    non_directories: HashSet<PathBuf>,
    whited_out: HashSet<PathBuf>,
    opaque: HashSet<PathBuf>,
}

impl<W: Write> Flattener<W> {
    /// Starts an archive written to `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            builder: Builder::new(sink),
            seen: HashSet::new(),
            non_directories: HashSet::new(),
            whited_out: HashSet::new(),
            opaque: HashSet::new(),
        }
    }

    /// Merges the next layer down, reading `layer` to its end.
    ///
    /// Whiteouts in this layer only affect the layers after it.
    ///
    /// # Errors
    ///
    /// Returns any error reading the layer or writing the output.
    pub fn add_layer<R: Read>(&mut self, layer: R) -> io::Result<()> {
        let mut archive = Archive::new(layer);
        let mut whited_out = Vec::new();
        let mut opaque = Vec::new();

        for item in archive.entries()? {
            let mut entry = item?;
            let path = clean(&entry.path()?);
            if path.as_os_str().is_empty() {
                continue;
            }
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            if name == OPAQUE_MARKER {
                opaque.push(parent);
                continue;
            }
            if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                whited_out.push(parent.join(hidden));
                continue;
            }
            if self.seen.contains(&path) || self.is_hidden(&path) {
                continue;
            }

            if entry.header().entry_type() != EntryType::Directory {
                self.non_directories.insert(path.clone());
            }
            self.copy(&mut entry, &path)?;
            self.seen.insert(path);
        }

        // Trailing padding after the end-of-archive marker.
        io::copy(&mut archive.into_inner(), &mut io::sink())?;
        self.whited_out.extend(whited_out);
        self.opaque.extend(opaque);
        Ok(())
    }

    /// Writes the end-of-archive marker and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns any error writing the marker.
    pub fn finish(self) -> io::Result<W> {
        self.builder.into_inner()
    }

    fn is_hidden(&self, path: &Path) -> bool {
        if path.ancestors().any(|ancestor| self.whited_out.contains(ancestor)) {
            return true;
        }
        path.ancestors().skip(1).any(|ancestor| {
            self.opaque.contains(ancestor) || self.non_directories.contains(ancestor)
        })
    }

    fn copy<R: Read>(&mut self, entry: &mut Entry<'_, R>, path: &Path) -> io::Result<()> {
        let mut header = entry.header().clone();
        match header.entry_type() {
            EntryType::Symlink | EntryType::Link => {
                let target = entry.link_name()?.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "link entry has no target")
                })?;
                self.builder.append_link(&mut header, path, target)
            }
            _ => self.builder.append_data(&mut header, path, entry),
        }
    }
}

/// Lexically tidies an entry path without resolving anything on disk.
///
/// `..` that cannot be collapsed is kept, so the entry is still refused.
fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::ParentDir => {
                let collapsible = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                );
                if collapsible {
                    cleaned.pop();
                } else {
                    cleaned.push("..");
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    cleaned
}
