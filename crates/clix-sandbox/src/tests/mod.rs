//! Shared fixtures and crate-level behaviour tests.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8PathBuf;
use mockall::mock;
use tar::{Builder, EntryType, Header};

use crate::digest::{ImageAddresser, ImageDigest};
use crate::error::SandboxError;
use crate::rootfs::ImageSource;


mock! {
    pub Addresser {}
    impl ImageAddresser for Addresser {
        fn digest(&self, image: &str) -> Result<ImageDigest, SandboxError>;
    }
}

/// Writes an executable `#!/bin/sh` script named `name` into `dir`.
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
    path.to_str().expect("fake tool path is UTF-8").to_owned()
}

/// Converts a scratch path into a `Utf8PathBuf`.
pub fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("scratch path is UTF-8")
}

/// Assembles tar archives, including entries `tar::Builder` would refuse.
pub struct ArchiveBuilder {
    builder: Builder<Vec<u8>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            builder: Builder::new(Vec::new()),
        }
    }

    pub fn directory(mut self, name: &str, mode: u32) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(mode);
        self.builder
            .append_data(&mut header, name, io::empty())
            .expect("append directory");
        self
    }

    pub fn file(mut self, name: &str, contents: &[u8], mode: u32) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(mode);
        self.builder
            .append_data(&mut header, name, contents)
            .expect("append file");
        self
    }

    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        self.builder
            .append_link(&mut header, name, target)
            .expect("append symlink");
        self
    }

    pub fn hard_link(mut self, name: &str, target: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Link);
        header.set_size(0);
        header.set_mode(0o644);
        self.builder
            .append_link(&mut header, name, target)
            .expect("append hard link");
        self
    }

    /// Appends a regular file whose name is copied into the header verbatim,
    /// so `..` components and absolute names survive.
    pub fn raw_file(mut self, name: &str, contents: &[u8]) -> Self {
        let mut header = Header::new_gnu();
        for (slot, byte) in header.as_old_mut().name.iter_mut().zip(name.as_bytes()) {
            *slot = *byte;
        }
        header.set_entry_type(EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        self.builder
            .append(&header, contents)
            .expect("append raw file");
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.builder.into_inner().expect("finish archive")
    }
}

/// Serves one prepared archive for every image and counts calls.
///
/// Clones share the pull counter.
#[derive(Clone)]
pub struct ArchiveSource {
    archive: Vec<u8>,
    pulls: Arc<AtomicUsize>,
}

impl ArchiveSource {
    pub fn new(archive: Vec<u8>) -> Self {
        Self {
            archive,
            pulls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl ImageSource for ArchiveSource {
    fn pull(&self, _image: &str) -> Result<(), SandboxError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn export(&self, image: &str, sink: &mut dyn Write) -> Result<(), SandboxError> {
        sink.write_all(&self.archive)
            .map_err(|source| SandboxError::ImageExport {
                image: image.to_owned(),
                source,
            })
    }
}

/// Pulls fine but fails while exporting, after writing a partial archive.
pub struct FailingSource {
    partial: Vec<u8>,
}

impl FailingSource {
    pub fn new(partial: Vec<u8>) -> Self {
        Self { partial }
    }
}

impl ImageSource for FailingSource {
    fn pull(&self, _image: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    fn export(&self, image: &str, sink: &mut dyn Write) -> Result<(), SandboxError> {
        let export_error = |source| SandboxError::ImageExport {
            image: image.to_owned(),
            source,
        };
        sink.write_all(&self.partial).map_err(export_error)?;
        Err(export_error(io::Error::other("registry connection reset")))
    }
}

/// Returns `true` if `dir` has no entries.
pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .expect("read scratch dir")
        .next()
        .is_none()
}
