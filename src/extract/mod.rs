//! # Extraction Module
//!
//! Reading an archive reconstructs the record tree and, in the same forward
//! pass, hands every directory and file payload to a [`Materializer`]. The
//! materializer decides where the bytes end up: on disk ([`FsMaterializer`]),
//! in memory ([`MemoryMaterializer`]) or nowhere ([`NullMaterializer`], used for
//! listing). Payloads are streamed chunk by chunk and never buffered whole by
//! the reader itself.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{CarError, Result};
use crate::fsx;

/// Destination for the directories and files of an archive being read.
///
/// Paths handed to a materializer are relative to the archive root and always
/// start with the root record's name.
pub trait Materializer {
    type File<'a>: PendingFile
    where
        Self: 'a;

    /// Makes sure the directory exists. Called before any of its children.
    fn create_dir(&mut self, rel: &Path) -> Result<()>;

    /// Opens a file to receive a payload. Nothing is visible until the
    /// returned file is committed.
    fn create_file(&mut self, rel: &Path) -> Result<Self::File<'_>>;

    /// Directory that committed file locations are relative to.
    fn base_dir(&self) -> PathBuf {
        PathBuf::new()
    }
}

/// A file being written. Dropping it without [`PendingFile::commit`] discards it.
pub trait PendingFile: Write {
    /// Publishes the completed file and returns its content location.
    fn commit(self) -> Result<PathBuf>;
}

/// Extracts under a target directory on disk.
///
/// Files are written to a temporary file next to their destination and renamed
/// into place once complete, so a truncated payload never leaves a partial file.
/// Existing directories are reused and existing files are replaced.
#[derive(Debug, Clone)]
pub struct FsMaterializer {
    target: PathBuf,
}

impl FsMaterializer {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { target: target.into() }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

pub struct FsPendingFile {
    temp: NamedTempFile,
    dest: PathBuf,
}

impl Write for FsPendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

impl PendingFile for FsPendingFile {
    fn commit(mut self) -> Result<PathBuf> {
        self.temp.flush().map_err(|e| CarError::io(e, &self.dest))?;
        self.temp
            .persist(&self.dest)
            .map_err(|e| CarError::io(e.error, &self.dest))?;
        Ok(self.dest)
    }
}

impl Materializer for FsMaterializer {
    type File<'a> = FsPendingFile
    where
        Self: 'a;

    fn create_dir(&mut self, rel: &Path) -> Result<()> {
        fsx::create_dir_all(&self.target.join(rel))
    }

    fn create_file(&mut self, rel: &Path) -> Result<FsPendingFile> {
        let dest = self.target.join(rel);
        let parent = dest.parent().unwrap_or(&self.target).to_path_buf();
        // a file at the archive root has no directory record to create its parent
        fsx::create_dir_all(&parent)?;
        let temp = NamedTempFile::new_in(&parent).map_err(|e| CarError::io(e, &parent))?;
        Ok(FsPendingFile { temp, dest })
    }

    fn base_dir(&self) -> PathBuf {
        self.target.clone()
    }
}

/// Keeps extracted directories and files in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryMaterializer {
    dirs: Vec<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemoryMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories in the order they were created.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn files(&self) -> &BTreeMap<PathBuf, Vec<u8>> {
        &self.files
    }

    pub fn file(&self, rel: impl AsRef<Path>) -> Option<&[u8]> {
        self.files.get(rel.as_ref()).map(Vec::as_slice)
    }
}

pub struct MemoryFile<'a> {
    owner: &'a mut MemoryMaterializer,
    rel: PathBuf,
    data: Vec<u8>,
}

impl Write for MemoryFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PendingFile for MemoryFile<'_> {
    fn commit(self) -> Result<PathBuf> {
        self.owner.files.insert(self.rel.clone(), self.data);
        Ok(self.rel)
    }
}

impl Materializer for MemoryMaterializer {
    type File<'a> = MemoryFile<'a>
    where
        Self: 'a;

    fn create_dir(&mut self, rel: &Path) -> Result<()> {
        if !self.dirs.iter().any(|d| d == rel) {
            self.dirs.push(rel.to_path_buf());
        }
        Ok(())
    }

    fn create_file(&mut self, rel: &Path) -> Result<MemoryFile<'_>> {
        Ok(MemoryFile { owner: self, rel: rel.to_path_buf(), data: Vec::new() })
    }
}

/// Discards payloads, remembering only their sizes. Reading through it parses
/// and validates an archive without extracting anything.
#[derive(Debug, Default, Clone)]
pub struct NullMaterializer {
    sizes: BTreeMap<PathBuf, u64>,
}

impl NullMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total payload bytes of the committed files.
    pub fn bytes(&self) -> u64 {
        self.sizes.values().sum()
    }

    pub fn size_of(&self, rel: impl AsRef<Path>) -> Option<u64> {
        self.sizes.get(rel.as_ref()).copied()
    }
}

pub struct NullFile<'a> {
    owner: &'a mut NullMaterializer,
    rel: PathBuf,
    len: u64,
}

impl Write for NullFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PendingFile for NullFile<'_> {
    fn commit(self) -> Result<PathBuf> {
        self.owner.sizes.insert(self.rel.clone(), self.len);
        Ok(self.rel)
    }
}

impl Materializer for NullMaterializer {
    type File<'a> = NullFile<'a>
    where
        Self: 'a;

    fn create_dir(&mut self, _rel: &Path) -> Result<()> {
        Ok(())
    }

    fn create_file(&mut self, rel: &Path) -> Result<NullFile<'_>> {
        Ok(NullFile { owner: self, rel: rel.to_path_buf(), len: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_fs_file_only_appears_on_commit() {
        let out = tempdir().unwrap();
        let mut m = FsMaterializer::new(out.path());
        m.create_dir(Path::new("myapp")).unwrap();

        let mut pending = m.create_file(Path::new("myapp/app.prg")).unwrap();
        pending.write_all(b"partial").unwrap();
        drop(pending);
        assert!(!out.path().join("myapp/app.prg").exists());
        // the discarded temp file is cleaned up as well
        assert_eq!(fs::read_dir(out.path().join("myapp")).unwrap().count(), 0);

        let mut pending = m.create_file(Path::new("myapp/app.prg")).unwrap();
        pending.write_all(b"complete").unwrap();
        let dest = pending.commit().unwrap();
        assert_eq!(dest, out.path().join("myapp/app.prg"));
        assert_eq!(fs::read(dest).unwrap(), b"complete");
    }

    #[test]
    fn test_fs_replaces_existing_files() {
        let out = tempdir().unwrap();
        fs::write(out.path().join("a.prg"), b"old contents").unwrap();
        let mut m = FsMaterializer::new(out.path());
        let mut pending = m.create_file(Path::new("a.prg")).unwrap();
        pending.write_all(b"new").unwrap();
        pending.commit().unwrap();
        assert_eq!(fs::read(out.path().join("a.prg")).unwrap(), b"new");
    }

    #[test]
    fn test_memory_materializer() {
        let mut m = MemoryMaterializer::new();
        m.create_dir(Path::new("root")).unwrap();
        m.create_dir(Path::new("root")).unwrap();
        let mut f = m.create_file(Path::new("root/x.seq")).unwrap();
        f.write_all(b"abc").unwrap();
        f.commit().unwrap();

        let uncommitted = m.create_file(Path::new("root/y.seq")).unwrap();
        drop(uncommitted);

        assert_eq!(m.dirs(), [PathBuf::from("root")]);
        assert_eq!(m.file("root/x.seq"), Some(&b"abc"[..]));
        assert!(m.file("root/y.seq").is_none());
    }

    #[test]
    fn test_null_materializer_counts_bytes() {
        let mut m = NullMaterializer::new();
        let mut f = m.create_file(Path::new("a")).unwrap();
        f.write_all(&[0u8; 10]).unwrap();
        assert_eq!(f.commit().unwrap(), PathBuf::from("a"));
        let pending = m.create_file(Path::new("b")).unwrap();
        drop(pending);
        assert_eq!(m.bytes(), 10);
        assert_eq!(m.size_of("a"), Some(10));
        assert_eq!(m.size_of("b"), None);
    }
}
