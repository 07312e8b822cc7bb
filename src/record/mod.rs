//! # Archive Records
//!
//! A `.car` archive body is a single tree of records. Each record is either a
//! file (PRG or SEQ) carrying its raw payload, or a directory carrying an ordered
//! list of child records. This module defines the record types and the tree
//! operations on them; the byte layout lives in [`wire`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::MAX_RECORD_SIZE;
use crate::error::{CarError, Result};
use crate::fsx;
use crate::petscii;

pub mod wire;

pub use wire::{RecordHeader, RECORD_HEADER_SIZE};

/// Maximum encoded length of a record name.
pub const MAX_NAME_SIZE: usize = 15;

/// The type tag stored in the first byte of every record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Prg,
    Seq,
    Directory,
}

impl RecordKind {
    pub fn code(self) -> u8 {
        match self {
            RecordKind::Prg => 0x50,
            RecordKind::Seq => 0xAC,
            RecordKind::Directory => 0x44,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x50 => Ok(RecordKind::Prg),
            0xAC => Ok(RecordKind::Seq),
            0x44 => Ok(RecordKind::Directory),
            other => Err(CarError::Format(format!("unknown record type 0x{other:02X}"))),
        }
    }
}

/// Kind of a file record, as shown by the C64 OS file manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Prg,
    Seq,
}

impl FileKind {
    /// Files named `*.seq` are sequential files; everything else is a program file.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("seq") => FileKind::Seq,
            _ => FileKind::Prg,
        }
    }

    pub fn record_kind(self) -> RecordKind {
        match self {
            FileKind::Prg => RecordKind::Prg,
            FileKind::Seq => RecordKind::Seq,
        }
    }
}

/// Per-file payload encoding. Only [`Compression::None`] can be written or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Rle,
    Lz,
}

impl Compression {
    pub fn code(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Rle => 1,
            Compression::Lz => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Rle),
            2 => Ok(Compression::Lz),
            other => Err(CarError::Format(format!("unknown compression type {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Rle => "rle",
            Compression::Lz => "lz",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that `name` can be stored in a record header.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CarError::Validation("record names cannot be empty".into()));
    }
    let len = petscii::encoded_len(name)?;
    if len > MAX_NAME_SIZE {
        return Err(CarError::Validation(format!(
            "name '{name}' is {len} bytes, the limit is {MAX_NAME_SIZE}"
        )));
    }
    Ok(())
}

/// A file leaf. The payload is not held in memory; `source` points at the
/// content on disk and doubles as the record's content identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    kind: FileKind,
    name: String,
    compression: Compression,
    source: PathBuf,
}

impl FileRecord {
    pub fn new(kind: FileKind, name: impl Into<String>, source: impl Into<PathBuf>, compression: Compression) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { kind, name, compression, source: source.into() })
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Current byte length of the referenced content.
    pub fn size(&self) -> Result<u64> {
        let len = fsx::regular_file_len(&self.source)?;
        if len > MAX_RECORD_SIZE {
            return Err(CarError::Validation(format!(
                "'{}' is {len} bytes, records hold at most {MAX_RECORD_SIZE}",
                self.source.display()
            )));
        }
        Ok(len)
    }
}

/// A directory node owning its children in insertion order. Child names are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    name: String,
    children: Vec<Record>,
}

impl DirectoryRecord {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, children: Vec::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Record] {
        &self.children
    }

    // Callers may only change file attributes, never names.
    pub(crate) fn children_mut(&mut self) -> &mut [Record] {
        &mut self.children
    }

    /// Number of children, which is what the size field of a directory stores.
    pub fn size(&self) -> u64 {
        self.children.len() as u64
    }

    pub fn child(&self, name: &str) -> Option<&Record> {
        self.children.iter().find(|c| c.name() == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Record> {
        self.children.iter_mut().find(|c| c.name() == name)
    }

    pub fn add_child(&mut self, record: Record) -> Result<()> {
        if self.child(record.name()).is_some() {
            return Err(CarError::MergeConflict {
                path: format!("{}/{}", self.name, record.name()),
                reason: "directory already has a child with this name".into(),
            });
        }
        self.children.push(record);
        Ok(())
    }

    /// Merges `other` into this directory.
    ///
    /// Children missing here are appended, directories present on both sides
    /// are merged recursively and files present on both sides must be equal.
    /// The whole merge is checked before anything is changed, so on error
    /// `self` is left as it was.
    pub fn merge(&mut self, other: DirectoryRecord) -> Result<()> {
        if self.name != other.name {
            return Err(CarError::MergeConflict {
                path: self.name.clone(),
                reason: format!("cannot merge directory '{}' into it", other.name),
            });
        }
        self.check_merge(&other, &self.name)?;
        self.apply_merge(other);
        Ok(())
    }

    fn check_merge(&self, other: &DirectoryRecord, path: &str) -> Result<()> {
        for theirs in &other.children {
            let child_path = format!("{path}/{}", theirs.name());
            match (self.child(theirs.name()), theirs) {
                (None, _) => {}
                (Some(Record::Directory(ours)), Record::Directory(theirs)) => {
                    ours.check_merge(theirs, &child_path)?;
                }
                (Some(Record::File(ours)), Record::File(theirs)) => {
                    if ours != theirs {
                        return Err(CarError::MergeConflict {
                            path: child_path,
                            reason: format!(
                                "already holds '{}' ({:?}, {}), refusing '{}' ({:?}, {})",
                                ours.source.display(),
                                ours.kind,
                                ours.compression,
                                theirs.source.display(),
                                theirs.kind,
                                theirs.compression,
                            ),
                        });
                    }
                }
                (Some(_), _) => {
                    return Err(CarError::MergeConflict {
                        path: child_path,
                        reason: "a file and a directory share this name".into(),
                    });
                }
            }
        }
        Ok(())
    }

    // Only called after check_merge succeeded.
    fn apply_merge(&mut self, other: DirectoryRecord) {
        for theirs in other.children {
            match theirs {
                Record::Directory(theirs) => match self.child_mut(&theirs.name) {
                    Some(Record::Directory(ours)) => ours.apply_merge(theirs),
                    _ => self.children.push(Record::Directory(theirs)),
                },
                Record::File(theirs) => {
                    if self.child(&theirs.name).is_none() {
                        self.children.push(Record::File(theirs));
                    }
                }
            }
        }
    }
}

/// One node of the archive tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    File(FileRecord),
    Directory(DirectoryRecord),
}

impl Record {
    pub fn name(&self) -> &str {
        match self {
            Record::File(f) => &f.name,
            Record::Directory(d) => &d.name,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::File(f) => f.kind.record_kind(),
            Record::Directory(_) => RecordKind::Directory,
        }
    }

    pub fn compression(&self) -> Compression {
        match self {
            Record::File(f) => f.compression,
            Record::Directory(_) => Compression::None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Record::Directory(_))
    }

    pub fn as_file(&self) -> Option<&FileRecord> {
        match self {
            Record::File(f) => Some(f),
            Record::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryRecord> {
        match self {
            Record::Directory(d) => Some(d),
            Record::File(_) => None,
        }
    }

    /// The value stored in the size field: payload length for files, child count for directories.
    pub fn size(&self) -> Result<u64> {
        match self {
            Record::File(f) => f.size(),
            Record::Directory(d) => Ok(d.size()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, source: &str) -> Record {
        Record::File(FileRecord::new(FileKind::Prg, name, source, Compression::None).unwrap())
    }

    fn dir(name: &str, children: Vec<Record>) -> DirectoryRecord {
        let mut d = DirectoryRecord::new(name).unwrap();
        for c in children {
            d.add_child(c).unwrap();
        }
        d
    }

    #[test]
    fn test_record_kind_codes() {
        for kind in [RecordKind::Prg, RecordKind::Seq, RecordKind::Directory] {
            assert_eq!(RecordKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(matches!(RecordKind::from_code(0x00), Err(CarError::Format(_))));
        assert!(matches!(Compression::from_code(3), Err(CarError::Format(_))));
    }

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_path(Path::new("src/readme.seq")), FileKind::Seq);
        assert_eq!(FileKind::from_path(Path::new("NOTES.SEQ")), FileKind::Seq);
        assert_eq!(FileKind::from_path(Path::new("app.prg")), FileKind::Prg);
        assert_eq!(FileKind::from_path(Path::new("boot")), FileKind::Prg);
    }

    #[test]
    fn test_name_length_bound() {
        assert!(validate_name("fifteen-chars-x").is_ok());
        assert!(matches!(validate_name("sixteen-chars-xx"), Err(CarError::Validation(_))));
        assert!(matches!(validate_name(""), Err(CarError::Validation(_))));
        assert!(matches!(DirectoryRecord::new("under_score"), Err(CarError::Encoding(_))));
    }

    #[test]
    fn test_add_child_rejects_duplicates() {
        let mut d = dir("root", vec![file("a.prg", "/x/a.prg")]);
        let err = d.add_child(file("a.prg", "/y/a.prg")).unwrap_err();
        assert!(matches!(err, CarError::MergeConflict { .. }));
        assert_eq!(d.size(), 1);
    }

    #[test]
    fn test_merge_appends_and_recurses() {
        let mut ours = dir("root", vec![Record::Directory(dir("src", vec![file("a.prg", "/x/a.prg")]))]);
        let theirs = dir(
            "root",
            vec![
                Record::Directory(dir("src", vec![file("b.prg", "/x/b.prg")])),
                file("c.prg", "/x/c.prg"),
            ],
        );
        ours.merge(theirs).unwrap();

        let names: Vec<_> = ours.children().iter().map(Record::name).collect();
        assert_eq!(names, ["src", "c.prg"]);
        let src = ours.child("src").and_then(Record::as_directory).unwrap();
        let names: Vec<_> = src.children().iter().map(Record::name).collect();
        assert_eq!(names, ["a.prg", "b.prg"]);
    }

    #[test]
    fn test_merge_identical_file_is_noop() {
        let mut ours = dir("root", vec![file("a.prg", "/x/a.prg")]);
        let before = ours.clone();
        ours.merge(dir("root", vec![file("a.prg", "/x/a.prg")])).unwrap();
        assert_eq!(ours, before);
    }

    #[test]
    fn test_merge_conflicts_leave_directory_untouched() {
        let mut ours = dir("root", vec![file("a.prg", "/x/a.prg")]);
        let before = ours.clone();

        // the new sibling would be appended, but the conflicting file aborts the merge first
        let theirs = dir("root", vec![file("new.prg", "/x/new.prg"), file("a.prg", "/y/a.prg")]);
        assert!(matches!(ours.merge(theirs), Err(CarError::MergeConflict { .. })));
        assert_eq!(ours, before);

        let theirs = dir("root", vec![Record::Directory(dir("a.prg", vec![]))]);
        assert!(matches!(ours.merge(theirs), Err(CarError::MergeConflict { .. })));

        let mut seq = FileRecord::new(FileKind::Seq, "a.prg", "/x/a.prg", Compression::None).unwrap();
        let theirs = dir("root", vec![Record::File(seq.clone())]);
        assert!(matches!(ours.merge(theirs), Err(CarError::MergeConflict { .. })));

        seq = FileRecord::new(FileKind::Prg, "a.prg", "/x/a.prg", Compression::Rle).unwrap();
        let theirs = dir("root", vec![Record::File(seq)]);
        assert!(matches!(ours.merge(theirs), Err(CarError::MergeConflict { .. })));

        assert!(matches!(ours.merge(dir("other", vec![])), Err(CarError::MergeConflict { .. })));
        assert_eq!(ours, before);
    }
}
