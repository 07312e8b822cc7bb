//! Record byte layout.
//!
//! Every record starts with a 22-byte header:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 1    | record type (`0x50` PRG, `0xAC` SEQ, `0x44` directory) |
//! | 1      | 1    | reserved, written as zero               |
//! | 2      | 3    | size, little endian                     |
//! | 5      | 15   | name, PETSCII, padded with `0xA0`       |
//! | 20     | 1    | reserved, written as zero               |
//! | 21     | 1    | compression type                        |
//!
//! A file header is followed by `size` payload bytes, a directory header by
//! `size` child records in order.

use std::io::{self, Read, Write};
use std::path::Path;

use tracing::debug;

use super::{Compression, DirectoryRecord, FileKind, FileRecord, Record, RecordKind, MAX_NAME_SIZE};
use crate::common::{read_u24_le, u24_le, Cancel, CHUNK_SIZE, MAX_RECORD_SIZE};
use crate::error::{CarError, Result};
use crate::extract::{Materializer, PendingFile};
use crate::fsx;
use crate::petscii::{self, SHIFTED_SPACE};

pub const RECORD_HEADER_SIZE: usize = 22;

/// Maximum number of nested directories, counting the root. Deeper trees are
/// rejected both when writing and when reading.
pub const MAX_DEPTH: usize = 64;

/// The fixed-size prefix shared by all record types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub size: u64,
    pub name: String,
    pub compression: Compression,
}

impl RecordHeader {
    pub fn encode(&self) -> Result<[u8; RECORD_HEADER_SIZE]> {
        if self.size > MAX_RECORD_SIZE {
            return Err(CarError::Validation(format!(
                "'{}' has size {}, records hold at most {MAX_RECORD_SIZE}",
                self.name, self.size
            )));
        }
        let name = petscii::encode_padded(&self.name, MAX_NAME_SIZE, SHIFTED_SPACE, "name")?;

        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0] = self.kind.code();
        buf[2..5].copy_from_slice(&u24_le(self.size));
        buf[5..20].copy_from_slice(&name);
        buf[21] = self.compression.code();
        Ok(buf)
    }

    pub fn decode(buf: &[u8; RECORD_HEADER_SIZE]) -> Result<Self> {
        let kind = RecordKind::from_code(buf[0])?;
        let size = read_u24_le([buf[2], buf[3], buf[4]]);
        let name = petscii::decode_padded(&buf[5..20], SHIFTED_SPACE)?;
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(CarError::Format(format!("invalid record name '{name}'")));
        }
        let compression = Compression::from_code(buf[21])?;
        Ok(Self { kind, size, name, compression })
    }

    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        input
            .read_exact(&mut buf)
            .map_err(|e| CarError::from_stream(e, "a record header"))?;
        Self::decode(&buf)
    }
}

impl Record {
    /// Writes this record and, for directories, all descendants in pre-order.
    ///
    /// File payloads are read from their source while writing. A failure part
    /// way through leaves `out` partially written. Trees nested deeper than
    /// [`MAX_DEPTH`] directories are rejected, as the reader would refuse them.
    pub fn serialize<W: Write + ?Sized>(&self, out: &mut W, cancel: &Cancel) -> Result<()> {
        write_record(self, out, cancel, 0)
    }

    /// Reads one record (recursively, for directories) and hands its contents
    /// to `sink`. `parent` is the archive-relative path of the enclosing directory.
    pub fn deserialize<R, M>(input: &mut R, parent: &Path, sink: &mut M, cancel: &Cancel) -> Result<Record>
    where
        R: Read + ?Sized,
        M: Materializer,
    {
        read_record(input, parent, sink, cancel, 0)
    }
}

/// `read` that retries on `Interrupted`.
fn read_some<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn write_record<W: Write + ?Sized>(record: &Record, out: &mut W, cancel: &Cancel, depth: usize) -> Result<()> {
    cancel.check()?;
    match record {
        Record::File(file) => serialize_file(file, out, cancel),
        Record::Directory(dir) => {
            if depth >= MAX_DEPTH {
                return Err(CarError::Validation(format!(
                    "'{}' is nested deeper than {MAX_DEPTH} directories",
                    dir.name()
                )));
            }
            let header = RecordHeader {
                kind: RecordKind::Directory,
                size: dir.size(),
                name: dir.name().to_string(),
                compression: Compression::None,
            };
            out.write_all(&header.encode()?)?;
            debug!(name = dir.name(), children = dir.size(), "wrote directory record");
            for child in dir.children() {
                write_record(child, out, cancel, depth + 1)?;
            }
            Ok(())
        }
    }
}

fn serialize_file<W: Write + ?Sized>(file: &FileRecord, out: &mut W, cancel: &Cancel) -> Result<()> {
    if file.compression() != Compression::None {
        return Err(CarError::Unsupported(format!(
            "{} compression for '{}'",
            file.compression(),
            file.name()
        )));
    }
    let size = file.size()?;
    let mut source = fsx::open(file.source())?;
    let header = RecordHeader {
        kind: file.kind().record_kind(),
        size,
        name: file.name().to_string(),
        compression: file.compression(),
    };
    out.write_all(&header.encode()?)?;

    let changed = || {
        CarError::Validation(format!(
            "'{}' changed size while being archived",
            file.source().display()
        ))
    };
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        cancel.check()?;
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = read_some(&mut source, &mut buf[..want]).map_err(|e| CarError::io(e, file.source()))?;
        if n == 0 {
            return Err(changed());
        }
        out.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    if read_some(&mut source, &mut buf[..1]).map_err(|e| CarError::io(e, file.source()))? != 0 {
        return Err(changed());
    }
    debug!(name = file.name(), size, source = %file.source().display(), "wrote file record");
    Ok(())
}

fn read_record<R, M>(input: &mut R, parent: &Path, sink: &mut M, cancel: &Cancel, depth: usize) -> Result<Record>
where
    R: Read + ?Sized,
    M: Materializer,
{
    cancel.check()?;
    let header = RecordHeader::read_from(input)?;
    let rel = parent.join(&header.name);
    debug!(path = %rel.display(), kind = ?header.kind, size = header.size, "read record header");

    let file_kind = match header.kind {
        RecordKind::Directory => {
            if depth >= MAX_DEPTH {
                return Err(CarError::Format(format!(
                    "'{}' is nested deeper than {MAX_DEPTH} directories",
                    rel.display()
                )));
            }
            sink.create_dir(&rel)?;
            let mut dir = DirectoryRecord::new(header.name)?;
            for _ in 0..header.size {
                let child = read_record(input, &rel, sink, cancel, depth + 1)?;
                if dir.child(child.name()).is_some() {
                    return Err(CarError::Format(format!(
                        "'{}' contains '{}' twice",
                        rel.display(),
                        child.name()
                    )));
                }
                dir.add_child(child)?;
            }
            return Ok(Record::Directory(dir));
        }
        RecordKind::Prg => FileKind::Prg,
        RecordKind::Seq => FileKind::Seq,
    };

    if header.compression != Compression::None {
        return Err(CarError::Unsupported(format!(
            "{} compression for '{}'",
            header.compression,
            rel.display()
        )));
    }

    let mut file = sink.create_file(&rel)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    while copied < header.size {
        cancel.check()?;
        let want = (header.size - copied).min(CHUNK_SIZE as u64) as usize;
        let n = read_some(input, &mut buf[..want]).map_err(|e| CarError::from_stream(e, "a file payload"))?;
        if n == 0 {
            // `file` is dropped uncommitted, so nothing is published for this record
            return Err(CarError::TruncatedArchive(format!(
                "'{}' declares {} bytes but the stream ended after {copied}",
                rel.display(),
                header.size
            )));
        }
        file.write_all(&buf[..n]).map_err(|e| CarError::io(e, &rel))?;
        copied += n as u64;
    }
    let source = file.commit()?;
    let record = FileRecord::new(file_kind, header.name, source, header.compression)?;
    Ok(Record::File(record))
}
