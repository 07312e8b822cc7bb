//! # C64 OS Archive Format
//!
//! A `.car` file is a 48-byte [`ArchiveHeader`] followed by the manifest's
//! root record, which carries the whole tree in pre-order. There is no index
//! or footer, so archives are written and read strictly front to back.

use std::io::{Read, Write};
use std::path::Path;

use tracing::info;

use crate::common::Cancel;
use crate::error::{CarError, Result};
use crate::extract::{FsMaterializer, Materializer};
use crate::manifest::Manifest;
use crate::record::Record;

pub mod header;

pub use header::{ArchiveHeader, ArchiveType, Timestamp, HEADER_SIZE, MAGIC, MAX_NOTE_SIZE, VERSION};

/// A header paired with the manifest it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    header: ArchiveHeader,
    manifest: Manifest,
}

impl Archive {
    pub fn new(header: ArchiveHeader, manifest: Manifest) -> Self {
        Self { header, manifest }
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ArchiveHeader {
        &mut self.header
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    pub fn into_parts(self) -> (ArchiveHeader, Manifest) {
        (self.header, self.manifest)
    }

    /// Writes the header and the full record tree to `out`.
    pub fn serialize<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        self.serialize_with(out, &Cancel::new())
    }

    /// Like [`Archive::serialize`], stopping with [`CarError::Cancelled`] once
    /// `cancel` is triggered. Bytes already written stay written.
    pub fn serialize_with<W: Write + ?Sized>(&self, out: &mut W, cancel: &Cancel) -> Result<()> {
        let root = self.manifest.root().ok_or(CarError::EmptyManifest)?;
        self.header.serialize(out)?;
        root.serialize(out, cancel)?;
        out.flush()?;
        info!(
            archive_type = %self.header.archive_type(),
            root = root.name(),
            files = self.manifest.files().count(),
            "archive written"
        );
        Ok(())
    }

    /// Reads an archive from `input`, handing directories and file payloads to `sink`.
    pub fn deserialize<R, M>(input: &mut R, sink: &mut M) -> Result<Archive>
    where
        R: Read + ?Sized,
        M: Materializer,
    {
        Self::deserialize_with(input, sink, &Cancel::new())
    }

    pub fn deserialize_with<R, M>(input: &mut R, sink: &mut M, cancel: &Cancel) -> Result<Archive>
    where
        R: Read + ?Sized,
        M: Materializer,
    {
        let header = ArchiveHeader::deserialize(input)?;
        let root = Record::deserialize(input, Path::new(""), sink, cancel)?;
        let manifest = Manifest::with_root(sink.base_dir(), root);
        info!(
            archive_type = %header.archive_type(),
            timestamp = %header.timestamp(),
            files = manifest.files().count(),
            "archive read"
        );
        Ok(Archive { header, manifest })
    }

    /// Reads an archive from `input` and extracts it below `target_dir`.
    pub fn extract<R: Read + ?Sized>(input: &mut R, target_dir: impl AsRef<Path>) -> Result<Archive> {
        let mut sink = FsMaterializer::new(target_dir.as_ref());
        Self::deserialize(input, &mut sink)
    }
}
