//! # c64car Core Library
//!
//! This crate reads and writes C64 OS `.car` archives: a fixed 48-byte header
//! followed by a tree of PETSCII-named file and directory records.
//!
//! It is used by the `c64car` command-line application, but its public API
//! can also be used to build, inspect and extract archives programmatically.
//!
//! ## Key Modules
//!
//! - [`archive`]: The archive header and whole-archive (de)serialization.
//! - [`manifest`]: The in-memory record tree, path insertion and lookup.
//! - [`record`]: File and directory records and their on-disk layout.
//! - [`extract`]: Where deserialized records end up (disk, memory, nowhere).
//! - [`petscii`]: Text codec for names and notes.
//! - [`config`]: JSON build plans.
//!
//! ## Examples
//!
//! ```no_run
//! use c64car::{Archive, ArchiveHeader, ArchiveType, Compression, Manifest, Timestamp};
//!
//! # fn main() -> c64car::Result<()> {
//! let mut manifest = Manifest::new("build");
//! manifest.insert("app.prg", "/myapp", Compression::None)?;
//! let header = ArchiveHeader::new(ArchiveType::Install, Timestamp::now()?, "my app 1.0")?;
//! let mut out = std::fs::File::create("myapp.car")?;
//! Archive::new(header, manifest).serialize(&mut out)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod error;
pub mod extract;
pub mod fsx;
pub mod manifest;
pub mod petscii;
pub mod record;

pub use archive::{Archive, ArchiveHeader, ArchiveType, Timestamp};
pub use common::Cancel;
pub use error::{CarError, Result};
pub use extract::{FsMaterializer, Materializer, MemoryMaterializer, NullMaterializer, PendingFile};
pub use manifest::Manifest;
pub use record::{Compression, DirectoryRecord, FileKind, FileRecord, Record, RecordKind};
