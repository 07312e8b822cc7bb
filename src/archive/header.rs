//! The fixed 48-byte archive prologue.
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 1    | archive type                            |
//! | 1      | 10   | magic, `C64Archive` in PETSCII          |
//! | 11     | 1    | format version (2)                      |
//! | 12     | 5    | timestamp: year-1900, month, day, hour, minute |
//! | 17     | 31   | note, PETSCII, padded with `0x00`       |

use std::fmt;
use std::io::{Read, Write};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CarError, Result};
use crate::petscii;

pub const MAGIC: &str = "C64Archive";
pub const MAGIC_SIZE: usize = 10;
pub const VERSION: u8 = 2;
pub const HEADER_SIZE: usize = 48;
pub const MAX_NOTE_SIZE: usize = 31;

const NOTE_PAD: u8 = 0x00;

/// What the archive is meant for on the target machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    #[default]
    General,
    Restore,
    Install,
}

impl ArchiveType {
    pub fn code(self) -> u8 {
        match self {
            ArchiveType::General => 0,
            ArchiveType::Restore => 1,
            ArchiveType::Install => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ArchiveType::General),
            1 => Ok(ArchiveType::Restore),
            2 => Ok(ArchiveType::Install),
            other => Err(CarError::Format(format!("unknown archive type {other}"))),
        }
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveType::General => "general",
            ArchiveType::Restore => "restore",
            ArchiveType::Install => "install",
        })
    }
}

/// Minute-resolution creation time.
///
/// Only the year is checked; month, day, hour and minute are stored as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
}

impl Timestamp {
    pub const SIZE: usize = 5;
    pub const MIN_YEAR: u16 = 1900;
    pub const MAX_YEAR: u16 = 1900 + u8::MAX as u16;

    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8) -> Result<Self> {
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(CarError::Validation(format!(
                "year {year} is outside {}..={}",
                Self::MIN_YEAR,
                Self::MAX_YEAR
            )));
        }
        Ok(Self { year, month, day, hour, minute })
    }

    pub fn from_datetime<T: Datelike + Timelike>(dt: &T) -> Result<Self> {
        let year = u16::try_from(dt.year())
            .map_err(|_| CarError::Validation(format!("year {} is before {}", dt.year(), Self::MIN_YEAR)))?;
        Self::new(year, dt.month() as u8, dt.day() as u8, dt.hour() as u8, dt.minute() as u8)
    }

    pub fn now() -> Result<Self> {
        Self::from_datetime(&Utc::now())
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// The calendar time, if the stored fields form one.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, 0)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        [(self.year - Self::MIN_YEAR) as u8, self.month, self.day, self.hour, self.minute]
    }

    pub fn decode(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            year: Self::MIN_YEAR + bytes[0] as u16,
            month: bytes[1],
            day: bytes[2],
            hour: bytes[3],
            minute: bytes[4],
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self { year: Self::MIN_YEAR, month: 0, day: 0, hour: 0, minute: 0 }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}

/// Archive type, creation time and a short note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    archive_type: ArchiveType,
    timestamp: Timestamp,
    note: String,
}

fn validate_note(note: &str) -> Result<()> {
    let len = petscii::encoded_len(note)?;
    if len > MAX_NOTE_SIZE {
        return Err(CarError::Validation(format!(
            "note is {len} bytes, the limit is {MAX_NOTE_SIZE}"
        )));
    }
    Ok(())
}

impl ArchiveHeader {
    pub fn new(archive_type: ArchiveType, timestamp: Timestamp, note: impl Into<String>) -> Result<Self> {
        let note = note.into();
        validate_note(&note)?;
        Ok(Self { archive_type, timestamp, note })
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type
    }

    pub fn set_archive_type(&mut self, archive_type: ArchiveType) {
        self.archive_type = archive_type;
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn set_note(&mut self, note: impl Into<String>) -> Result<()> {
        let note = note.into();
        validate_note(&note)?;
        self.note = note;
        Ok(())
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        let magic = petscii::encode(MAGIC)?;
        let note = petscii::encode_padded(&self.note, MAX_NOTE_SIZE, NOTE_PAD, "note")?;

        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.archive_type.code();
        buf[1..11].copy_from_slice(&magic);
        buf[11] = VERSION;
        buf[12..17].copy_from_slice(&self.timestamp.encode());
        buf[17..].copy_from_slice(&note);
        Ok(buf)
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic = &buf[1..1 + MAGIC_SIZE];
        if magic != petscii::encode(MAGIC)?.as_slice() {
            return Err(CarError::Format("not a C64 OS archive (magic mismatch)".into()));
        }
        if buf[11] != VERSION {
            return Err(CarError::Format(format!(
                "unsupported archive version {}, expected {VERSION}",
                buf[11]
            )));
        }
        let archive_type = ArchiveType::from_code(buf[0])?;
        let timestamp = Timestamp::decode([buf[12], buf[13], buf[14], buf[15], buf[16]]);
        let note = petscii::decode_padded(&buf[17..], NOTE_PAD)?;
        Ok(Self { archive_type, timestamp, note })
    }

    pub fn serialize<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.encode()?)?;
        Ok(())
    }

    pub fn deserialize<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        input
            .read_exact(&mut buf)
            .map_err(|e| CarError::from_stream(e, "the archive header"))?;
        Self::decode(&buf)
    }
}
