//! Common utilities and types module.
// Shared constants and the cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CarError, Result};

/// Payloads are copied between streams in chunks of this size.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Largest value a 3-byte little-endian size field can hold.
pub const MAX_RECORD_SIZE: u64 = 0xFF_FFFF;

/// A cloneable flag that aborts a long-running serialize or deserialize.
///
/// Checks happen between records and between payload chunks, so an aborted
/// operation stops at a chunk boundary and returns [`CarError::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CarError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Writes `value` as a 3-byte little-endian integer.
pub(crate) fn u24_le(value: u64) -> [u8; 3] {
    let b = (value as u32).to_le_bytes();
    [b[0], b[1], b[2]]
}

pub(crate) fn read_u24_le(bytes: [u8; 3]) -> u64 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) as u64
}
