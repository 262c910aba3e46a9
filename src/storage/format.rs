//! Binary journal layout

use bytemuck::{Pod, Zeroable};
use crc32fast::Hasher;

use crate::{HookError, Result};

/// Journal magic bytes: "PHJRNL\x00\x01"
pub const JOURNAL_MAGIC: [u8; 8] = [0x50, 0x48, 0x4A, 0x52, 0x4E, 0x4C, 0x00, 0x01];

/// Current journal version
pub const JOURNAL_VERSION: u32 = 1;

/// Journal header size
pub const JOURNAL_HEADER_SIZE: usize = 32;

/// Entry header size
pub const ENTRY_HEADER_SIZE: usize = 16;

/// Largest payload a single entry may carry
pub const MAX_PAYLOAD_SIZE: u32 = 1 << 30;

/// Byte range of `header_crc` inside the journal header
const HEADER_CRC_RANGE: std::ops::Range<usize> = 12..16;

/// Journal file header (32 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct JournalHeader {
    /// Magic bytes for file identification
    pub magic: [u8; 8],

    /// Format version
    pub version: u32,

    /// CRC32 of the header with this field zeroed
    pub header_crc: u32,

    /// Creation timestamp (Unix epoch nanoseconds)
    pub created_at: u64,

    /// Reserved
    pub reserved: [u8; 8],
}

static_assertions::const_assert_eq!(std::mem::size_of::<JournalHeader>(), JOURNAL_HEADER_SIZE);

/// Header preceding every journal entry (16 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct EntryHeader {
    /// Payload length in bytes
    pub payload_len: u32,

    /// CRC32 over the kind byte and the payload
    pub crc: u32,

    /// Entry kind discriminant
    pub kind: u8,

    /// Reserved
    pub reserved: [u8; 7],
}

static_assertions::const_assert_eq!(std::mem::size_of::<EntryHeader>(), ENTRY_HEADER_SIZE);

/// Kind of change an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// An endpoint was created
    EndpointCreated = 1,
    /// An endpoint and its requests were deleted
    EndpointDeleted = 2,
    /// A captured request was saved
    RequestSaved = 3,
    /// A captured request was deleted
    RequestDeleted = 4,
}

impl EntryKind {
    /// Parse a stored discriminant
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::EndpointCreated),
            2 => Some(Self::EndpointDeleted),
            3 => Some(Self::RequestSaved),
            4 => Some(Self::RequestDeleted),
            _ => None,
        }
    }
}

impl JournalHeader {
    /// New header stamped with `created_at` and a valid CRC
    #[must_use]
    pub fn new(created_at: u64) -> Self {
        let mut header = Self {
            magic: JOURNAL_MAGIC,
            version: JOURNAL_VERSION,
            header_crc: 0,
            created_at,
            reserved: [0; 8],
        };
        header.header_crc = header.compute_crc();
        header
    }

    /// CRC32 of the header bytes outside the CRC field
    #[must_use]
    pub fn compute_crc(&self) -> u32 {
        let bytes = bytemuck::bytes_of(self);
        let mut hasher = Hasher::new();
        hasher.update(&bytes[..HEADER_CRC_RANGE.start]);
        hasher.update(&bytes[HEADER_CRC_RANGE.end..]);
        hasher.finalize()
    }

    /// Check magic, version and CRC
    ///
    /// # Errors
    ///
    /// Returns error if any of them do not match
    pub fn validate(&self) -> Result<()> {
        if self.magic != JOURNAL_MAGIC {
            return Err(HookError::InvalidFormat(format!(
                "Invalid magic bytes: expected {JOURNAL_MAGIC:?}, got {:?}",
                self.magic
            )));
        }

        if self.version != JOURNAL_VERSION {
            return Err(HookError::InvalidFormat(format!(
                "Unsupported version: {}, expected {JOURNAL_VERSION}",
                self.version
            )));
        }

        let computed = self.compute_crc();
        if computed != self.header_crc {
            return Err(HookError::CorruptedJournal {
                offset: 0,
                expected: self.header_crc,
                actual: computed,
            });
        }

        Ok(())
    }
}

/// CRC32 covering an entry's kind and payload
#[must_use]
pub fn entry_crc(kind: EntryKind, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[kind as u8]);
    hasher.update(payload);
    hasher.finalize()
}

/// Frame `payload` as a complete entry (header followed by payload)
///
/// # Errors
///
/// Returns `DataTooLarge` if the payload exceeds `MAX_PAYLOAD_SIZE`
pub fn frame_entry(kind: EntryKind, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_SIZE)
        .ok_or(HookError::DataTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_SIZE as usize,
        })?;

    let header = EntryHeader {
        payload_len,
        crc: entry_crc(kind, payload),
        kind: kind as u8,
        reserved: [0; 7],
    };

    let mut framed = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len());
    framed.extend_from_slice(bytemuck::bytes_of(&header));
    framed.extend_from_slice(payload);
    Ok(framed)
}
