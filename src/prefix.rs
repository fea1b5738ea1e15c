//! Vendor prefix: a tag-length-value record list at the start of an image.
//!
//! Some vendors embed metadata (device GUID, build timestamp, ...) at the
//! very beginning of the firmware body. The list is independent of the DFU
//! suffix: it lives in the image body, not inside the trailer.
//!
//! Wire format, repeated until a record with tag `0`:
//!
//! ```text
//! byte 0    size   (1 + value length)
//! byte 1    tag    (0 = terminator)
//! bytes     value  (size - 1 bytes)
//! ```
//!
//! The terminator's value bytes only serve as alignment padding.

use crate::{DfuError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Tag reserved for the terminating record.
pub const TAG_END: u8 = 0;

/// Device GUID, reported as lowercase hex.
pub const TAG_DEVICE_GUID: u8 = 1;

/// Firmware build time, 32-bit little-endian seconds since the Unix epoch.
pub const TAG_FW_TIMESTAMP: u8 = 2;

/// Largest value a single record can carry (the size byte also counts the tag).
pub const MAX_VALUE_LEN: usize = u8::MAX as usize - 1;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A single non-terminator record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl Record {
    /// Encoded size of this record (size byte + tag byte + value).
    pub fn encoded_len(&self) -> usize {
        2 + self.value.len()
    }

    /// Value as a 32-bit little-endian timestamp, if it is exactly 4 bytes.
    pub fn as_timestamp(&self) -> Option<u32> {
        <[u8; 4]>::try_from(self.value.as_slice())
            .ok()
            .map(u32::from_le_bytes)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.push((1 + self.value.len()) as u8);
        out.push(self.tag);
        out.extend_from_slice(&self.value);
    }
}

/// An ordered list of prefix records.
///
/// Order matters: lookups return the first record with a given tag, and
/// duplicate tags are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefix {
    records: Vec<Record>,
    /// Bytes consumed by [`Prefix::parse`], terminator included. Zero for
    /// lists built in memory.
    parsed_len: usize,
}

impl Prefix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a record list from the start of `data`.
    ///
    /// Parsing stops after the first terminator; anything behind it is
    /// ignored. Running out of input before a terminator is found is an
    /// error, never a silent truncation.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut records = Vec::new();
        let mut offset = 0usize;

        loop {
            if offset + 2 > data.len() {
                return Err(DfuError::MalformedTlv { offset });
            }
            let size = data[offset] as usize;
            let tag = data[offset + 1];

            // A zero size byte still has its tag read, but the record only
            // occupies the size byte itself.
            let mut value_end = offset + 1 + size;
            if value_end > data.len() {
                // Terminator padding may run off the end of the buffer.
                if tag != TAG_END {
                    return Err(DfuError::MalformedTlv { offset });
                }
                value_end = data.len();
            }
            let value_start = (offset + 2).min(value_end);
            let value = &data[value_start..value_end];

            log::trace!(
                "prefix record at 0x{offset:x}: tag={tag} len={}",
                value.len()
            );

            offset = value_end;
            if tag == TAG_END {
                break;
            }
            records.push(Record {
                tag,
                value: value.to_vec(),
            });
        }

        Ok(Self {
            records,
            parsed_len: offset,
        })
    }

    /// Append a record. Tag `0` is reserved for the terminator.
    pub fn push(&mut self, tag: u8, value: impl Into<Vec<u8>>) -> Result<()> {
        let value = value.into();
        if tag == TAG_END {
            return Err(DfuError::ReservedTag);
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(DfuError::TlvValueTooLong {
                tag,
                len: value.len(),
            });
        }
        self.records.push(Record { tag, value });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.parsed_len = 0;
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of bytes the list occupied in the buffer it was parsed from.
    pub fn parsed_len(&self) -> usize {
        self.parsed_len
    }

    /// Value of the first record carrying `tag`.
    pub fn get(&self, tag: u8) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|r| r.tag == tag)
            .map(|r| r.value.as_slice())
    }

    /// Device GUID as lowercase hex.
    pub fn device_guid(&self) -> Option<String> {
        self.get(TAG_DEVICE_GUID).map(hex::encode)
    }

    /// Firmware timestamp in seconds since the Unix epoch.
    pub fn fw_timestamp(&self) -> Option<u32> {
        self.records
            .iter()
            .find(|r| r.tag == TAG_FW_TIMESTAMP)
            .and_then(Record::as_timestamp)
    }

    /// Encode the list, terminator included.
    ///
    /// With `padding`, the total length is rounded up to a multiple of it by
    /// widening the terminator's value. Fill that does not fit into the
    /// terminator follows it as raw zero bytes.
    pub fn to_bytes(&self, padding: Option<usize>) -> Vec<u8> {
        let body_len: usize = self.records.iter().map(Record::encoded_len).sum();
        let unpadded = body_len + 2;

        let fill = match padding {
            Some(align) if align > 1 => match unpadded % align {
                0 => 0,
                rem => align - rem,
            },
            _ => 0,
        };
        let widen = fill.min(MAX_VALUE_LEN);

        let mut out = Vec::with_capacity(unpadded + fill);
        for record in &self.records {
            record.write_to(&mut out);
        }
        out.push((1 + widen) as u8);
        out.push(TAG_END);
        out.resize(unpadded + fill, 0);
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
