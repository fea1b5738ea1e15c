//! # dfusuffix
//!
//! A Rust library for adding, verifying and removing USB DFU suffixes on
//! firmware images.
//!
//! A DFU suffix is a 16-byte (or longer) trailer appended to a firmware image.
//! It carries the vendor/product/device identifiers the image is meant for and
//! a CRC-32 over the whole file. Some images additionally start with a vendor
//! prefix, a small tag-length-value list (see [`prefix`]).
//!
//! ## Example
//!
//! ```no_run
//! use dfusuffix::DeviceIds;
//!
//! let ids: DeviceIds = "1234:5678:0001".parse().unwrap();
//! dfusuffix::add_suffix("firmware.bin", "firmware.dfu", ids, false).unwrap();
//!
//! let report = dfusuffix::verify_suffix("firmware.dfu").unwrap();
//! assert_eq!(report.suffix.id_vendor, 0x1234);
//! ```

pub mod prefix;

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

use crc32fast::Hasher;
use log::{debug, info};
use thiserror::Error;

pub use prefix::{Prefix, Record};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Signature bytes of a DFU suffix ("UFD", stored reversed from "DFU").
pub const DFU_SIGNATURE: [u8; 3] = [0x55, 0x46, 0x44];

/// Size of a suffix without vendor-specific extra bytes.
pub const DFU_SUFFIX_SIZE: usize = 16;

/// Largest `extra` payload that still fits the one-byte length field.
pub const DFU_MAX_EXTRA_LEN: usize = u8::MAX as usize - DFU_SUFFIX_SIZE;

/// DFU specification release written into new suffixes.
pub const DFU_VERSION_1_0: u16 = 0x0100;

/// Running seed for a fresh checksum.
pub const DFU_CRC_INIT: u32 = 0xffff_ffff;

/// Identifier value meaning "unspecified" / "any".
pub const ID_ANY: u16 = 0xffff;

/// Vendor/product pair whose images carry a vendor prefix.
pub const PREFIX_VENDOR_ID: u16 = 0x4a61;
pub const PREFIX_PRODUCT_ID: u16 = 0x679c;

/// Vendor prefix values are dumped up to this many bytes.
const PREFIX_DUMP_LIMIT: usize = 32;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DfuError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("The file doesn't seem to have a suffix.")]
    NotASuffix,

    #[error("There seems to be a DFU suffix, but the CRC is invalid.")]
    InvalidCrc { stored: u32, computed: u32 },

    #[error("There already seems to be a suffix in the file (--force to override).")]
    AlreadyHasSuffix,

    #[error("malformed vendor prefix: record at offset {offset} runs past the end of the file")]
    MalformedTlv { offset: usize },

    #[error("Invalid value: {0}")]
    InvalidVidPid(String),

    #[error("--vidpid must be either vid:pid or vid:pid:rev")]
    VidPidArity,

    #[error("suffix extra data too long ({len} bytes, at most {DFU_MAX_EXTRA_LEN})")]
    ExtraTooLong { len: usize },

    #[error("prefix value for tag {tag} too long ({len} bytes, at most {})", prefix::MAX_VALUE_LEN)]
    TlvValueTooLong { tag: u8, len: usize },

    #[error("prefix tag 0 is reserved for the terminator")]
    ReservedTag,
}

impl DfuError {
    /// Process exit code for this failure.
    ///
    /// A bad checksum gets its own code so scripts can tell a corrupted
    /// suffix from a missing one.
    pub fn exit_code(&self) -> i32 {
        match self {
            DfuError::InvalidCrc { .. } => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, DfuError>;

// ---------------------------------------------------------------------------
// CRC-32 helpers
// ---------------------------------------------------------------------------

/// Continue a DFU checksum over `data`, starting from the running value
/// `seed`.
///
/// This is the standard CRC-32 (IEEE 802.3) register without the final
/// inversion, which is what the DFU specification stores. Chaining holds:
/// `crc32_update(crc32_update(DFU_CRC_INIT, a), b)` equals the checksum of
/// `a` followed by `b`.
pub fn crc32_update(seed: u32, data: &[u8]) -> u32 {
    let mut h = Hasher::new_with_initial(!seed);
    h.update(data);
    !h.finalize()
}

/// DFU checksum of a single buffer.
pub fn dfu_crc(data: &[u8]) -> u32 {
    crc32_update(DFU_CRC_INIT, data)
}

// ---------------------------------------------------------------------------
// Device identifiers
// ---------------------------------------------------------------------------

/// Vendor, product and device release written into a new suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIds {
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
}

impl Default for DeviceIds {
    fn default() -> Self {
        Self {
            id_vendor: ID_ANY,
            id_product: ID_ANY,
            bcd_device: ID_ANY,
        }
    }
}

impl FromStr for DeviceIds {
    type Err = DfuError;

    /// Parse `vid:pid` or `vid:pid:rev`, all hexadecimal.
    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(':')
            .map(parse_hex_u16)
            .collect::<Option<Vec<u16>>>()
            .ok_or_else(|| DfuError::InvalidVidPid(s.to_string()))?;

        match values[..] {
            [id_vendor, id_product] => Ok(Self {
                id_vendor,
                id_product,
                bcd_device: ID_ANY,
            }),
            [id_vendor, id_product, bcd_device] => Ok(Self {
                id_vendor,
                id_product,
                bcd_device,
            }),
            _ => Err(DfuError::VidPidArity),
        }
    }
}

impl fmt::Display for DeviceIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}:{:04x}",
            self.id_vendor, self.id_product, self.bcd_device
        )
    }
}

fn parse_hex_u16(s: &str) -> Option<u16> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(s, 16).ok()
}

// ---------------------------------------------------------------------------
// DFU suffix (little-endian on disk, anchored at the end of the file)
// ---------------------------------------------------------------------------

/// The DFU suffix trailer.
///
/// Layout, counted back from the end of the file:
///
/// ```text
/// -16-N  extra      N bytes (vendor specific)
/// -16    bcdDevice  u16
/// -14    idProduct  u16
/// -12    idVendor   u16
/// -10    bcdDFU     u16
///  -8    signature  "UFD"
///  -5    length     u8, 16 + N
///  -4    crc        u32, over everything before it
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suffix {
    /// DFU specification release (BCD)
    pub bcd_dfu: u16,
    pub id_vendor: u16,
    pub id_product: u16,
    /// Device release number (BCD)
    pub bcd_device: u16,
    /// Vendor-specific bytes stored in front of the fixed fields
    pub extra: Vec<u8>,
    /// Checksum as stored in the file; zero for a suffix not yet written
    pub crc: u32,
}

impl Default for Suffix {
    fn default() -> Self {
        Self::new(DeviceIds::default())
    }
}

impl Suffix {
    pub fn new(ids: DeviceIds) -> Self {
        Self {
            bcd_dfu: DFU_VERSION_1_0,
            id_vendor: ids.id_vendor,
            id_product: ids.id_product,
            bcd_device: ids.bcd_device,
            extra: Vec::new(),
            crc: 0,
        }
    }

    pub fn ids(&self) -> DeviceIds {
        DeviceIds {
            id_vendor: self.id_vendor,
            id_product: self.id_product,
            bcd_device: self.bcd_device,
        }
    }

    /// Total size of the trailer, extra bytes included.
    pub fn total_len(&self) -> usize {
        DFU_SUFFIX_SIZE + self.extra.len()
    }

    /// Whether the identifiers select the vendor prefix.
    pub fn has_vendor_prefix(&self) -> bool {
        (self.id_vendor, self.id_product) == (PREFIX_VENDOR_ID, PREFIX_PRODUCT_ID)
    }

    /// Parse the suffix at the end of `data`.
    ///
    /// Structural checks always run: minimum size, signature, and a length
    /// field within `16..=data.len()`. With `verify_crc` the checksum is
    /// recomputed as well.
    pub fn parse(data: &[u8], verify_crc: bool) -> Result<Self> {
        if data.len() < DFU_SUFFIX_SIZE {
            return Err(DfuError::NotASuffix);
        }
        let tail = &data[data.len() - DFU_SUFFIX_SIZE..];

        if tail[8..11] != DFU_SIGNATURE {
            return Err(DfuError::NotASuffix);
        }
        let length = tail[11] as usize;
        if length < DFU_SUFFIX_SIZE || length > data.len() {
            debug!("suffix length field {length} out of range");
            return Err(DfuError::NotASuffix);
        }

        let body_end = data.len() - length;
        let suffix = Self {
            bcd_device: get_u16(tail, 0),
            id_product: get_u16(tail, 2),
            id_vendor: get_u16(tail, 4),
            bcd_dfu: get_u16(tail, 6),
            extra: data[body_end..data.len() - DFU_SUFFIX_SIZE].to_vec(),
            crc: get_u32(tail, 12),
        };

        if verify_crc {
            let computed = suffix.checksum(&data[..body_end])?;
            if computed != suffix.crc {
                debug!(
                    "suffix crc mismatch: stored 0x{:08x}, computed 0x{:08x}",
                    suffix.crc, computed
                );
                return Err(DfuError::InvalidCrc {
                    stored: suffix.crc,
                    computed,
                });
            }
        }

        Ok(suffix)
    }

    /// Append this suffix to `body`, computing a fresh checksum.
    pub fn append_to(&self, body: &[u8]) -> Result<Vec<u8>> {
        let fields = self.field_block()?;
        let crc = crc32_update(dfu_crc(body), &fields);

        let mut image = Vec::with_capacity(body.len() + fields.len() + 4);
        image.extend_from_slice(body);
        image.extend_from_slice(&fields);
        image.extend_from_slice(&crc.to_le_bytes());
        Ok(image)
    }

    /// Checksum of `body` followed by this suffix minus its crc field.
    fn checksum(&self, body: &[u8]) -> Result<u32> {
        let crc = dfu_crc(body);
        Ok(crc32_update(crc, &self.field_block()?))
    }

    /// Everything the suffix writes before the crc field.
    fn field_block(&self) -> Result<Vec<u8>> {
        if self.extra.len() > DFU_MAX_EXTRA_LEN {
            return Err(DfuError::ExtraTooLong {
                len: self.extra.len(),
            });
        }
        let mut buf = Vec::with_capacity(self.total_len() - 4);
        buf.extend_from_slice(&self.extra);
        buf.extend_from_slice(&self.bcd_device.to_le_bytes());
        buf.extend_from_slice(&self.id_product.to_le_bytes());
        buf.extend_from_slice(&self.id_vendor.to_le_bytes());
        buf.extend_from_slice(&self.bcd_dfu.to_le_bytes());
        buf.extend_from_slice(&DFU_SIGNATURE);
        buf.push(self.total_len() as u8);
        Ok(buf)
    }
}

fn get_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn get_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Result of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub suffix: Suffix,
    /// Vendor prefix, only read for images with the matching identifiers.
    pub prefix: Option<Prefix>,
}

/// Append a new suffix to an in-memory image.
///
/// Without `force`, an image whose tail already parses as a suffix (valid
/// checksum or not) is refused. With `force` the old suffix becomes part of
/// the body of the new one.
pub fn add_suffix_bytes(data: &[u8], ids: DeviceIds, force: bool) -> Result<Vec<u8>> {
    if !force && Suffix::parse(data, false).is_ok() {
        return Err(DfuError::AlreadyHasSuffix);
    }
    debug!("adding suffix {ids} to {} byte image", data.len());
    Suffix::new(ids).append_to(data)
}

/// Check the suffix of an in-memory image, including its checksum.
///
/// For the vendor prefix identifiers the prefix is parsed from the start of
/// the whole image; a malformed prefix fails the verification.
pub fn verify_suffix_bytes(data: &[u8]) -> Result<VerifyReport> {
    let suffix = Suffix::parse(data, true)?;
    debug!(
        "valid suffix: {} ({} bytes, crc 0x{:08x})",
        suffix.ids(),
        suffix.total_len(),
        suffix.crc
    );

    let prefix = if suffix.has_vendor_prefix() {
        let prefix = Prefix::parse(data)?;
        debug!(
            "vendor prefix: {} records in {} bytes",
            prefix.records().len(),
            prefix.parsed_len()
        );
        Some(prefix)
    } else {
        None
    };

    Ok(VerifyReport { suffix, prefix })
}

/// Strip the suffix of an in-memory image.
///
/// The checksum must verify; a damaged suffix is never removed.
pub fn remove_suffix_bytes(data: &[u8]) -> Result<&[u8]> {
    let suffix = Suffix::parse(data, true)?;
    debug!("removing {} byte suffix", suffix.total_len());
    Ok(&data[..data.len() - suffix.total_len()])
}

/// Add a suffix to `input`, writing the result to `output`.
///
/// `output` may be the same path as `input`; nothing is written unless the
/// new image was built successfully.
pub fn add_suffix(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    ids: DeviceIds,
    force: bool,
) -> Result<()> {
    let data = fs::read(input.as_ref())?;
    let image = add_suffix_bytes(&data, ids, force)?;
    fs::write(output.as_ref(), &image)?;
    info!(
        "wrote {} ({} bytes)",
        output.as_ref().display(),
        image.len()
    );
    Ok(())
}

/// Verify the suffix of the file at `input`.
pub fn verify_suffix(input: impl AsRef<Path>) -> Result<VerifyReport> {
    let data = fs::read(input.as_ref())?;
    verify_suffix_bytes(&data)
}

/// Remove the suffix from `input`, writing the stripped image to `output`.
pub fn remove_suffix(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
    let data = fs::read(input.as_ref())?;
    let body = remove_suffix_bytes(&data)?;
    fs::write(output.as_ref(), body)?;
    info!("wrote {} ({} bytes)", output.as_ref().display(), body.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// One report line for a vendor prefix record.
pub fn describe_record(record: &Record) -> String {
    match (record.tag, record.as_timestamp()) {
        (prefix::TAG_DEVICE_GUID, _) => {
            format!("yb:device_guid = {}", hex::encode(&record.value))
        }
        (prefix::TAG_FW_TIMESTAMP, Some(ts)) => {
            match chrono::DateTime::from_timestamp(i64::from(ts), 0) {
                Some(dt) => format!(
                    "yb:fw_timestamp = {}",
                    dt.with_timezone(&chrono::Local)
                        .format("%a %b %e %H:%M:%S %Y")
                ),
                None => format!("yb:fw_timestamp = (invalid timestamp {ts})"),
            }
        }
        (tag, _) => {
            let shown = &record.value[..record.value.len().min(PREFIX_DUMP_LIMIT)];
            format!("yb:{:04x} = {}", tag, hex::encode_upper(shown))
        }
    }
}

/// Write the verification report, matching the classic dfu-suffix output.
pub fn write_verify_report(out: &mut impl Write, report: &VerifyReport) -> io::Result<()> {
    let suffix = &report.suffix;
    writeln!(out, "idVendor  = 0x{:04x}", suffix.id_vendor)?;
    writeln!(out, "idProduct = 0x{:04x}", suffix.id_product)?;
    writeln!(out, "bcdDevice = 0x{:04x}", suffix.bcd_device)?;

    if let Some(prefix) = &report.prefix {
        for record in prefix.records() {
            writeln!(out, "{}", describe_record(record))?;
        }
    }
    Ok(())
}

/// Print the verification report to `stdout`.
pub fn print_verify_report(report: &VerifyReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_verify_report(&mut lock, report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const IDS: DeviceIds = DeviceIds {
        id_vendor: 0x1234,
        id_product: 0x5678,
        bcd_device: 0x0001,
    };

    fn sample_body() -> Vec<u8> {
        (0u8..=200).collect()
    }

    #[test]
    fn crc_matches_standard_check_value() {
        // CRC-32 check value of "123456789" is 0xcbf43926; DFU stores it
        // without the final inversion.
        assert_eq!(dfu_crc(b"123456789"), !0xcbf4_3926);
        assert_eq!(dfu_crc(b""), DFU_CRC_INIT);
    }

    #[test]
    fn crc_chaining() {
        let a = b"firmware body ";
        let b = b"and trailer";
        let whole = [&a[..], &b[..]].concat();
        assert_eq!(crc32_update(dfu_crc(a), b), dfu_crc(&whole));
        assert_eq!(crc32_update(crc32_update(DFU_CRC_INIT, b""), a), dfu_crc(a));
    }

    #[test]
    fn trailer_layout() {
        let image = Suffix::new(IDS).append_to(b"body").unwrap();
        assert_eq!(image.len(), 4 + 16);
        assert_eq!(&image[..4], b"body");
        assert_eq!(
            &image[4..16],
            &[0x01, 0x00, 0x78, 0x56, 0x34, 0x12, 0x00, 0x01, 0x55, 0x46, 0x44, 0x10]
        );
        let crc = u32::from_le_bytes(image[16..20].try_into().unwrap());
        assert_eq!(crc, dfu_crc(&image[..16]));
    }

    #[test]
    fn parse_roundtrip_with_extra() {
        let mut suffix = Suffix::new(IDS);
        suffix.extra = vec![0xAA, 0xBB, 0xCC];
        let image = suffix.append_to(&sample_body()).unwrap();
        assert_eq!(image[image.len() - 5], 19);

        let parsed = Suffix::parse(&image, true).unwrap();
        assert_eq!(parsed.ids(), IDS);
        assert_eq!(parsed.bcd_dfu, DFU_VERSION_1_0);
        assert_eq!(parsed.extra, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(parsed.total_len(), 19);
        assert_eq!(parsed.crc, dfu_crc(&image[..image.len() - 4]));
    }

    #[test]
    fn suffix_on_empty_body() {
        let image = Suffix::default().append_to(&[]).unwrap();
        let parsed = Suffix::parse(&image, true).unwrap();
        assert_eq!(parsed.ids(), DeviceIds::default());
        assert_eq!(remove_suffix_bytes(&image).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn extra_too_long() {
        let mut suffix = Suffix::new(IDS);
        suffix.extra = vec![0; DFU_MAX_EXTRA_LEN + 1];
        let err = suffix.append_to(b"x").unwrap_err();
        assert!(matches!(err, DfuError::ExtraTooLong { len: 240 }));

        suffix.extra.pop();
        let image = suffix.append_to(b"x").unwrap();
        assert_eq!(image[image.len() - 5], 0xff);
        assert!(Suffix::parse(&image, true).is_ok());
    }

    #[test]
    fn short_or_unsigned_input_is_not_a_suffix() {
        assert!(matches!(
            Suffix::parse(&[0u8; 15], false),
            Err(DfuError::NotASuffix)
        ));
        assert!(matches!(
            Suffix::parse(&[0u8; 64], false),
            Err(DfuError::NotASuffix)
        ));
    }

    #[test]
    fn length_field_bounds() {
        let image = add_suffix_bytes(&sample_body(), IDS, false).unwrap();
        let len_off = image.len() - 5;

        let mut below = image.clone();
        below[len_off] = 0x0f;
        assert!(matches!(Suffix::parse(&below, true), Err(DfuError::NotASuffix)));

        // Bare 16-byte trailer claiming 17 bytes, with a matching crc.
        let mut bare = Suffix::new(IDS).append_to(&[]).unwrap();
        bare[11] = 17;
        let crc = dfu_crc(&bare[..12]);
        bare[12..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(Suffix::parse(&bare, true), Err(DfuError::NotASuffix)));
    }

    #[test]
    fn every_bit_flip_is_detected() {
        let image = add_suffix_bytes(b"tiny firmware", IDS, false).unwrap();
        for byte in 0..image.len() {
            for bit in 0..8 {
                let mut damaged = image.clone();
                damaged[byte] ^= 1 << bit;
                let err = verify_suffix_bytes(&damaged).unwrap_err();
                assert!(
                    matches!(err, DfuError::InvalidCrc { .. } | DfuError::NotASuffix),
                    "byte {byte} bit {bit}: {err:?}"
                );
                if byte < image.len() - 8 || byte >= image.len() - 4 {
                    assert!(matches!(err, DfuError::InvalidCrc { .. }));
                }
            }
        }
    }

    #[test]
    fn add_refuses_existing_suffix() {
        let image = add_suffix_bytes(&sample_body(), IDS, false).unwrap();
        let err = add_suffix_bytes(&image, DeviceIds::default(), false).unwrap_err();
        assert!(matches!(err, DfuError::AlreadyHasSuffix));

        // A structurally valid suffix with a broken crc is still a suffix.
        let mut damaged = image.clone();
        damaged[0] ^= 0xff;
        assert!(matches!(
            add_suffix_bytes(&damaged, IDS, false),
            Err(DfuError::AlreadyHasSuffix)
        ));
    }

    #[test]
    fn forced_add_stacks_a_second_suffix() {
        let first = add_suffix_bytes(&sample_body(), IDS, false).unwrap();
        let second = add_suffix_bytes(&first, DeviceIds::default(), true).unwrap();
        assert_eq!(second.len(), first.len() + 16);
        assert_eq!(&second[..first.len()], &first[..]);

        let outer = Suffix::parse(&second, true).unwrap();
        assert_eq!(outer.total_len(), 16);
        assert_eq!(outer.ids(), DeviceIds::default());
        assert_eq!(remove_suffix_bytes(&second).unwrap(), &first[..]);
    }

    #[test]
    fn remove_restores_body() {
        let body = sample_body();
        let image = add_suffix_bytes(&body, IDS, false).unwrap();
        assert_eq!(remove_suffix_bytes(&image).unwrap(), &body[..]);
    }

    #[test]
    fn remove_refuses_bad_crc() {
        let mut image = add_suffix_bytes(&sample_body(), IDS, false).unwrap();
        let last = image.len() - 1;
        image[last] ^= 0x01;
        let err = remove_suffix_bytes(&image).unwrap_err();
        assert!(matches!(err, DfuError::InvalidCrc { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn verify_reports_ids_without_prefix() {
        let image = add_suffix_bytes(b"body", IDS, false).unwrap();
        let report = verify_suffix_bytes(&image).unwrap();
        assert_eq!(report.suffix.ids(), IDS);
        assert!(report.prefix.is_none());

        let mut out = Vec::new();
        write_verify_report(&mut out, &report).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "idVendor  = 0x1234\nidProduct = 0x5678\nbcdDevice = 0x0001\n"
        );
    }

    fn vendor_ids() -> DeviceIds {
        DeviceIds {
            id_vendor: PREFIX_VENDOR_ID,
            id_product: PREFIX_PRODUCT_ID,
            bcd_device: 0x0102,
        }
    }

    #[test]
    fn verify_reads_vendor_prefix() {
        let mut prefix = Prefix::new();
        prefix
            .push(prefix::TAG_DEVICE_GUID, vec![0x01, 0xab, 0xcd])
            .unwrap();
        prefix
            .push(prefix::TAG_FW_TIMESTAMP, 1_700_000_000u32.to_le_bytes())
            .unwrap();
        prefix.push(0x10, vec![0x5a; 40]).unwrap();
        let mut body = prefix.to_bytes(Some(16));
        body.extend_from_slice(b"firmware code");

        let image = add_suffix_bytes(&body, vendor_ids(), false).unwrap();
        let report = verify_suffix_bytes(&image).unwrap();
        let parsed = report.prefix.as_ref().unwrap();
        assert_eq!(parsed.records(), prefix.records());

        let mut out = Vec::new();
        write_verify_report(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2], "bcdDevice = 0x0102");
        assert_eq!(lines[3], "yb:device_guid = 01abcd");
        assert!(lines[4].starts_with("yb:fw_timestamp = "));
        assert!(lines[4].ends_with("2023"));
        assert_eq!(parsed.fw_timestamp(), Some(1_700_000_000));
        assert_eq!(parsed.records()[1].as_timestamp(), parsed.fw_timestamp());
        assert_eq!(lines[5], format!("yb:0010 = {}", "5A".repeat(32)));
    }

    #[test]
    fn verify_fails_on_malformed_vendor_prefix() {
        // size byte claims more than the whole image holds
        let image = add_suffix_bytes(&[0xff, 0x01, 0x00], vendor_ids(), false).unwrap();
        let err = verify_suffix_bytes(&image).unwrap_err();
        assert!(matches!(err, DfuError::MalformedTlv { offset: 0 }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn odd_timestamp_width_is_dumped() {
        let record = Record {
            tag: prefix::TAG_FW_TIMESTAMP,
            value: vec![0x01, 0x02],
        };
        assert_eq!(describe_record(&record), "yb:0002 = 0102");
    }

    #[test]
    fn vidpid_parsing() {
        assert_eq!("1234:5678:0001".parse::<DeviceIds>().unwrap(), IDS);
        assert_eq!(
            "0x4a61:679C".parse::<DeviceIds>().unwrap(),
            DeviceIds {
                id_vendor: 0x4a61,
                id_product: 0x679c,
                bcd_device: ID_ANY,
            }
        );
        assert_eq!(
            "FFFF:FFFF:FFFF".parse::<DeviceIds>().unwrap(),
            DeviceIds::default()
        );
        assert!(matches!(
            "12345:1".parse::<DeviceIds>(),
            Err(DfuError::InvalidVidPid(_))
        ));
        assert!(matches!(
            "zz:1".parse::<DeviceIds>(),
            Err(DfuError::InvalidVidPid(_))
        ));
        assert!(matches!(
            "1234".parse::<DeviceIds>(),
            Err(DfuError::VidPidArity)
        ));
        assert!(matches!(
            "1:2:3:4".parse::<DeviceIds>(),
            Err(DfuError::VidPidArity)
        ));
        assert_eq!(IDS.to_string(), "1234:5678:0001");
    }

    proptest! {
        #[test]
        fn remove_undoes_add(
            body in proptest::collection::vec(any::<u8>(), 0..512),
            id_vendor in any::<u16>(),
            id_product in any::<u16>(),
            bcd_device in any::<u16>(),
        ) {
            let ids = DeviceIds { id_vendor, id_product, bcd_device };
            let image = add_suffix_bytes(&body, ids, true).unwrap();
            prop_assert_eq!(image.len(), body.len() + DFU_SUFFIX_SIZE);
            prop_assert_eq!(Suffix::parse(&image, true).unwrap().ids(), ids);
            prop_assert_eq!(remove_suffix_bytes(&image).unwrap(), &body[..]);
        }

        #[test]
        fn chained_crc_matches_oneshot(
            data in proptest::collection::vec(any::<u8>(), 0..1024),
            split in any::<usize>(),
        ) {
            let split = if data.is_empty() { 0 } else { split % (data.len() + 1) };
            let (a, b) = data.split_at(split);
            prop_assert_eq!(crc32_update(dfu_crc(a), b), dfu_crc(&data));
        }

        #[test]
        fn single_bit_flip_fails_verification(
            body in proptest::collection::vec(any::<u8>(), 0..256),
            pos in any::<usize>(),
            bit in 0u8..8,
        ) {
            let image = add_suffix_bytes(&body, IDS, true).unwrap();
            let pos = pos % image.len();
            let mut damaged = image.clone();
            damaged[pos] ^= 1 << bit;
            let err = verify_suffix_bytes(&damaged).unwrap_err();
            prop_assert!(
                matches!(err, DfuError::InvalidCrc { .. } | DfuError::NotASuffix),
                "unexpected {:?}",
                err
            );
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(DfuError::NotASuffix.exit_code(), 1);
        assert_eq!(DfuError::AlreadyHasSuffix.exit_code(), 1);
        assert_eq!(DfuError::VidPidArity.exit_code(), 1);
        assert_eq!(
            DfuError::InvalidCrc {
                stored: 0,
                computed: 1
            }
            .exit_code(),
            2
        );
    }
}
