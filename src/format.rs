//! # The PhragDat `.dat` Format
//!
//! All integers are little-endian.
//!
//! ## Embedded layout
//!
//! ```text
//! 0   "PHRDAT"                     6 bytes magic
//! 6   major, minor                 1 byte each
//! 8   dir_list_addr                u64
//! 16  file_index_addr              u64
//! 24  file_data_addr               u64
//! 32  directory list               per dir:  u16 len, path bytes
//! ..  file index                   per file: u16 len, path bytes, u64 address, u64 length
//! ..  file data                    raw bytes, back-to-back, index order
//! -8  total file size              u64, includes these 8 bytes
//! ```
//!
//! ## Sidecar layout
//!
//! An 8-byte header (magic + version) followed by every file's bytes, each
//! followed by one `0xFF` pad byte. Addresses and lengths live in a separate
//! table, see [`crate::index`].

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiverError, Result};

pub const MAGIC: &[u8; 6] = b"PHRDAT";
pub const ADDRESS_SIZE: u64 = 8;
/// Magic plus version bytes.
pub const BASE_HEADER_LEN: u64 = 8;
/// Base header plus the three section addresses.
pub const EMBEDDED_HEADER_LEN: u64 = BASE_HEADER_LEN + 3 * ADDRESS_SIZE;
pub const TRAILER_LEN: u64 = ADDRESS_SIZE;
/// Written after every file in the sidecar layout.
pub const PAD_BYTE: u8 = 0xFF;
pub const MAX_PATH_LEN: usize = u16::MAX as usize;

/// The format version this build reads and writes.
pub const CURRENT_VERSION: FormatVersion = FormatVersion { major: 5, minor: 0 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
}

impl FormatVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// A reader can open archives of its own major version and any minor
    /// version up to its own.
    pub fn can_read(self, archive: FormatVersion) -> bool {
        archive.major == self.major && archive.minor <= self.minor
    }

    pub fn check_readable(self, archive: FormatVersion) -> Result<()> {
        if self.can_read(archive) {
            Ok(())
        } else {
            Err(ArchiverError::VersionMismatch {
                found: archive,
                supported: self,
            })
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Absolute offsets of the three sections of an embedded-layout archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionAddrs {
    pub dir_list: u64,
    pub file_index: u64,
    pub file_data: u64,
}

/// One decoded entry of an archive's file table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFileRecord {
    pub archive_path: String,
    pub address: u64,
    pub length: u64,
}

pub fn encode_header(version: FormatVersion, sections: Option<SectionAddrs>) -> Vec<u8> {
    let mut out = Vec::with_capacity(EMBEDDED_HEADER_LEN as usize);
    out.extend_from_slice(MAGIC);
    out.push(version.major);
    out.push(version.minor);
    if let Some(s) = sections {
        out.extend_from_slice(&s.dir_list.to_le_bytes());
        out.extend_from_slice(&s.file_index.to_le_bytes());
        out.extend_from_slice(&s.file_data.to_le_bytes());
    }
    out
}

/// Checks the magic tag and returns the stored version.
pub fn decode_base_header(bytes: &[u8; BASE_HEADER_LEN as usize], archive: &Path) -> Result<FormatVersion> {
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(ArchiverError::corrupt(archive, "magic tag mismatch, not a PhragDat archive"));
    }
    Ok(FormatVersion::new(bytes[6], bytes[7]))
}

pub fn decode_section_addrs(bytes: &[u8; 3 * ADDRESS_SIZE as usize]) -> SectionAddrs {
    let word = |i: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
        u64::from_le_bytes(b)
    };
    SectionAddrs {
        dir_list: word(0),
        file_index: word(1),
        file_data: word(2),
    }
}

/// Record paths carry a u16 length prefix.
pub fn check_path_len(path: &str) -> Result<u16> {
    u16::try_from(path.len()).map_err(|_| ArchiverError::PathTooLong {
        path: path.to_string(),
        len: path.len(),
    })
}

/// Encoded size of one directory-list record.
pub fn dir_record_len(path: &str) -> u64 {
    2 + path.len() as u64
}

/// Encoded size of one file-index record.
pub fn file_record_len(path: &str) -> u64 {
    2 + path.len() as u64 + 2 * ADDRESS_SIZE
}

pub fn encode_dir_record(out: &mut Vec<u8>, path: &str) -> Result<()> {
    let len = check_path_len(path)?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(path.as_bytes());
    Ok(())
}

pub fn encode_file_record(out: &mut Vec<u8>, path: &str, address: u64, length: u64) -> Result<()> {
    encode_dir_record(out, path)?;
    out.extend_from_slice(&address.to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    DirectoryList,
    FileIndex,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    PathLen,
    Path(usize),
    Address,
    Length,
}

/// Decodes the records of one section, reading a length, the path, and for
/// the file index an address and a length, until the section is exhausted.
pub struct SectionDecoder<'a> {
    kind: SectionKind,
    bytes: &'a [u8],
    pos: usize,
    archive: &'a Path,
}

impl<'a> SectionDecoder<'a> {
    pub fn new(kind: SectionKind, bytes: &'a [u8], archive: &'a Path) -> Self {
        Self { kind, bytes, pos: 0, archive }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(ArchiverError::corrupt(
                self.archive,
                format!("{:?} section ends inside a record", self.kind),
            ));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn read_record(&mut self) -> Result<ExtractedFileRecord> {
        let mut record = ExtractedFileRecord {
            archive_path: String::new(),
            address: 0,
            length: 0,
        };
        let mut field = Field::PathLen;
        loop {
            match field {
                Field::PathLen => {
                    let b = self.take(2)?;
                    field = Field::Path(u16::from_le_bytes([b[0], b[1]]) as usize);
                }
                Field::Path(n) => {
                    let raw = self.take(n)?;
                    record.archive_path = String::from_utf8(raw.to_vec())
                        .map_err(|_| ArchiverError::corrupt(self.archive, "entry path is not valid UTF-8"))?;
                    if self.kind == SectionKind::DirectoryList {
                        return Ok(record);
                    }
                    field = Field::Address;
                }
                Field::Address => {
                    record.address = self.take_u64()?;
                    field = Field::Length;
                }
                Field::Length => {
                    record.length = self.take_u64()?;
                    return Ok(record);
                }
            }
        }
    }
}

impl Iterator for SectionDecoder<'_> {
    type Item = Result<ExtractedFileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let record = self.read_record();
        if record.is_err() {
            self.pos = self.bytes.len();
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_are_bit_exact() {
        let sections = SectionAddrs { dir_list: 32, file_index: 0x0102, file_data: 0x0A0B_0C0D };
        let h = encode_header(FormatVersion::new(5, 0), Some(sections));
        assert_eq!(h.len() as u64, EMBEDDED_HEADER_LEN);
        assert_eq!(&h[..8], &[0x50, 0x48, 0x52, 0x44, 0x41, 0x54, 5, 0]);
        assert_eq!(&h[8..16], &[32, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&h[16..18], &[0x02, 0x01]);
        assert_eq!(&h[24..28], &[0x0D, 0x0C, 0x0B, 0x0A]);

        let mut addr_bytes = [0u8; 24];
        addr_bytes.copy_from_slice(&h[8..32]);
        assert_eq!(decode_section_addrs(&addr_bytes), sections);
    }

    #[test]
    fn wrong_magic_is_corrupt() {
        let bytes = *b"PHRDAX\x05\x00";
        let err = decode_base_header(&bytes, Path::new("x.dat")).unwrap_err();
        assert!(matches!(err, ArchiverError::CorruptArchive { .. }));
    }

    #[test]
    fn version_gate_is_forward_minor_compatible_only() {
        let reader = FormatVersion::new(5, 2);
        assert!(reader.can_read(FormatVersion::new(5, 0)));
        assert!(reader.can_read(FormatVersion::new(5, 2)));
        assert!(!reader.can_read(FormatVersion::new(5, 3)));
        assert!(!reader.can_read(FormatVersion::new(4, 0)));
        let err = CURRENT_VERSION.check_readable(FormatVersion::new(6, 0)).unwrap_err();
        assert!(matches!(err, ArchiverError::VersionMismatch { .. }));
    }

    #[test]
    fn decodes_file_index_records() {
        let mut section = Vec::new();
        encode_file_record(&mut section, "sub/b.bin", 77, 4).unwrap();
        encode_file_record(&mut section, "c", 81, 1).unwrap();
        assert_eq!(section.len() as u64, file_record_len("sub/b.bin") + file_record_len("c"));

        let records: Vec<_> = SectionDecoder::new(SectionKind::FileIndex, &section, Path::new("x.dat"))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].archive_path, "sub/b.bin");
        assert_eq!((records[0].address, records[0].length), (77, 4));
        assert_eq!(records[1].archive_path, "c");
    }

    #[test]
    fn decodes_directory_list() {
        let mut section = Vec::new();
        encode_dir_record(&mut section, "sub").unwrap();
        encode_dir_record(&mut section, "sub/deeper").unwrap();
        let dirs: Vec<_> = SectionDecoder::new(SectionKind::DirectoryList, &section, Path::new("x.dat"))
            .map(|r| r.map(|r| r.archive_path))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(dirs, vec!["sub", "sub/deeper"]);
    }

    #[test]
    fn section_ending_mid_record_is_corrupt() {
        let mut section = Vec::new();
        encode_file_record(&mut section, "a.bin", 40, 3).unwrap();
        section.pop();
        let mut decoder = SectionDecoder::new(SectionKind::FileIndex, &section, Path::new("x.dat"));
        assert!(matches!(decoder.next(), Some(Err(ArchiverError::CorruptArchive { .. }))));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn overlong_path_is_rejected() {
        let long = "x".repeat(MAX_PATH_LEN + 1);
        let err = encode_dir_record(&mut Vec::new(), &long).unwrap_err();
        assert!(matches!(err, ArchiverError::PathTooLong { .. }));
    }
}
