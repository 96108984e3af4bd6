//! Sidecar index: a CSV table written next to an archive.
//!
//! ```text
//! "PHRDAT",5,0
//! "sub/b.bin",8,4
//! "sub/c.bin",13,120
//! ```
//!
//! The first row carries the magic tag and format version, every following
//! row one file: archive path, absolute address, length. Text fields are
//! always quoted, numbers never are.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};

use crate::error::{ArchiverError, IoResultExt, Result};
use crate::format::{ExtractedFileRecord, FormatVersion, MAGIC};

fn magic_str() -> &'static str {
    // MAGIC is ASCII.
    std::str::from_utf8(MAGIC).unwrap_or("PHRDAT")
}

/// `field` in double quotes, inner quotes doubled.
fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Writes the table for `records` to `path`, replacing any existing file.
pub fn write_table(path: &Path, version: FormatVersion, records: &[ExtractedFileRecord]) -> Result<()> {
    let file = File::create(path).with_path(path)?;
    // Quoting is done by `quoted`, so a path made of digits still gets quotes.
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_writer(BufWriter::new(file));

    wtr.write_record([quoted(magic_str()), version.major.to_string(), version.minor.to_string()])?;
    for r in records {
        wtr.write_record([quoted(&r.archive_path), r.address.to_string(), r.length.to_string()])?;
    }
    wtr.flush().with_path(path)?;
    Ok(())
}

/// Reads a table written by [`write_table`]. The version is returned as
/// stored; the caller applies the version gate.
pub fn read_table(path: &Path) -> Result<(FormatVersion, Vec<ExtractedFileRecord>)> {
    let file = File::open(path).with_path(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .from_reader(BufReader::new(file));
    let mut rows = rdr.deserialize::<(String, u64, u64)>();

    let (tag, major, minor) = rows
        .next()
        .ok_or_else(|| ArchiverError::corrupt(path, "sidecar table is empty"))??;
    if tag.as_bytes() != MAGIC {
        return Err(ArchiverError::corrupt(path, format!("sidecar table tag is '{tag}'")));
    }
    let (Ok(major), Ok(minor)) = (u8::try_from(major), u8::try_from(minor)) else {
        return Err(ArchiverError::corrupt(path, "sidecar table version out of range"));
    };

    let records = rows
        .map(|row| {
            row.map(|(archive_path, address, length)| ExtractedFileRecord {
                archive_path,
                address,
                length,
            })
        })
        .collect::<std::result::Result<Vec<_>, csv::Error>>()?;

    Ok((FormatVersion::new(major, minor), records))
}
