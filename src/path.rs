//! Path normalization shared by the walker, the exclusion filter and the reader.
//!
//! Every path that ends up inside an archive (or is compared against one) uses
//! `/` as its only separator, with runs of separators collapsed to one.

use std::path::Path;

use crate::error::{ArchiverError, Result};

/// The separator used for every path stored in an archive.
pub const SEPARATOR: char = '/';

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Replaces every maximal run of `/` or `\` with a single `/`.
///
/// Example: `"a\\\\b//c/"` becomes `"a/b/c/"`.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut in_run = false;
    for c in path.chars() {
        if is_separator(c) {
            if !in_run {
                out.push(SEPARATOR);
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Returns `path` relative to `root` as a normalized archive path.
///
/// The result never starts with a separator and never contains `root` itself.
pub fn relativize(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ArchiverError::StripPrefix {
            prefix: root.to_path_buf(),
            path: path.to_path_buf(),
        })?;
    let normalized = normalize(&rel.to_string_lossy());
    Ok(normalized.trim_start_matches(SEPARATOR).to_string())
}

/// Last component of a normalized path, ignoring trailing separators.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches(SEPARATOR)
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or("")
}
