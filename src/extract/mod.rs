//! # Extraction Module
//!
//! Reading archive metadata and extracting files. [`ArchiveReader`] validates
//! an archive and decodes its file table; [`extract`] and [`list`] are the
//! high-level entry points.

mod parallel;

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ArchiverError, IoResultExt, Result};
use crate::format::{
    self, ExtractedFileRecord, FormatVersion, SectionDecoder, SectionKind, ADDRESS_SIZE, BASE_HEADER_LEN,
    CURRENT_VERSION, EMBEDDED_HEADER_LEN, TRAILER_LEN,
};
use crate::index;
use crate::path::{self as apath, SEPARATOR};

pub use self::parallel::ExtractJob;

/// Directories and files recorded in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveContents {
    pub directories: Vec<String>,
    pub files: Vec<ExtractedFileRecord>,
}

/// A reader for `.dat` archives. Opening one checks the magic tag and the
/// format version; the index is read on demand.
pub struct ArchiveReader {
    file: File,
    path: PathBuf,
    len: u64,
    version: FormatVersion,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Err(ArchiverError::InvalidArgument(format!(
                "'{}' is a directory, expected an archive",
                path.display()
            )));
        }
        let mut file = File::open(path).with_path(path)?;
        let len = file.metadata().with_path(path)?.len();
        if len < BASE_HEADER_LEN {
            return Err(ArchiverError::corrupt(path, format!("only {len} bytes, too short for a header")));
        }
        let mut header = [0u8; BASE_HEADER_LEN as usize];
        file.read_exact(&mut header).with_path(path)?;
        let version = format::decode_base_header(&header, path)?;
        CURRENT_VERSION.check_readable(version)?;
        debug!(archive = %path.display(), %version, len, "opened archive");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            version,
        })
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_at(&mut self, start: u64, end: u64) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(start)).with_path(&self.path)?;
        let mut buf = vec![0u8; (end - start) as usize];
        self.file.read_exact(&mut buf).with_path(&self.path)?;
        Ok(buf)
    }

    fn check_bounds(&self, record: &ExtractedFileRecord, data_start: u64, data_end: u64) -> Result<()> {
        let end = record.address.checked_add(record.length);
        match end {
            Some(end) if record.address >= data_start && end <= data_end => Ok(()),
            _ => Err(ArchiverError::corrupt(
                &self.path,
                format!(
                    "'{}' at {}+{} lies outside the file data",
                    record.archive_path, record.address, record.length
                ),
            )),
        }
    }

    /// Validates an embedded-layout archive and decodes its directory list
    /// and file index.
    pub fn read_embedded_index(&mut self) -> Result<ArchiveContents> {
        if self.len < EMBEDDED_HEADER_LEN + TRAILER_LEN {
            return Err(ArchiverError::corrupt(&self.path, "too short for an embedded index"));
        }

        let trailer = self.read_at(self.len - TRAILER_LEN, self.len)?;
        let mut word = [0u8; ADDRESS_SIZE as usize];
        word.copy_from_slice(&trailer);
        let recorded = u64::from_le_bytes(word);
        if recorded != self.len {
            return Err(ArchiverError::corrupt(
                &self.path,
                format!("size check failed: trailer says {recorded} bytes, file has {}", self.len),
            ));
        }

        let addr_bytes = self.read_at(BASE_HEADER_LEN, EMBEDDED_HEADER_LEN)?;
        let mut addrs = [0u8; 3 * ADDRESS_SIZE as usize];
        addrs.copy_from_slice(&addr_bytes);
        let s = format::decode_section_addrs(&addrs);
        let data_end = self.len - TRAILER_LEN;
        if !(EMBEDDED_HEADER_LEN <= s.dir_list
            && s.dir_list <= s.file_index
            && s.file_index <= s.file_data
            && s.file_data <= data_end)
        {
            return Err(ArchiverError::corrupt(&self.path, format!("section addresses out of order: {s:?}")));
        }

        let dir_bytes = self.read_at(s.dir_list, s.file_index)?;
        let directories = SectionDecoder::new(SectionKind::DirectoryList, &dir_bytes, &self.path)
            .map(|r| r.map(|r| r.archive_path))
            .collect::<Result<Vec<_>>>()?;

        let index_bytes = self.read_at(s.file_index, s.file_data)?;
        let files = SectionDecoder::new(SectionKind::FileIndex, &index_bytes, &self.path).collect::<Result<Vec<_>>>()?;
        for record in &files {
            self.check_bounds(record, s.file_data, data_end)?;
        }

        debug!(directories = directories.len(), files = files.len(), "read embedded index");
        Ok(ArchiveContents { directories, files })
    }

    /// Reads the sidecar table at `table` and checks every record against this
    /// archive. Directories are derived from the file paths.
    pub fn read_sidecar_index(&mut self, table: &Path) -> Result<ArchiveContents> {
        let (version, files) = index::read_table(table)?;
        CURRENT_VERSION.check_readable(version)?;
        if version != self.version {
            return Err(ArchiverError::corrupt(
                &self.path,
                format!("sidecar table is v{version}, archive is v{}", self.version),
            ));
        }
        for record in &files {
            self.check_bounds(record, BASE_HEADER_LEN, self.len)?;
        }

        let mut seen = BTreeSet::new();
        let mut directories = Vec::new();
        for record in &files {
            let mut prefix = String::new();
            let parts: Vec<&str> = record.archive_path.split(SEPARATOR).collect();
            for part in &parts[..parts.len().saturating_sub(1)] {
                if !prefix.is_empty() {
                    prefix.push(SEPARATOR);
                }
                prefix.push_str(part);
                if seen.insert(prefix.clone()) {
                    directories.push(prefix.clone());
                }
            }
        }

        debug!(table = %table.display(), files = files.len(), "read sidecar index");
        Ok(ArchiveContents { directories, files })
    }

    /// Reads whichever index applies: the sidecar table when one is given,
    /// the embedded index otherwise.
    pub fn read_index(&mut self, table: Option<&Path>) -> Result<ArchiveContents> {
        match table {
            Some(table) => self.read_sidecar_index(table),
            None => self.read_embedded_index(),
        }
    }
}

/// Which entries an extraction writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    /// Entries whose path contains this string, which ends in `/`.
    Directory(String),
    /// A single file: an exact path match, else the first path containing it.
    File(String),
}

impl Selector {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Selector::All;
        };
        let normalized = apath::normalize(raw);
        let trimmed = normalized.trim_start_matches("./").trim_start_matches(SEPARATOR);
        if trimmed.is_empty() {
            Selector::All
        } else if trimmed.ends_with(SEPARATOR) {
            Selector::Directory(trimmed.to_string())
        } else {
            Selector::File(trimmed.to_string())
        }
    }
}

/// Joins an archive path onto `base`, refusing anything that could escape it.
fn safe_join(base: &Path, archive_path: &str, archive: &Path) -> Result<PathBuf> {
    let rel = Path::new(archive_path);
    let safe = !archive_path.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(ArchiverError::corrupt(archive, format!("unsafe entry path '{archive_path}'")));
    }
    Ok(base.join(rel))
}

/// Directories to create and files to write for one extraction.
#[derive(Debug, Default)]
struct ExtractPlan {
    directories: Vec<PathBuf>,
    jobs: Vec<ExtractJob>,
}

fn plan(contents: ArchiveContents, selector: &Selector, output: &Path, archive: &Path) -> Result<ExtractPlan> {
    let mut plan = ExtractPlan::default();
    match selector {
        Selector::All => {
            for d in &contents.directories {
                plan.directories.push(safe_join(output, d, archive)?);
            }
            for record in contents.files {
                let target = safe_join(output, &record.archive_path, archive)?;
                plan.jobs.push(ExtractJob { record, target });
            }
        }
        Selector::Directory(sel) => {
            for d in &contents.directories {
                if format!("{d}{SEPARATOR}").contains(sel.as_str()) {
                    plan.directories.push(safe_join(output, d, archive)?);
                }
            }
            for record in contents.files {
                if record.archive_path.contains(sel.as_str()) {
                    let target = safe_join(output, &record.archive_path, archive)?;
                    plan.jobs.push(ExtractJob { record, target });
                }
            }
            if plan.directories.is_empty() && plan.jobs.is_empty() {
                return Err(ArchiverError::NotFound { selector: sel.clone() });
            }
        }
        Selector::File(sel) => {
            let position = contents
                .files
                .iter()
                .position(|r| r.archive_path == *sel)
                .or_else(|| contents.files.iter().position(|r| r.archive_path.contains(sel.as_str())));
            let Some(position) = position else {
                return Err(ArchiverError::NotFound { selector: sel.clone() });
            };
            let mut files = contents.files;
            let record = files.swap_remove(position);
            let name = apath::file_name(&record.archive_path).to_string();
            let target = safe_join(output, &name, archive)?;
            plan.jobs.push(ExtractJob { record, target });
        }
    }
    Ok(plan)
}

/// Outcome of a successful [`extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Extracts `archive` into `output`.
///
/// # Arguments
/// * `archive` - Path to the `.dat` archive.
/// * `output` - Destination directory, created if missing.
/// * `table` - Sidecar table; when given the archive is read in the sidecar layout.
/// * `selector` - A file (`name`) or directory (`name/`) to extract instead of everything.
/// * `config` - Supplies the worker count.
///
/// Every check runs before the first file is written. Existing files are
/// never overwritten.
pub fn extract(
    archive: &Path,
    output: &Path,
    table: Option<&Path>,
    selector: Option<&str>,
    config: &Config,
) -> Result<ExtractSummary> {
    if archive.as_os_str().is_empty() {
        return Err(ArchiverError::InvalidArgument("no input archive given".into()));
    }
    if output.as_os_str().is_empty() {
        return Err(ArchiverError::InvalidArgument("no output directory given".into()));
    }

    let mut reader = ArchiveReader::open(archive)?;
    let contents = reader.read_index(table)?;
    drop(reader);

    let selector = Selector::parse(selector);
    let plan = plan(contents, &selector, output, archive)?;

    if output.exists() && !output.is_dir() {
        return Err(ArchiverError::NotADirectory {
            path: output.to_path_buf(),
        });
    }
    if let Some(existing) = plan.jobs.iter().find(|j| j.target.symlink_metadata().is_ok()) {
        return Err(ArchiverError::AlreadyExists {
            path: existing.target.clone(),
        });
    }

    if !output.exists() {
        info!(output = %output.display(), "Directory did not exist, created");
    }
    fs::create_dir_all(output).with_path(output)?;
    let parents: BTreeSet<&Path> = plan
        .jobs
        .iter()
        .filter_map(|j| j.target.parent())
        .chain(plan.directories.iter().map(PathBuf::as_path))
        .collect();
    for dir in parents {
        fs::create_dir_all(dir).with_path(dir)?;
    }

    let threads = config.effective_threads();
    info!(
        archive = %archive.display(),
        files = plan.jobs.len(),
        threads,
        "Extracting {} files to {}",
        plan.jobs.len(),
        output.display()
    );
    parallel::extract_jobs(archive, &plan.jobs, config.threads)?;

    let summary = ExtractSummary {
        files: plan.jobs.len(),
        directories: plan.directories.len(),
        bytes: plan.jobs.iter().map(|j| j.record.length).sum(),
    };
    info!(files = summary.files, bytes = summary.bytes, "Extraction complete");
    Ok(summary)
}

/// Returns the file table of `archive` without extracting anything.
pub fn list(archive: &Path, table: Option<&Path>) -> Result<Vec<ExtractedFileRecord>> {
    let mut reader = ArchiveReader::open(archive)?;
    Ok(reader.read_index(table)?.files)
}
