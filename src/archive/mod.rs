//! # Archive Writer
//!
//! Turns a [`Manifest`] into a `.dat` archive. The layout is planned up front
//! from the manifest alone (every address is known before the first byte is
//! written), then the header, the index sections and the file bytes are
//! streamed out through one buffered writer.

pub mod probe;

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{Config, Layout};
use crate::error::{ArchiverError, IoResultExt, Result};
use crate::exclude::ExclusionRules;
use crate::format::{
    self, ExtractedFileRecord, SectionAddrs, BASE_HEADER_LEN, CURRENT_VERSION, EMBEDDED_HEADER_LEN, PAD_BYTE,
    TRAILER_LEN,
};
use crate::index;
use crate::walk::{walk, Manifest};

use self::probe::Probe;

/// Section addresses and per-file records for one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// `None` for the sidecar layout, which has no sections.
    pub sections: Option<SectionAddrs>,
    pub records: Vec<ExtractedFileRecord>,
}

/// Computes where every file of `manifest` lands in an archive of `layout`.
///
/// Fails with `PathTooLong` if an embedded index record could not hold a
/// path, before anything is written.
pub fn plan(manifest: &Manifest, layout: Layout) -> Result<Plan> {
    let (sections, mut address, pad) = match layout {
        Layout::Embedded => {
            let paths = manifest.directories().iter().chain(manifest.entries().iter().map(|e| &e.archive_path));
            for path in paths {
                format::check_path_len(path)?;
            }
            let dir_list = EMBEDDED_HEADER_LEN;
            let file_index = dir_list
                + manifest
                    .directories()
                    .iter()
                    .map(|d| format::dir_record_len(d))
                    .sum::<u64>();
            let file_data = file_index
                + manifest
                    .entries()
                    .iter()
                    .map(|e| format::file_record_len(&e.archive_path))
                    .sum::<u64>();
            let sections = SectionAddrs {
                dir_list,
                file_index,
                file_data,
            };
            (Some(sections), file_data, 0)
        }
        Layout::Sidecar => (None, BASE_HEADER_LEN, 1),
    };

    let records = manifest
        .entries()
        .iter()
        .map(|e| {
            let record = ExtractedFileRecord {
                archive_path: e.archive_path.clone(),
                address,
                length: e.length,
            };
            address += e.length + pad;
            record
        })
        .collect();

    Ok(Plan { sections, records })
}

/// A writer responsible for constructing a `.dat` archive.
pub struct ArchiveWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    layout: Layout,
    current_offset: u64,
}

impl ArchiveWriter {
    /// Creates a new `ArchiveWriter`.
    ///
    /// # Arguments
    /// * `output_file` - The file handle to write the archive to.
    /// * `path` - Where `output_file` lives, for error reporting.
    /// * `layout` - Embedded or sidecar.
    /// * `buffer_size` - Capacity of the write buffer in bytes.
    pub fn new(output_file: File, path: impl Into<PathBuf>, layout: Layout, buffer_size: usize) -> Self {
        Self {
            writer: BufWriter::with_capacity(buffer_size.max(1), output_file),
            path: path.into(),
            layout,
            current_offset: 0,
        }
    }

    /// Creates (or truncates) the archive at `path`.
    pub fn create(path: &Path, config: &Config) -> Result<Self> {
        let file = File::create(path).with_path(path)?;
        Ok(Self::new(file, path, config.layout, config.buffer_size))
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).with_path(&self.path)?;
        self.current_offset += bytes.len() as u64;
        Ok(())
    }

    /// Writes the header, the index sections (embedded layout) and every
    /// file's bytes. Returns the file records as stored.
    pub fn write_manifest(&mut self, manifest: &Manifest) -> Result<Vec<ExtractedFileRecord>> {
        let plan = plan(manifest, self.layout)?;
        self.write_planned(manifest, plan)
    }

    /// Like [`write_manifest`](Self::write_manifest), for a `plan` already
    /// computed from `manifest` with this writer's layout.
    pub fn write_planned(&mut self, manifest: &Manifest, plan: Plan) -> Result<Vec<ExtractedFileRecord>> {
        self.write_all(&format::encode_header(CURRENT_VERSION, plan.sections))?;

        if let Some(sections) = plan.sections {
            let mut table = Vec::with_capacity((sections.file_data - sections.dir_list) as usize);
            for dir in manifest.directories() {
                format::encode_dir_record(&mut table, dir)?;
            }
            for r in &plan.records {
                format::encode_file_record(&mut table, &r.archive_path, r.address, r.length)?;
            }
            self.write_all(&table)?;
            debug_assert_eq!(self.current_offset, sections.file_data);
        }

        for (entry, record) in manifest.entries().iter().zip(&plan.records) {
            debug_assert_eq!(self.current_offset, record.address);
            debug!(file = %entry.archive_path, address = record.address, length = record.length, "Writing");
            self.copy_entry(&entry.input_path, entry.length)?;
            if self.layout == Layout::Sidecar {
                self.write_all(&[PAD_BYTE])?;
            }
        }

        Ok(plan.records)
    }

    /// Streams exactly `length` bytes of `source` into the archive.
    fn copy_entry(&mut self, source: &Path, length: u64) -> Result<()> {
        let file = File::open(source).with_path(source)?;
        let copied = io::copy(&mut file.take(length), &mut self.writer).with_path(source)?;
        self.current_offset += copied;
        if copied != length {
            return Err(ArchiverError::SourceChanged {
                path: source.to_path_buf(),
                expected: length,
                actual: copied,
            });
        }
        Ok(())
    }

    /// Finalizes the archive, appending the size trailer for the embedded
    /// layout. Returns the total archive size in bytes.
    ///
    /// This method consumes the writer and must be called to produce a valid archive.
    pub fn finalize(mut self) -> Result<u64> {
        if self.layout == Layout::Embedded {
            let total = self.current_offset + TRAILER_LEN;
            self.write_all(&total.to_le_bytes())?;
        }
        self.writer.flush().with_path(&self.path)?;
        Ok(self.current_offset)
    }
}

/// Outcome of a successful [`compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileSummary {
    pub archive: PathBuf,
    pub index: Option<PathBuf>,
    pub files: usize,
    /// Directories below the root.
    pub directories: usize,
    /// Sum of all file lengths.
    pub bytes: u64,
    pub archive_size: u64,
}

/// Directory a path will be created in.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Resolves a user-supplied output path.
///
/// A path whose extension is `ext` names the output file. Anything else is a
/// directory, and the file is named after the input directory.
pub fn resolve_output_path(input: &Path, output: &Path, ext: &str) -> Result<PathBuf> {
    let bare = format!(".{ext}");
    if let Some(name) = output.file_name().and_then(|n| n.to_str()) {
        if name.eq_ignore_ascii_case(&bare) {
            return Err(ArchiverError::InvalidArgument(format!(
                "output '{}' has no name before '{bare}'",
                output.display()
            )));
        }
    }
    let has_ext = output
        .extension()
        .map_or(false, |e| e.to_string_lossy().eq_ignore_ascii_case(ext));
    if has_ext {
        return Ok(output.to_path_buf());
    }

    let name = match input.file_name() {
        Some(n) => n.to_os_string(),
        None => input
            .canonicalize()
            .with_path(input)?
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| {
                ArchiverError::InvalidArgument(format!("cannot derive an archive name from '{}'", input.display()))
            })?,
    };
    let mut file_name = name;
    file_name.push(&bare);
    Ok(output.join(file_name))
}

/// Archives the tree at `input` into `archive`.
///
/// The sidecar table is written to `index_path` when one is given. The
/// sidecar layout always gets one, next to the archive with a `.csv`
/// extension by default.
pub fn compile(
    input: &Path,
    archive: &Path,
    index_path: Option<&Path>,
    exclusions: Option<&Path>,
    config: &Config,
) -> Result<CompileSummary> {
    if archive.as_os_str().is_empty() {
        return Err(ArchiverError::InvalidArgument("no output archive given".into()));
    }
    if !input.is_dir() {
        return Err(ArchiverError::NotADirectory {
            path: input.to_path_buf(),
        });
    }
    let archive_dir = parent_dir(archive);
    if !archive_dir.is_dir() {
        return Err(ArchiverError::NotADirectory {
            path: archive_dir.to_path_buf(),
        });
    }

    let index_path = match config.layout {
        Layout::Embedded => index_path.map(Path::to_path_buf),
        Layout::Sidecar => Some(index_path.map_or_else(|| archive.with_extension("csv"), Path::to_path_buf)),
    };
    let mut probe_dirs = vec![archive_dir.to_path_buf()];
    if let Some(index_dir) = index_path.as_deref().map(parent_dir) {
        if !index_dir.is_dir() {
            return Err(ArchiverError::NotADirectory {
                path: index_dir.to_path_buf(),
            });
        }
        if index_dir != archive_dir {
            probe_dirs.push(index_dir.to_path_buf());
        }
    }

    info!(input = %input.display(), output = %archive.display(), "Compiling");
    let rules = ExclusionRules::load(exclusions);

    let manifest = {
        let mut probes = scopeguard::guard(Vec::with_capacity(probe_dirs.len()), |probes: Vec<Probe>| {
            probes.iter().for_each(Probe::remove)
        });
        for dir in &probe_dirs {
            probes.push(Probe::place(dir)?);
        }
        let manifest = walk(input, &rules)?;
        if let Some(probe) = probe::find_in(&manifest, &probes) {
            return Err(ArchiverError::OutputInsideInput {
                output: probe.dir().to_path_buf(),
                input: input.to_path_buf(),
            });
        }
        manifest
    };

    let plan = plan(&manifest, config.layout)?;
    let mut writer = ArchiveWriter::create(archive, config)?;
    let records = writer.write_planned(&manifest, plan)?;
    let archive_size = writer.finalize()?;

    if let Some(index_path) = &index_path {
        index::write_table(index_path, CURRENT_VERSION, &records)?;
        info!(index = %index_path.display(), "Wrote sidecar index");
    }

    let summary = CompileSummary {
        archive: archive.to_path_buf(),
        index: index_path,
        files: manifest.len(),
        directories: manifest.directories().len(),
        bytes: manifest.total_bytes(),
        archive_size,
    };
    info!(
        files = summary.files,
        bytes = summary.bytes,
        archive_size = summary.archive_size,
        "Compiled {} files into {}",
        summary.files,
        archive.display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::ManifestEntry;
    use std::io::{Seek, SeekFrom};
    use tempfile::{tempdir, tempfile};

    type TestResult<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

    fn example_manifest(root: &Path) -> Manifest {
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/b.bin"), [1u8, 2, 3, 4]).unwrap();
        let mut m = Manifest::new();
        m.push_directory("sub".into());
        m.push(ManifestEntry {
            input_path: root.join("sub/b.bin"),
            archive_path: "sub/b.bin".into(),
            length: 4,
        })
        .unwrap();
        m
    }

    fn write_to_vec(manifest: &Manifest, layout: Layout) -> TestResult<Vec<u8>> {
        let mut out = tempfile()?;
        let mut writer = ArchiveWriter::new(out.try_clone()?, "test.dat", layout, 64);
        writer.write_manifest(manifest)?;
        let size = writer.finalize()?;
        out.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        out.read_to_end(&mut bytes)?;
        assert_eq!(bytes.len() as u64, size);
        Ok(bytes)
    }

    #[test]
    fn embedded_layout_addresses() {
        let root = tempdir().unwrap();
        let m = example_manifest(root.path());
        let p = plan(&m, Layout::Embedded).unwrap();
        let s = p.sections.unwrap();
        assert_eq!(s.dir_list, 32);
        assert_eq!(s.file_index, 32 + 2 + 3);
        assert_eq!(s.file_data, 37 + 2 + 9 + 16);
        assert_eq!(p.records[0].address, 64);
    }

    #[test]
    fn sidecar_addresses_skip_the_pad_byte() {
        let mut m = Manifest::new();
        for (name, len) in [("a", 3u64), ("b", 10), ("c", 1)] {
            m.push(ManifestEntry {
                input_path: PathBuf::from(name),
                archive_path: name.into(),
                length: len,
            })
            .unwrap();
        }
        let p = plan(&m, Layout::Sidecar).unwrap();
        assert!(p.sections.is_none());
        let addrs: Vec<u64> = p.records.iter().map(|r| r.address).collect();
        assert_eq!(addrs, vec![8, 12, 23]);
    }

    #[test]
    fn overlong_path_fails_before_any_write() -> TestResult {
        let mut m = Manifest::new();
        m.push(ManifestEntry {
            input_path: PathBuf::from("unused"),
            archive_path: "d/".repeat(40_000),
            length: 1,
        })?;

        assert!(matches!(
            plan(&m, Layout::Embedded),
            Err(ArchiverError::PathTooLong { len: 80_000, .. })
        ));
        assert!(plan(&m, Layout::Sidecar).is_ok());

        let mut out = tempfile()?;
        let mut writer = ArchiveWriter::new(out.try_clone()?, "test.dat", Layout::Embedded, 64);
        let err = writer.write_manifest(&m).unwrap_err();
        assert!(matches!(err, ArchiverError::PathTooLong { .. }));
        assert_eq!(writer.current_offset, 0);
        drop(writer);
        let mut bytes = Vec::new();
        out.read_to_end(&mut bytes)?;
        assert!(bytes.is_empty());
        Ok(())
    }

    #[test]
    fn embedded_archive_bytes() -> TestResult {
        let root = tempdir()?;
        let bytes = write_to_vec(&example_manifest(root.path()), Layout::Embedded)?;

        assert_eq!(bytes.len(), 64 + 4 + 8);
        assert_eq!(&bytes[..8], b"PHRDAT\x05\x00");
        assert_eq!(&bytes[32..37], b"\x03\x00sub");
        assert_eq!(&bytes[37..48], b"\x09\x00sub/b.bin");
        assert_eq!(&bytes[48..56], &64u64.to_le_bytes());
        assert_eq!(&bytes[56..64], &4u64.to_le_bytes());
        assert_eq!(&bytes[64..68], &[1, 2, 3, 4]);
        assert_eq!(&bytes[68..], &76u64.to_le_bytes());
        Ok(())
    }

    #[test]
    fn sidecar_archive_bytes() -> TestResult {
        let root = tempdir()?;
        let bytes = write_to_vec(&example_manifest(root.path()), Layout::Sidecar)?;
        assert_eq!(bytes, b"PHRDAT\x05\x00\x01\x02\x03\x04\xFF");
        Ok(())
    }

    #[test]
    fn shrunken_source_is_reported() -> TestResult {
        let root = tempdir()?;
        let mut m = example_manifest(root.path());
        std::fs::write(root.path().join("short.bin"), b"ab")?;
        m.push(ManifestEntry {
            input_path: root.path().join("short.bin"),
            archive_path: "short.bin".into(),
            length: 5,
        })?;
        let err = write_to_vec(&m, Layout::Embedded).unwrap_err();
        let err = err.downcast::<ArchiverError>().unwrap();
        assert!(matches!(*err, ArchiverError::SourceChanged { expected: 5, actual: 2, .. }));
        Ok(())
    }

    #[test]
    fn output_naming() {
        let input = Path::new("/data/photos");
        assert_eq!(
            resolve_output_path(input, Path::new("/out/Backup.DAT"), "dat").unwrap(),
            PathBuf::from("/out/Backup.DAT")
        );
        assert_eq!(
            resolve_output_path(input, Path::new("/out"), "dat").unwrap(),
            PathBuf::from("/out/photos.dat")
        );
        assert_eq!(
            resolve_output_path(input, Path::new("/out/"), "csv").unwrap(),
            PathBuf::from("/out/photos.csv")
        );
        assert!(matches!(
            resolve_output_path(input, Path::new("/out/.dat"), "dat"),
            Err(ArchiverError::InvalidArgument(_))
        ));
    }

    #[test]
    fn compile_refuses_output_inside_input() {
        let input = tempdir().unwrap();
        std::fs::write(input.path().join("a.bin"), b"a").unwrap();
        let archive = input.path().join("a.dat");

        let err = compile(input.path(), &archive, None, None, &Config::default()).unwrap_err();
        assert!(matches!(err, ArchiverError::OutputInsideInput { .. }));
        assert!(!archive.exists());
        let leftovers: Vec<_> = std::fs::read_dir(input.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "probe file was not cleaned up");
    }

    #[test]
    fn compile_writes_default_sidecar_table() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        std::fs::write(input.path().join("a.bin"), b"abc").unwrap();
        let archive = out.path().join("in.dat");
        let config = Config {
            layout: Layout::Sidecar,
            ..Config::default()
        };

        let summary = compile(input.path(), &archive, None, None, &config).unwrap();
        assert_eq!(summary.index.as_deref(), Some(out.path().join("in.csv").as_path()));
        assert_eq!(summary.archive_size, 8 + 3 + 1);
        let table = std::fs::read_to_string(out.path().join("in.csv")).unwrap();
        assert_eq!(table, "\"PHRDAT\",5,0\n\"a.bin\",8,3\n");
    }
}
