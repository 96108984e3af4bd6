//! Copying file bytes out of an archive, sequentially or with a rayon pool.
//!
//! In parallel mode every worker opens its own handle to the archive, seeks to
//! its record and copies exactly `length` bytes, so no handle is shared between
//! threads.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{ArchiverError, IoResultExt, Result};
use crate::format::ExtractedFileRecord;

/// One file to write: where it lives in the archive and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractJob {
    pub record: ExtractedFileRecord,
    pub target: PathBuf,
}

/// Copies one record from `archive` (already open) to its target.
///
/// The target is created with `create_new`, so an existing file is never
/// overwritten even if it appeared after the pre-flight check.
pub fn copy_record(archive: &mut File, archive_path: &Path, job: &ExtractJob) -> Result<()> {
    let ExtractJob { record, target } = job;
    archive
        .seek(SeekFrom::Start(record.address))
        .with_path(archive_path)?;

    let out = match OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(ArchiverError::AlreadyExists { path: target.clone() });
        }
        Err(e) => return Err(e).with_path(target),
    };
    let mut out = BufWriter::new(out);
    let copied = io::copy(&mut (&mut *archive).take(record.length), &mut out).with_path(target)?;
    out.flush().with_path(target)?;

    if copied != record.length {
        return Err(ArchiverError::corrupt(
            archive_path,
            format!(
                "'{}' needs {} bytes at offset {}, only {} available",
                record.archive_path, record.length, record.address, copied
            ),
        ));
    }
    debug!(file = %record.archive_path, target = %target.display(), bytes = copied, "Extracted");
    Ok(())
}

/// Runs every job. `threads == 1` runs on the calling thread, `0` uses the
/// global rayon pool, anything else a dedicated pool of that size.
pub fn extract_jobs(archive_path: &Path, jobs: &[ExtractJob], threads: usize) -> Result<()> {
    if threads == 1 || jobs.len() <= 1 {
        let mut archive = File::open(archive_path).with_path(archive_path)?;
        return jobs
            .iter()
            .try_for_each(|job| copy_record(&mut archive, archive_path, job));
    }

    let run = || {
        jobs.par_iter().try_for_each(|job| {
            // A dedicated handle per job keeps seeks independent.
            let mut archive = File::open(archive_path).with_path(archive_path)?;
            copy_record(&mut archive, archive_path, job)
        })
    };
    if threads == 0 {
        debug!(threads = rayon::current_num_threads(), jobs = jobs.len(), "parallel extraction");
        return run();
    }

    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => {
            debug!(threads, jobs = jobs.len(), "parallel extraction");
            pool.install(run)
        }
        Err(e) => {
            warn!(error = %e, "could not start extraction workers, extracting sequentially");
            extract_jobs(archive_path, jobs, 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("blob.dat");
        std::fs::write(&archive, contents).unwrap();
        (dir, archive)
    }

    fn job(dir: &Path, name: &str, address: u64, length: u64) -> ExtractJob {
        ExtractJob {
            record: ExtractedFileRecord {
                archive_path: name.into(),
                address,
                length,
            },
            target: dir.join(name),
        }
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        for threads in [1, 0, 4] {
            let (dir, archive) = setup(&payload);
            let jobs: Vec<_> = (0..16u64)
                .map(|i| job(dir.path(), &format!("f{i}"), i * 256, 256))
                .collect();
            extract_jobs(&archive, &jobs, threads).unwrap();
            for (i, j) in jobs.iter().enumerate() {
                let got = std::fs::read(&j.target).unwrap();
                assert_eq!(got, &payload[i * 256..(i + 1) * 256], "threads={threads} file={i}");
            }
        }
    }

    #[test]
    fn short_read_is_corruption() {
        let (dir, archive) = setup(b"0123456789");
        let err = extract_jobs(&archive, &[job(dir.path(), "x", 6, 10)], 1).unwrap_err();
        assert!(matches!(err, ArchiverError::CorruptArchive { .. }));
    }

    #[test]
    fn never_overwrites() {
        let (dir, archive) = setup(b"0123456789");
        std::fs::write(dir.path().join("x"), b"keep").unwrap();
        let err = extract_jobs(&archive, &[job(dir.path(), "x", 0, 4)], 1).unwrap_err();
        assert!(matches!(err, ArchiverError::AlreadyExists { .. }));
        assert_eq!(std::fs::read(dir.path().join("x")).unwrap(), b"keep");
    }
}
