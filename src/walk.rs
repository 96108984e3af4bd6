//! Breadth-first traversal of the input tree into an ordered manifest.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ArchiverError, IoResultExt, Result};
use crate::exclude::ExclusionRules;
use crate::path::relativize;

/// A file selected for archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Where the bytes are read from.
    pub input_path: PathBuf,
    /// Path inside the archive, relative to the input root, `/`-separated.
    pub archive_path: String,
    /// Size in bytes, never zero.
    pub length: u64,
}

/// Files and directories selected for one archive, in discovery order.
#[derive(Debug, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    directories: Vec<String>,
    seen: HashSet<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a file entry. Archive paths must be unique.
    pub fn push(&mut self, entry: ManifestEntry) -> Result<()> {
        if !self.seen.insert(entry.archive_path.clone()) {
            return Err(ArchiverError::DuplicateEntry {
                path: entry.archive_path,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn push_directory(&mut self, archive_path: String) {
        self.directories.push(archive_path);
    }

    /// Drops directories with no archived file anywhere below them. Returns
    /// how many were dropped.
    pub fn prune_directories(&mut self) -> usize {
        let populated: HashSet<&str> = self
            .entries
            .iter()
            .flat_map(|e| e.archive_path.match_indices('/').map(|(i, _)| &e.archive_path[..i]))
            .collect();
        let before = self.directories.len();
        self.directories.retain(|d| {
            let keep = populated.contains(d.as_str());
            if !keep {
                debug!(dir = %d, "no archived files below, skipping");
            }
            keep
        });
        before - self.directories.len()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Archived directories below the root, parents before children.
    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.length).sum()
    }
}

struct Candidate {
    path: PathBuf,
    rel: String,
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.rel
    }
}

/// Walks `root` breadth-first and returns every non-empty, non-excluded file.
///
/// The root itself is never filtered. Directories already visited are not
/// entered again, and directories left with no archived files below them
/// after filtering are dropped from the manifest.
pub fn walk(root: &Path, rules: &ExclusionRules) -> Result<Manifest> {
    if !root.is_dir() {
        return Err(ArchiverError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut manifest = Manifest::new();
    let mut visited: HashSet<PathBuf> = HashSet::from([root.to_path_buf()]);
    let mut worklist: VecDeque<PathBuf> = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = worklist.pop_front() {
        let (files, dirs) = list_children(root, &dir)?;
        let files = rules.filter_files(files);
        let dirs = rules.filter_dirs(dirs);

        for d in dirs {
            if !visited.insert(d.path.clone()) {
                debug!(dir = %d.path.display(), "already visited, skipping");
                continue;
            }
            manifest.push_directory(d.rel);
            worklist.push_back(d.path);
        }

        for f in files {
            let length = fs::metadata(&f.path).with_path(&f.path)?.len();
            if length == 0 {
                debug!(file = %f.path.display(), "empty, skipping");
                continue;
            }
            manifest.push(ManifestEntry {
                input_path: f.path,
                archive_path: f.rel,
                length,
            })?;
        }
    }

    manifest.prune_directories();
    info!(
        directories = manifest.directories().len() + 1,
        files = manifest.len(),
        "Found {} directories, {} files",
        manifest.directories().len() + 1,
        manifest.len()
    );
    Ok(manifest)
}

/// Immediate children of `dir`, split into files and directories, sorted by name.
fn list_children(root: &Path, dir: &Path) -> Result<(Vec<Candidate>, Vec<Candidate>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if path.to_str().is_none() {
            warn!(path = %path.display(), "name is not valid UTF-8, skipping");
            continue;
        }
        let candidate = Candidate {
            rel: relativize(root, path)?,
            path: path.to_path_buf(),
        };
        let ft = entry.file_type();
        if ft.is_dir() {
            dirs.push(candidate);
        } else if ft.is_file() {
            files.push(candidate);
        } else if ft.is_symlink() {
            match fs::metadata(path) {
                Ok(meta) if meta.is_file() => files.push(candidate),
                Ok(meta) if meta.is_dir() => {
                    debug!(path = %path.display(), "directory symlink not followed");
                }
                _ => warn!(path = %path.display(), "dangling symlink, skipping"),
            }
        }
    }
    Ok((files, dirs))
}
