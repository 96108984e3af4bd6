//! Detection of an output location that lies inside the input tree.
//!
//! A uniquely named marker file is dropped into every output directory before
//! the walk. If the walk finds one of them, the output is inside the input.
//! This is best effort: the tree can change between the walk and the write.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use rand::{thread_rng, Rng};
use tracing::{debug, warn};

use crate::error::{ArchiverError, IoResultExt, Result};
use crate::walk::Manifest;

const PROBE_CONTENTS: &[u8] = b"THIS IS A TEST\n";
const MAX_ATTEMPTS: usize = 16;

/// A marker file placed in one output directory.
#[derive(Debug)]
pub struct Probe {
    dir: PathBuf,
    name: String,
}

impl Probe {
    /// Creates a fresh marker with a random 8-hex-digit name in `dir`.
    pub fn place(dir: &Path) -> Result<Self> {
        let mut rng = thread_rng();
        for _ in 0..MAX_ATTEMPTS {
            let name = format!("{:08x}", rng.gen::<u32>());
            let path = dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(PROBE_CONTENTS).with_path(&path)?;
                    debug!(probe = %path.display(), "placed output probe");
                    return Ok(Self {
                        dir: dir.to_path_buf(),
                        name,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e).with_path(&path),
            }
        }
        Err(ArchiverError::InvalidArgument(format!(
            "could not create a probe file in '{}'",
            dir.display()
        )))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Deletes the marker. Failure is logged, never returned.
    pub fn remove(&self) {
        let path = self.path();
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(probe = %path.display(), error = %e, "could not remove output probe");
        }
    }
}

/// Returns the first probe whose marker file was picked up by the walk.
pub fn find_in<'a>(manifest: &Manifest, probes: &'a [Probe]) -> Option<&'a Probe> {
    manifest.entries().iter().find_map(|entry| {
        let name = entry.input_path.file_name()?.to_str()?;
        probes.iter().find(|p| p.name == name)
    })
}
