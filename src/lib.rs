//! # PhragDat Core Library
//!
//! This crate provides the core functionality for the `phragdat` archiver:
//! packing a directory tree into a single `.dat` file whose index records
//! where every file's bytes live, and getting those files back out.
//!
//! It is designed to be used by the `phragdat` command-line application, but
//! its public API can also be used to create, inspect and extract archives
//! programmatically.
//!
//! ## Key Modules
//!
//! - [`format`]: The on-disk contract, header, section records and version gate.
//! - [`walk`] and [`exclude`]: Turning a directory tree into an ordered manifest.
//! - [`archive`]: Writing archives from a manifest.
//! - [`index`]: The CSV sidecar table.
//! - [`extract`]: Validating, listing and extracting archives.
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::Path;
//! use phragdat::{compile, extract, Config};
//!
//! let config = Config::default();
//! compile(Path::new("photos"), Path::new("photos.dat"), None, None, &config)?;
//! extract(Path::new("photos.dat"), Path::new("restored"), None, None, &config)?;
//! # Ok::<(), phragdat::ArchiverError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod config;
pub mod error;
pub mod exclude;
pub mod extract;
pub mod format;
pub mod index;
pub mod logging;
pub mod path;
pub mod walk;

pub use archive::{compile, CompileSummary};
pub use config::{Config, Layout};
pub use error::{ArchiverError, Result};
pub use extract::{extract, list, ExtractSummary};
pub use format::{ExtractedFileRecord, FormatVersion, CURRENT_VERSION};
