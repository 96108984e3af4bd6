use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Layout;
use crate::path::normalize;

#[derive(Parser, Debug)]
#[command(name = "phragdat", author, version, about, long_about = None, disable_version_flag = true)]
pub struct Args {
    /// Print version.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),

    /// Log every file decision (same as PHRAGDAT_LOG=debug).
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Archive a directory tree into a single .dat file.
    #[command(alias = "c")]
    Compile {
        /// The directory to archive.
        #[arg(short, long, value_parser = parse_path)]
        input: PathBuf,

        /// Output archive (e.g. backup.dat), or a directory to place `<input name>.dat` in.
        #[arg(short = 'd', long = "dat", short_alias = 'o', value_parser = parse_path)]
        dat: PathBuf,

        /// Write the sidecar table here (a .csv file or a directory).
        #[arg(short = 'c', long = "index", value_parser = parse_path)]
        index: Option<PathBuf>,

        /// Exclusions list, one rule per line: `*.ext`, `dir/` or `file.name`.
        #[arg(short = 'e', long = "exclude", short_alias = 'f', value_parser = parse_path)]
        exclusions: Option<PathBuf>,

        /// On-disk layout. [default: embedded]
        #[arg(long, value_enum)]
        layout: Option<Layout>,

        /// Write buffer size in KiB. [env: PHRAGDAT_BUFFER_KB, default: 8192]
        #[arg(long = "buffer-kb")]
        buffer_kb: Option<usize>,
    },

    /// Extract files from an archive.
    #[command(alias = "x")]
    Extract {
        /// The archive to extract.
        #[arg(short, long, value_parser = parse_path)]
        input: PathBuf,

        /// Destination directory, created if missing.
        #[arg(short, long, value_parser = parse_path)]
        output: PathBuf,

        /// Sidecar table. When given, the archive is read through it.
        #[arg(short = 'c', long = "index", value_parser = parse_path)]
        index: Option<PathBuf>,

        /// Extract a single file, or a directory when the value ends in `/`.
        #[arg(short = 'f', long = "file")]
        selector: Option<String>,

        /// Extraction threads. [0 = one per CPU, 1 = sequential; env: PHRAGDAT_THREADS]
        #[arg(long)]
        threads: Option<usize>,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive to list.
        #[arg(short, long, value_parser = parse_path)]
        input: PathBuf,

        /// Sidecar table. When given, the archive is read through it.
        #[arg(short = 'c', long = "index", value_parser = parse_path)]
        index: Option<PathBuf>,

        /// Print the file table as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Path arguments are separator-normalized and must not be empty.
fn parse_path(raw: &str) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("path must not be empty".into());
    }
    Ok(PathBuf::from(normalize(raw)))
}

/// Parses command-line arguments using `clap`.
///
/// Errors (including `--help` and `--version`) are returned as `clap::Error`
/// so the caller decides how to print them and which exit code to use.
pub fn run() -> Result<Args, clap::Error> {
    Args::try_parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn historical_flag_spellings() {
        let args = Args::try_parse_from(["phragdat", "compile", "-i", "in", "-o", "out.dat", "-f", "ex.txt"]).unwrap();
        match args.command {
            Commands::Compile { dat, exclusions, .. } => {
                assert_eq!(dat, PathBuf::from("out.dat"));
                assert_eq!(exclusions, Some(PathBuf::from("ex.txt")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn attached_short_values_and_normalization() {
        let args = Args::try_parse_from(["phragdat", "x", "-iC:\\\\data\\\\a.dat", "-oout//dir", "-fsub/"]).unwrap();
        match args.command {
            Commands::Extract { input, output, selector, .. } => {
                assert_eq!(input, PathBuf::from("C:/data/a.dat"));
                assert_eq!(output, PathBuf::from("out/dir"));
                assert_eq!(selector.as_deref(), Some("sub/"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(Args::try_parse_from(["phragdat", "list", "-i", ""]).is_err());
    }

    #[test]
    fn version_flag() {
        let err = Args::try_parse_from(["phragdat", "-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
