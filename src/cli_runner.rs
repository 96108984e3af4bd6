//! Runs a parsed command line against the library.

use std::io::{self, Write};

use tracing::info;

use crate::archive::{self, resolve_output_path};
use crate::cli::{self, Args, Commands};
use crate::config::Config;
use crate::extract;
use crate::logging::{init_logging, Verbosity};

/// Public entry for running CLI logic.
///
/// `--help` and `--version` are printed here and count as success. Other
/// `clap` errors are printed here too and returned, so the caller only has to
/// print errors that are not `clap::Error`.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = match cli::run() {
        Ok(args) => args,
        Err(e) => {
            e.print()?;
            return if e.exit_code() == 0 { Ok(()) } else { Err(e.into()) };
        }
    };
    init_logging(Verbosity::from_flags(args.verbose, args.quiet));
    run_command(args)
}

/// Executes one already-parsed command.
pub fn run_command(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Commands::Compile {
            input,
            dat,
            index,
            exclusions,
            layout,
            buffer_kb,
        } => {
            let config = Config::resolve(layout, buffer_kb, None);
            let archive_path = resolve_output_path(&input, &dat, "dat")?;
            let index_path = index
                .map(|c| resolve_output_path(&input, &c, "csv"))
                .transpose()?;
            let summary = archive::compile(&input, &archive_path, index_path.as_deref(), exclusions.as_deref(), &config)?;
            info!("Successfully compiled {} ({} bytes)", summary.archive.display(), summary.archive_size);
        }
        Commands::Extract {
            input,
            output,
            index,
            selector,
            threads,
        } => {
            let config = Config::resolve(None, None, threads);
            let summary = extract::extract(&input, &output, index.as_deref(), selector.as_deref(), &config)?;
            info!("Successfully extracted {} files ({} bytes)", summary.files, summary.bytes);
        }
        Commands::List { input, index, json } => {
            let records = extract::list(&input, index.as_deref())?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if json {
                serde_json::to_writer_pretty(&mut out, &records)?;
                writeln!(out)?;
            } else {
                writeln!(out, "Archive Index ({} files):", records.len())?;
                for r in &records {
                    writeln!(out, "- {} ({} bytes @ {})", r.archive_path, r.length, r.address)?;
                }
            }
        }
    }
    Ok(())
}
