//! Tracing subscriber setup for the `phragdat` binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding an `EnvFilter` directive, e.g. `phragdat=debug`.
pub const ENV_LOG: &str = "PHRAGDAT_LOG";

/// How chatty the command line asked the tool to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            _ => Verbosity::Normal,
        }
    }

    fn default_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Builds the filter. `PHRAGDAT_LOG` applies unless `--verbose` or `-q` was given.
pub fn filter_for(verbosity: Verbosity) -> EnvFilter {
    let from_env = std::env::var(ENV_LOG).ok().filter(|s| !s.trim().is_empty());
    match (verbosity, from_env) {
        (Verbosity::Normal, Some(directive)) => {
            EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()))
        }
        _ => EnvFilter::new(verbosity.default_directive()),
    }
}

/// Installs a compact fmt subscriber on stderr. Safe to call more than once;
/// later calls are ignored.
pub fn init_logging(verbosity: Verbosity) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();
    let _ = tracing_subscriber::registry()
        .with(filter_for(verbosity))
        .with(layer)
        .try_init();
}
