//! Runtime configuration passed explicitly into `compile` and `extract`.

use clap::ValueEnum;

/// Environment override for the writer buffer, in KiB.
pub const ENV_BUFFER_KB: &str = "PHRAGDAT_BUFFER_KB";
/// Environment override for the extraction thread count.
pub const ENV_THREADS: &str = "PHRAGDAT_THREADS";

/// 8 MiB, large enough to keep write syscalls rare for typical trees.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// On-disk layout written by `compile`.
#[derive(ValueEnum, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Layout {
    /// Header with section addresses, directory list and file index inside the archive.
    #[default]
    Embedded,
    /// Header and padded file data only; addresses live in a separate table.
    Sidecar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub layout: Layout,
    /// Capacity of the archive writer's buffer, in bytes.
    pub buffer_size: usize,
    /// Extraction workers. `0` = one per CPU, `1` = sequential.
    pub threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            threads: 0,
        }
    }
}

impl Config {
    /// Builds a config from explicit values, falling back to the
    /// `PHRAGDAT_*` environment variables, then to defaults.
    pub fn resolve(layout: Option<Layout>, buffer_kb: Option<usize>, threads: Option<usize>) -> Self {
        let defaults = Self::default();
        let buffer_size = buffer_kb
            .or_else(|| env_usize(ENV_BUFFER_KB))
            .map(|kb| kb.max(1) * 1024)
            .unwrap_or(defaults.buffer_size);
        let threads = threads.or_else(|| env_usize(ENV_THREADS)).unwrap_or(defaults.threads);
        Self {
            layout: layout.unwrap_or(defaults.layout),
            buffer_size,
            threads,
        }
    }

    /// Number of extraction workers actually used.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}
