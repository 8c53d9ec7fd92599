//! Run options of a benchmark, deserialized from the `[benchmark]` table.
//!
//! Every field has a default, so an empty `[benchmark]` table is a valid (if long) run. The
//! options can be overridden from the environment with the `KVARENA_` prefix and `__` as the
//! table separator, e.g. `KVARENA_BENCHMARK__COUNT=5000`.

use crate::error::{Error, Result};
use crate::kind::{BenchmarkKind, KindSet};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How eagerly the engine should flush to stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Sync,
    #[default]
    Lazy,
    NoSync,
}

impl SyncMode {
    pub fn name(&self) -> &'static str {
        match self {
            SyncMode::Sync => "sync",
            SyncMode::Lazy => "lazy",
            SyncMode::NoSync => "nosync",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Write-ahead logging request. `Indef` leaves the choice to the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalMode {
    #[default]
    Indef,
    #[serde(alias = "walon")]
    On,
    #[serde(alias = "waloff")]
    Off,
}

impl WalMode {
    pub fn name(&self) -> &'static str {
        match self {
            WalMode::Indef => "indef",
            WalMode::On => "walon",
            WalMode::Off => "waloff",
        }
    }
}

impl fmt::Display for WalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The durability modes handed to an engine constructor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Durability {
    pub sync: SyncMode,
    pub wal: WalMode,
}

/// The options of one benchmark run.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Benchmark kinds to run, as a list or a comma separated string. Names are `set`, `get`,
    /// `iter` (`iterate`), `del` (`delete`), `batch` and `crud` (`transact`).
    ///
    /// Default: `"set, get"`.
    #[serde(deserialize_with = "deserialize_kinds")]
    pub kinds: Vec<BenchmarkKind>,

    /// Number of operations per kind and per pass, split among the workers of a category.
    ///
    /// Default: 1,000,000.
    pub count: u64,

    /// Number of distinct keys, i.e., the period of the key generator.
    ///
    /// Default: 1,000,000.
    pub keys: u64,

    /// Key size in bytes.
    ///
    /// Default: 16.
    pub ksize: usize,

    /// Value size in bytes.
    ///
    /// Default: 32.
    pub vsize: usize,

    /// Number of quadruples in one `batch` transaction.
    ///
    /// Default: 500.
    pub batch_length: usize,

    /// Number of passes every worker runs over its kinds.
    ///
    /// Default: 1.
    pub repeat: usize,

    /// Default: `"lazy"`.
    pub sync: SyncMode,

    /// Default: `"indef"`.
    pub wal: WalMode,

    /// Number of reader threads.
    ///
    /// Default: 0.
    pub rthr: usize,

    /// Number of writer threads. With both thread counts zero, the run is single threaded.
    ///
    /// Default: 0.
    pub wthr: usize,

    /// Keep workers running passes until every worker finished at least `repeat` of them.
    ///
    /// Default: false.
    pub continuous: bool,

    /// Treat missing keys in `get`, `del`, `batch` and `crud` as success.
    ///
    /// Default: false.
    pub ignore_not_found: bool,

    /// Generate binary instead of printable keys and values.
    ///
    /// Default: false.
    pub binary: bool,

    /// If given, CSV reports are written as `<csv_prefix><engine>_<sync>_<item>.csv`.
    ///
    /// Default: none.
    pub csv_prefix: Option<String>,

    /// Seed of the key generator.
    ///
    /// Default: 0.
    pub seed: u64,

    /// Directory handed to the engine's `open`.
    ///
    /// Default: `"./_kvarena"`.
    pub datadir: PathBuf,

    /// Engine-specific options, applied to the engine and to every worker context.
    ///
    /// Default: empty.
    pub engine_options: Vec<String>,

    /// Seconds between two timeline lines.
    ///
    /// Default: 1.0.
    pub interval: f64,

    /// Pin worker `i` to core `i`.
    ///
    /// Default: false.
    pub pin: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kinds: vec![BenchmarkKind::Set, BenchmarkKind::Get],
            count: 1_000_000,
            keys: 1_000_000,
            ksize: 16,
            vsize: 32,
            batch_length: 500,
            repeat: 1,
            sync: SyncMode::default(),
            wal: WalMode::default(),
            rthr: 0,
            wthr: 0,
            continuous: false,
            ignore_not_found: false,
            binary: false,
            csv_prefix: None,
            seed: 0,
            datadir: PathBuf::from("./_kvarena"),
            engine_options: Vec::new(),
            interval: 1.0,
            pin: false,
        }
    }
}

fn deserialize_kinds<'de, D>(d: D) -> std::result::Result<Vec<BenchmarkKind>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        List(Vec<String>),
    }

    let names = match Raw::deserialize(d)? {
        Raw::Text(s) => s.split(',').map(str::to_string).collect(),
        Raw::List(v) => v,
    };
    names
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .collect()
}

impl Config {
    /// Rejects options no run can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.kinds.is_empty() {
            return Err(Error::config("no benchmark kind selected"));
        }
        if self.count == 0 {
            return Err(Error::config("count should be positive"));
        }
        if self.keys == 0 {
            return Err(Error::config("keys should be positive"));
        }
        if self.repeat == 0 {
            return Err(Error::config("repeat should be positive"));
        }
        if self.ksize == 0 {
            return Err(Error::config("ksize should be positive"));
        }
        if self.kind_set().contains(BenchmarkKind::Batch) && self.batch_length == 0 {
            return Err(Error::config("batch_length should be positive"));
        }
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(Error::config("interval should be a positive number of seconds"));
        }
        Ok(())
    }

    pub fn kind_set(&self) -> KindSet {
        self.kinds.iter().copied().collect()
    }

    pub fn durability(&self) -> Durability {
        Durability {
            sync: self.sync,
            wal: self.wal,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }
}
