//! The core benchmark functionality.
//!
//! A benchmark run drives one engine with a set of benchmark kinds (see [`BenchmarkKind`]),
//! each run by a pool of workers for a fixed number of operations, while a live timeline and a
//! final latency report are printed.
//!
//! ## Configuration Format
//!
//! A benchmark configuration is formatted in TOML. The engine and the run are described by two
//! tables, usually kept in two files that are concatenated before parsing:
//!
//! ```toml
//! [engine]
//! name = "btreemap"
//! # engine-specific options
//!
//! [benchmark]
//! kinds = "set, get"
//! count = 1000000
//! keys = 1000000
//! ksize = 16
//! vsize = 32
//! rthr = 0
//! wthr = 0
//! ```
//!
//! Available options and their defaults can be found in [`Config`]. The engine table is
//! documented in [`mod@crate::engines`].
//!
//! Options can be overwritten via environment variables without changing the content of the
//! TOML files. Variables are prefixed with `KVARENA_` and use `__` to separate the table from the
//! key. For example, `KVARENA_BENCHMARK__COUNT=5000` sets `count` of `[benchmark]`.
//!
//! ## Thread Layout
//!
//! The selected kinds are split between readers (`rthr` threads) and writers (`wthr` threads).
//! `set`, `del`, `batch` and `crud` are write-like, `get`, `iter`, `batch` and `crud` are
//! read-like:
//!
//! - with writers and readers, writers run the write-like kinds and readers the rest;
//! - with readers only, readers run every kind, and likewise with writers only;
//! - with neither, one worker runs every kind on the calling thread.
//!
//! Every writer owns a key space (two if `batch` or `crud` is selected), so writers never
//! generate each other's keys. Readers share the key spaces of the writers, reader `i` using the
//! one of writer `i % wthr`; without writers, readers own key spaces instead.
//!
//! Worker `i` of a category of `n` threads starts at key sequence `i * keys / n` and runs
//! `count / n` operations per kind and pass, the last worker taking the remainder. The total
//! number of operations of each kind is thus independent of the thread layout. Every pass
//! restarts at the worker's key sequence, so a `get` pass reads back the keys of the `set`
//! pass before it.
//!
//! ## Output Format
//!
//! The timeline and the final report are printed to stdout, see [`mod@crate::histogram`].
//! The resource usage of the measured part of the run follows:
//!
//! ```txt
//! >>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>> rusage
//! iops: read 0, write 1024, page 0
//! cpu: user 1.204301, system 0.032001
//! space: disk 42.500000, ram 12.125000
//! ```
//!
//! Disk and RAM are in MiB. With `csv_prefix` set, every report is also written as CSV.

use crate::config::Config;
use crate::doer::{Doer, RunContext};
use crate::engines::{self, EngineOpt};
use crate::error::{Error, Result};
use crate::histogram::{CsvOutput, HistogramHub, Summary};
use crate::kvgen::KeySpaceShape;
use crate::rusage::{self, Rusage};
use crate::thread::{DefaultThread, JoinHandle, Thread};
use crate::*;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use log::{debug, error, info};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

// {{{ options

/// The whole configuration of a run: `[engine]` and `[benchmark]`.
#[derive(Deserialize, Clone, Debug)]
pub struct BenchmarkFileOpt {
    pub engine: EngineOpt,
    #[serde(default)]
    pub benchmark: Config,
}

/// Parses a configuration, applying environment overrides.
pub fn init(text: &str) -> Result<BenchmarkFileOpt> {
    let opt: BenchmarkFileOpt = Figment::new()
        .merge(Toml::string(text))
        .merge(Env::prefixed("KVARENA_").split("__"))
        .extract()?;
    debug!("Creating benchmark with the following configurations: {:?}", opt);
    Ok(opt)
}

// }}} options

// {{{ plan

/// A worker to be started: what it runs, where it starts and how much it does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub kinds: KindSet,
    /// Key space of the first generator; the second one, if any, uses the next.
    pub key_space: u64,
    pub key_sequence: u64,
    /// Operations per kind and pass.
    pub share: u64,
}

/// The thread layout of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plan {
    pub selected: KindSet,
    pub readers: KindSet,
    pub writers: KindSet,
    pub rthr: usize,
    pub wthr: usize,
    /// Key spaces per owning worker: 2 with `batch` or `crud`, else 1.
    pub space_step: u64,
    pub nspaces: u64,
    pub nsectors: u64,
}

impl Plan {
    pub fn new(config: &Config) -> Self {
        let selected = config.kind_set();
        let (mut rthr, mut wthr) = (config.rthr, config.wthr);
        let (readers, writers) = match (rthr, wthr) {
            (_, 0) => (selected, KindSet::EMPTY),
            (0, _) => (KindSet::EMPTY, selected),
            _ => (
                selected.difference(KindSet::WRITE).intersection(KindSet::READ),
                selected.intersection(KindSet::WRITE),
            ),
        };
        if readers.is_empty() {
            rthr = 0;
        }
        if writers.is_empty() {
            wthr = 0;
        }
        let space_step = if selected.intersects(KindSet::TWO_KEYSPACE) {
            2
        } else {
            1
        };
        let owners = if wthr > 0 { wthr } else { rthr.max(1) };
        Self {
            selected,
            readers,
            writers,
            rthr,
            wthr,
            space_step,
            nspaces: owners as u64 * space_step,
            nsectors: rthr.max(wthr).max(1) as u64,
        }
    }

    /// Runs on the calling thread.
    pub fn single(&self) -> bool {
        self.rthr == 0 && self.wthr == 0
    }

    pub fn workers(&self) -> usize {
        self.rthr + self.wthr
    }

    /// Readers first, then writers.
    pub fn slots(&self, config: &Config) -> Vec<Slot> {
        if self.single() {
            return vec![Slot {
                kinds: self.selected,
                key_space: 0,
                key_sequence: 0,
                share: config.count,
            }];
        }
        // readers map onto the writers' key spaces, if there are writers
        let owners = if self.wthr > 0 { self.wthr } else { self.rthr };
        let step = self.space_step;
        let split = |kinds: KindSet, n: usize| {
            let (keys, count) = (config.keys, config.count);
            (0..n).map(move |i| Slot {
                kinds,
                key_space: (i % owners) as u64 * step,
                key_sequence: (i as u128 * keys as u128 / n as u128) as u64,
                share: count / n as u64
                    + if i + 1 == n {
                        count % n as u64
                    } else {
                        0
                    },
            })
        };
        split(self.readers, self.rthr)
            .chain(split(self.writers, self.wthr))
            .collect()
    }
}

// }}} plan

// {{{ runner

/// What a finished run reports back.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// One entry per kind with operations, in kind order.
    pub summaries: Vec<Summary>,
    pub rusage_start: Rusage,
    pub rusage_finish: Rusage,
}

impl RunReport {
    pub fn summary(&self, kind: BenchmarkKind) -> Option<&Summary> {
        self.summaries.iter().find(|s| s.kind == kind)
    }
}

/// One benchmark run over one engine.
pub struct Runner<T: Thread = DefaultThread> {
    engine: SharedEngine,
    name: String,
    plan: Plan,
    run: Arc<RunContext>,
    thread: T,
}

impl Runner {
    /// Creates the engine named in `opt` and prepares a run of `config`.
    pub fn new(opt: &EngineOpt, config: Config) -> Result<Self> {
        config.validate()?;
        let engine = engines::create(opt, &config.durability())?;
        Self::with_engine(engine, &opt.name, config)
    }

    /// Prepares a run of `config` over an existing engine.
    pub fn with_engine(engine: SharedEngine, name: &str, config: Config) -> Result<Self> {
        Self::with_thread(engine, name, config, DefaultThread)
    }
}

impl<T: Thread> Runner<T> {
    /// Prepares a run whose workers are spawned by `thread`.
    pub fn with_thread(engine: SharedEngine, name: &str, config: Config, thread: T) -> Result<Self> {
        config.validate()?;
        let plan = Plan::new(&config);
        let shape = KeySpaceShape::setup(
            !config.binary,
            config.ksize,
            plan.nspaces,
            plan.nsectors,
            config.keys,
            config.seed,
        )?;
        let hub = Arc::new(HistogramHub::new(config.interval()));
        for kind in plan.selected.iter() {
            hub.enable(kind);
        }
        Ok(Self {
            engine,
            name: name.to_string(),
            plan,
            run: Arc::new(RunContext::new(config, shape, hub)),
            thread,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// A flag that stops the run at the next pass boundary once set, e.g. from a signal
    /// handler.
    pub fn interrupter(&self) -> Arc<AtomicBool> {
        self.run.failure_flag()
    }

    /// Runs the benchmark to completion and prints its reports. The engine is closed
    /// afterwards, even if the run failed.
    pub fn run(self) -> Result<RunReport> {
        let config = &self.run.config;
        info!(
            "engine {}, {}, {}, keys {}, count {}, ksize {}, vsize {}, repeat {}",
            self.name,
            config.sync,
            config.wal,
            config.keys,
            config.count,
            config.ksize,
            config.vsize,
            config.repeat
        );
        fs::create_dir_all(&config.datadir)?;
        self.engine.open(&config.datadir)?;
        let result = self.run_opened();
        let closed = self.engine.close();
        let report = result?;
        closed?;
        Ok(report)
    }

    fn run_opened(&self) -> Result<RunReport> {
        let config = &self.run.config;
        for opt in config.engine_options.iter() {
            if let Err(e) = self.engine.option(opt) {
                error!("engine {} rejected option `{}`: {}", self.name, opt, e);
                return Err(e.into());
            }
        }
        let csv = config
            .csv_prefix
            .as_deref()
            .map(|p| CsvOutput::new(p, &self.name, config.sync));
        if let Some(csv) = csv.as_ref() {
            self.run.hub.set_timeline(Box::new(csv.create("timeline")?));
        }

        let slots = self.plan.slots(config);
        let (outcome, rusage_start, rusage_finish) = if self.plan.single() {
            self.run_single(slots[0])?
        } else {
            self.run_threads(&slots)?
        };

        self.run.hub.finish();
        let summaries = self.run.hub.print_report(csv.as_ref())?;
        rusage::report(&rusage_start, &rusage_finish, csv.as_ref())?;

        outcome?;
        if self.run.failed() {
            return Err(Error::Aborted("interrupted".to_string()));
        }
        Ok(RunReport {
            summaries,
            rusage_start,
            rusage_finish,
        })
    }

    fn sample(&self) -> Result<Rusage> {
        Rusage::sample(Some(&self.run.config.datadir))
    }

    fn run_single(&self, slot: Slot) -> Result<(Result<()>, Rusage, Rusage)> {
        info!("single-thread mode, {}", slot.kinds);
        let mut doer = Doer::new(
            &self.run,
            0,
            slot.kinds,
            slot.key_space,
            slot.key_sequence,
            slot.share,
        )?;
        let start = self.sample()?;
        let outcome = doer.fulfil(self.engine.as_ref());
        drop(doer);
        let finish = self.sample()?;
        Ok((outcome, start, finish))
    }

    fn run_threads(&self, slots: &[Slot]) -> Result<(Result<()>, Rusage, Rusage)> {
        info!(
            "{} readers {}, {} writers {}",
            self.plan.rthr, self.plan.readers, self.plan.wthr, self.plan.writers
        );
        // every worker exists before any starts, so completion counts are complete
        let doers = slots
            .iter()
            .enumerate()
            .map(|(nth, s)| {
                Doer::new(&self.run, nth, s.kinds, s.key_space, s.key_sequence, s.share)
            })
            .collect::<Result<Vec<_>>>()?;

        let start = Arc::new(Barrier::new(doers.len() + 1));
        let finish = Arc::new(Barrier::new(doers.len() + 1));
        let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let pin = self.run.config.pin;

        let mut handles: Vec<Box<dyn JoinHandle>> = Vec::with_capacity(doers.len());
        for mut doer in doers {
            let engine = self.engine.clone();
            let run = self.run.clone();
            let (start, finish) = (start.clone(), finish.clone());
            let first_error = first_error.clone();
            let worker_thread = self.thread.clone();
            let nth = doer.nth();
            let handle = self.thread.spawn(
                format!("doer.{}", nth),
                Box::new(move || {
                    if pin {
                        worker_thread.pin(nth);
                    }
                    start.wait();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        doer.fulfil(engine.as_ref())
                    }))
                    .unwrap_or_else(|_| {
                        run.fail();
                        Err(Error::Aborted(format!("doer {} panicked", nth)))
                    });
                    if let Err(e) = outcome {
                        first_error.lock().get_or_insert(e);
                    }
                    drop(doer);
                    finish.wait();
                }),
            );
            handles.push(handle);
        }

        start.wait();
        let rusage_start = self.sample();
        finish.wait();
        let rusage_finish = self.sample();

        while let Some(handle) = handles.pop() {
            if !handle.join() {
                error!("A worker thread panicked outside of its benchmark");
                self.run.fail();
            }
        }

        let outcome = match first_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        Ok((outcome, rusage_start?, rusage_finish?))
    }
}

/// Stops `runner` on Ctrl-C.
pub(crate) fn interrupt_on_ctrlc<T: Thread>(runner: &Runner<T>) {
    let flag = runner.interrupter();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Release);
        debug!("SIGINT received, stopping the benchmark");
    }) {
        error!("Error setting Ctrl-C handler: {}", e);
    }
}

// }}} runner

// {{{ tests


// }}} tests
