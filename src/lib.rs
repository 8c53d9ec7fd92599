#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A benchmark harness for embedded storage engines.
//!
//! `kvarena` drives one pluggable storage engine through a fixed set of workload shapes (see
//! [`BenchmarkKind`]) while measuring per-operation latency and throughput. Keys and values
//! are synthesized by a deterministic generator, so every run addresses the same key space and
//! concurrent workers never collide on generated keys.
//!
//! The engine is a black box behind the [`StorageEngine`] and [`EngineContext`] traits. Engines
//! are registered by name (see [`mod@engines`]) and selected from a TOML configuration, so
//! adding one does not require touching this crate: implement the traits, register the
//! constructor with [`inventory`], and call [`cmdline()`] from your own `main`.
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@bench`] for the benchmark configuration and the output format.
//! - [`mod@engines`] for the configuration of the built-in engines.
//! - [`mod@histogram`] for the live timeline and the final latency report.
//! - [`cmdline()`] for the usage of the default command line interface.

use std::path::Path;
use std::sync::Arc;

/// A borrowed key/value pair.
///
/// Neither the key nor the value is owned: a pair handed out by a generator, a pool or an
/// engine context is valid only until the next call on the object it was borrowed from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyValue<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> KeyValue<'a> {
    pub fn new(key: &'a [u8], value: &'a [u8]) -> Self {
        Self { key, value }
    }

    /// Bytes moved by an operation on this pair.
    pub fn volume(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// A storage engine under test, shared by every worker of a run.
///
/// The engine is opened once before the workers start and closed after all of them have
/// finished. Each worker talks to the engine only through its own [`EngineContext`], so the
/// engine is responsible for the safety of concurrent access to whatever the contexts share.
pub trait StorageEngine: Send + Sync + 'static {
    /// Open (or create) the database inside `datadir`.
    fn open(&self, datadir: &Path) -> Result<(), EngineError>;

    /// Close the database. Called once, after every context has been disposed.
    fn close(&self) -> Result<(), EngineError>;

    /// Create a per-thread context.
    fn thread_new(&self) -> Result<Box<dyn EngineContext>, EngineError>;

    /// Apply an engine-specific tuning knob to the whole engine.
    fn option(&self, arg: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported(format!("option `{}`", arg)))
    }
}

/// A per-thread context of a [`StorageEngine`]: its transaction, cursor and scratch buffers.
///
/// Every benchmark step is bracketed as `begin(kind)`, zero or more `next(kind, kv)`, then
/// `done(kind)`. For [`BenchmarkKind::Batch`] and [`BenchmarkKind::Crud`], the inner `next`
/// calls use the point kinds (`Set`, `Delete`, `Get`).
pub trait EngineContext: Send {
    /// Apply an engine-specific tuning knob to this context only.
    fn option(&mut self, arg: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported(format!("option `{}`", arg)))
    }

    fn begin(&mut self, kind: BenchmarkKind) -> Result<(), EngineError>;

    /// Execute one step.
    ///
    /// - `Set`: store `kv`, return it unchanged.
    /// - `Delete`: remove `kv.key`, [`EngineError::NotFound`] if absent.
    /// - `Get`: return the key and the stored value, [`EngineError::NotFound`] if absent.
    /// - `Iterate`: `kv` is empty; return the next record of the cursor opened by `begin`, or
    ///   [`EngineError::NotFound`] once the cursor is exhausted.
    ///
    /// A returned pair may borrow from the context and stays valid until the next call.
    fn next<'a>(
        &'a mut self,
        kind: BenchmarkKind,
        kv: KeyValue<'a>,
    ) -> Result<KeyValue<'a>, EngineError>;

    fn done(&mut self, kind: BenchmarkKind) -> Result<(), EngineError>;

    /// Release the context. Dropping it is the default.
    fn dispose(self: Box<Self>) {}
}

/// A ready-to-run engine, as produced by a registered constructor.
pub type SharedEngine = Arc<dyn StorageEngine>;

pub mod bench;
mod cmdline;
pub mod config;
pub mod doer;
pub mod engines;
pub mod error;
pub mod histogram;
pub mod kind;
pub mod kvgen;
pub mod kvpool;
pub mod rusage;
pub mod thread;

pub use cmdline::cmdline;
pub use error::{EngineError, Error, Result};
pub use kind::{BenchmarkKind, KindSet};

pub extern crate inventory;
pub extern crate toml;
