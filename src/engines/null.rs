//! An engine that does nothing, to measure the overhead of the harness itself.
//!
//! ## Configuration Format
//!
//! ``` toml
//! [engine]
//! name = "null"
//! ```
//!
//! Every step succeeds: `get` finds every key (with an empty value), `iter` is always
//! exhausted, and every option and durability mode is accepted.

use crate::config::Durability;
use crate::engines::Registry;
use crate::error::{EngineError, Result};
use crate::*;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct NullEngine;

impl NullEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn new_engine(_opt: &toml::Table, _durability: &Durability) -> Result<SharedEngine> {
        Ok(Arc::new(Self::new()))
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for NullEngine {
    fn open(&self, _datadir: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn thread_new(&self) -> Result<Box<dyn EngineContext>, EngineError> {
        Ok(Box::new(self.clone()))
    }

    fn option(&self, _arg: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

impl EngineContext for NullEngine {
    fn option(&mut self, _arg: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn begin(&mut self, _kind: BenchmarkKind) -> Result<(), EngineError> {
        Ok(())
    }

    fn next<'a>(
        &'a mut self,
        kind: BenchmarkKind,
        kv: KeyValue<'a>,
    ) -> Result<KeyValue<'a>, EngineError> {
        match kind {
            BenchmarkKind::Iterate => Err(EngineError::NotFound),
            BenchmarkKind::Get => Ok(KeyValue::new(kv.key, &[])),
            _ => Ok(kv),
        }
    }

    fn done(&mut self, _kind: BenchmarkKind) -> Result<(), EngineError> {
        Ok(())
    }
}

inventory::submit! {
    Registry::new("null", NullEngine::new_engine)
}
