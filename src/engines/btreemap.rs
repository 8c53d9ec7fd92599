//! An in-memory engine on top of [`std::collections::BTreeMap`].
//!
//! ## Configuration Format
//!
//! ``` toml
//! [engine]
//! name = "btreemap"
//! ```
//!
//! The map lives behind a single [`RwLock`] shared by all contexts. Nothing is persisted, so
//! `sync = "sync"` and `wal = "on"` are rejected; engine options are not supported. `batch` and
//! `crud` transactions are not isolated.

use crate::config::{Durability, SyncMode, WalMode};
use crate::engines::Registry;
use crate::error::{EngineError, Error, Result};
use crate::*;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::path::Path;
use std::sync::Arc;

type Map = Arc<RwLock<BTreeMap<Box<[u8]>, Box<[u8]>>>>;

pub struct BTreeMapEngine(Map);

impl BTreeMapEngine {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(BTreeMap::new())))
    }

    pub fn new_engine(_opt: &toml::Table, durability: &Durability) -> Result<SharedEngine> {
        if durability.sync == SyncMode::Sync {
            return Err(Error::config("btreemap cannot sync to stable storage"));
        }
        if durability.wal == WalMode::On {
            return Err(Error::config("btreemap has no write-ahead log"));
        }
        Ok(Arc::new(Self::new()))
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl Default for BTreeMapEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for BTreeMapEngine {
    fn open(&self, _datadir: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn thread_new(&self) -> Result<Box<dyn EngineContext>, EngineError> {
        Ok(Box::new(BTreeMapContext {
            map: self.0.clone(),
            key: Vec::new(),
            value: Vec::new(),
            cursor: None,
        }))
    }
}

struct BTreeMapContext {
    map: Map,
    key: Vec<u8>,
    value: Vec<u8>,
    /// Last key returned by the running iteration.
    cursor: Option<Box<[u8]>>,
}

impl EngineContext for BTreeMapContext {
    fn begin(&mut self, kind: BenchmarkKind) -> Result<(), EngineError> {
        if kind == BenchmarkKind::Iterate {
            self.cursor = None;
        }
        Ok(())
    }

    fn next<'a>(
        &'a mut self,
        kind: BenchmarkKind,
        kv: KeyValue<'a>,
    ) -> Result<KeyValue<'a>, EngineError> {
        match kind {
            BenchmarkKind::Set => {
                self.map.write().insert(kv.key.into(), kv.value.into());
                Ok(kv)
            }
            BenchmarkKind::Delete => match self.map.write().remove(kv.key) {
                Some(_) => Ok(kv),
                None => Err(EngineError::NotFound),
            },
            BenchmarkKind::Get => {
                let map = self.map.read();
                let v = map.get(kv.key).ok_or(EngineError::NotFound)?;
                self.value.clear();
                self.value.extend_from_slice(v);
                drop(map);
                Ok(KeyValue::new(kv.key, &self.value))
            }
            BenchmarkKind::Iterate => {
                let map = self.map.read();
                let next = match self.cursor.as_deref() {
                    None => map.iter().next(),
                    Some(c) => map.range::<[u8], _>((Excluded(c), Unbounded)).next(),
                };
                let (k, v) = next.ok_or(EngineError::NotFound)?;
                self.key.clear();
                self.key.extend_from_slice(k);
                self.value.clear();
                self.value.extend_from_slice(v);
                self.cursor = Some(k.clone());
                drop(map);
                Ok(KeyValue::new(&self.key, &self.value))
            }
            BenchmarkKind::Batch | BenchmarkKind::Crud => Err(EngineError::Unsupported(format!(
                "{} is not a single step",
                kind
            ))),
        }
    }

    fn done(&mut self, kind: BenchmarkKind) -> Result<(), EngineError> {
        if kind == BenchmarkKind::Iterate {
            self.cursor = None;
        }
        Ok(())
    }
}

inventory::submit! {
    Registry::new("btreemap", BTreeMapEngine::new_engine)
}
