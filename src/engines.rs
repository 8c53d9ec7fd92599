//! Built-in and external storage engines.
//!
//! ## Configuration Format
//!
//! An engine is selected by the `[engine]` table of the configuration. `name` is the registered
//! name of the engine; every other key is handed to the engine's constructor untouched:
//!
//! ``` toml
//! [engine]
//! name = "btreemap"
//! ```
//!
//! The built-in engines are [`null`] and [`btreemap`]. Their options are documented in their
//! module-level documentations.
//!
//! ## Registering New Engines
//!
//! Implement [`StorageEngine`](crate::StorageEngine) and [`EngineContext`](crate::EngineContext)
//! for the engine, then write a constructor
//! with the signature `fn(&toml::Table, &Durability) -> Result<SharedEngine>`. The constructor
//! should reject the durability modes the engine cannot honor with [`Error::Config`].
//!
//! The final step is to register the constructor (along with its name) using [`inventory`]. A
//! minimal example would be: `inventory::submit! { Registry::new("name", constructor_fn) };`.
//!
//! The source code of the built-in engines provides good examples on this process.

use crate::config::Durability;
use crate::error::{Error, Result};
use crate::SharedEngine;
use hashbrown::HashMap;
use log::debug;
use serde::Deserialize;
use toml::Table;

/// A registered engine constructor.
pub type Constructor = fn(&Table, &Durability) -> Result<SharedEngine>;

/// The centralized registry that maps the name of an engine to its constructor function.
///
/// A user-defined engine can use the [`inventory::submit!`] macro to register itself.
pub struct Registry<'a> {
    pub(crate) name: &'a str,
    constructor: Constructor,
}

impl<'a> Registry<'a> {
    pub const fn new(name: &'a str, constructor: Constructor) -> Self {
        Self { name, constructor }
    }
}

inventory::collect!(Registry<'static>);

/// The `[engine]` table: a name and engine-specific options.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineOpt {
    pub name: String,
    #[serde(flatten)]
    pub opt: Table,
}

/// Names of all registered engines, sorted.
pub fn registered() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = inventory::iter::<Registry>
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort_unstable();
    names
}

/// Creates the engine named in `opt`.
pub fn create(opt: &EngineOpt, durability: &Durability) -> Result<SharedEngine> {
    let mut registered: HashMap<&'static str, Constructor> = HashMap::new();
    for r in inventory::iter::<Registry> {
        debug!("Adding supported engine: {}", r.name);
        assert!(registered.insert(r.name, r.constructor).is_none()); // no existing name
    }
    let f = registered
        .get(opt.name.as_str())
        .ok_or_else(|| Error::config(format!("engine {} not found in registry", opt.name)))?;
    f(&opt.opt, durability)
}

pub mod btreemap;
pub mod null;
