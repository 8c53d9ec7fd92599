//! Benchmark kinds and sets of them.

use crate::error::Error;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// A workload shape. The declaration order is the order a worker runs its kinds in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum BenchmarkKind {
    Set,
    Get,
    Iterate,
    Delete,
    Batch,
    Crud,
}

impl BenchmarkKind {
    pub const COUNT: usize = 6;

    pub const ALL: [BenchmarkKind; Self::COUNT] = [
        BenchmarkKind::Set,
        BenchmarkKind::Get,
        BenchmarkKind::Iterate,
        BenchmarkKind::Delete,
        BenchmarkKind::Batch,
        BenchmarkKind::Crud,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BenchmarkKind::Set => "set",
            BenchmarkKind::Get => "get",
            BenchmarkKind::Iterate => "iter",
            BenchmarkKind::Delete => "del",
            BenchmarkKind::Batch => "batch",
            BenchmarkKind::Crud => "crud",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BenchmarkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "set" => Ok(BenchmarkKind::Set),
            "get" => Ok(BenchmarkKind::Get),
            "iter" | "iterate" => Ok(BenchmarkKind::Iterate),
            "del" | "delete" => Ok(BenchmarkKind::Delete),
            "batch" => Ok(BenchmarkKind::Batch),
            "crud" | "transact" => Ok(BenchmarkKind::Crud),
            _ => Err(Error::config(format!("unknown benchmark name '{}'", s))),
        }
    }
}

impl TryFrom<String> for BenchmarkKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// An immutable bit set of [`BenchmarkKind`]s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindSet(u8);

impl KindSet {
    pub const EMPTY: KindSet = KindSet(0);

    /// Kinds that read existing keys.
    pub const READ: KindSet = KindSet::of(&[
        BenchmarkKind::Get,
        BenchmarkKind::Iterate,
        BenchmarkKind::Batch,
        BenchmarkKind::Crud,
    ]);

    /// Kinds that mutate the store.
    pub const WRITE: KindSet = KindSet::of(&[
        BenchmarkKind::Set,
        BenchmarkKind::Delete,
        BenchmarkKind::Batch,
        BenchmarkKind::Crud,
    ]);

    /// Kinds that need a second, independent key space.
    pub const TWO_KEYSPACE: KindSet = KindSet::of(&[BenchmarkKind::Batch, BenchmarkKind::Crud]);

    pub const fn of(kinds: &[BenchmarkKind]) -> KindSet {
        let mut bits = 0u8;
        let mut i = 0;
        while i < kinds.len() {
            bits |= 1 << kinds[i] as u8;
            i += 1;
        }
        KindSet(bits)
    }

    pub fn contains(&self, kind: BenchmarkKind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn intersects(&self, other: KindSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn intersection(&self, other: KindSet) -> KindSet {
        KindSet(self.0 & other.0)
    }

    pub fn difference(&self, other: KindSet) -> KindSet {
        KindSet(self.0 & !other.0)
    }

    /// Iterates in ascending kind order.
    pub fn iter(self) -> impl Iterator<Item = BenchmarkKind> {
        BenchmarkKind::ALL
            .into_iter()
            .filter(move |k| self.contains(*k))
    }
}

impl FromIterator<BenchmarkKind> for KindSet {
    fn from_iter<T: IntoIterator<Item = BenchmarkKind>>(iter: T) -> Self {
        let mut bits = 0u8;
        for k in iter {
            bits |= 1 << k as u8;
        }
        KindSet(bits)
    }
}

impl fmt::Display for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|k| k.name()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}
