//! Workers and the benchmark step state machine.
//!
//! A [`Doer`] owns one engine context, one or two key generators and a histogram. It runs its
//! kinds in ascending order, `repeat` times, each kind as a pass of its share of the operation
//! budget. Every engine step is bracketed as `begin(kind)`, `next(kind, ..)`, `done(kind)` and
//! timed as tightly as possible around the engine calls:
//!
//! - `set`, `get`, `del`: one key per sample.
//! - `crud`: one transaction of a quadruple per sample: set B, set A, delete B, get A.
//! - `batch`: one transaction of `batch_length` quadruples per sample, pairs pre-generated.
//! - `iter`: one cursor per pass, one sample per record.

use crate::config::Config;
use crate::error::{EngineError, Error, Result};
use crate::histogram::{Histogram, HistogramHub};
use crate::kvgen::{KeySpaceShape, KeyValueGenerator};
use crate::kvpool::KvPool;
use crate::*;
use log::{error, info, warn};
use quanta::Instant;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// State shared by all workers of one run.
pub struct RunContext {
    pub(crate) config: Config,
    pub(crate) shape: Arc<KeySpaceShape>,
    pub(crate) hub: Arc<HistogramHub>,
    failed: Arc<AtomicBool>,
    doers_count: AtomicUsize,
    doers_done: AtomicUsize,
}

impl RunContext {
    pub fn new(config: Config, shape: Arc<KeySpaceShape>, hub: Arc<HistogramHub>) -> Self {
        Self {
            config,
            shape,
            hub,
            failed: Arc::new(AtomicBool::new(false)),
            doers_count: AtomicUsize::new(0),
            doers_done: AtomicUsize::new(0),
        }
    }

    /// Stops every worker at its next pass boundary.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// The failure flag, for signal handlers.
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        self.failed.clone()
    }

    /// Workers that have completed `repeat` passes.
    pub fn doers_done(&self) -> usize {
        self.doers_done.load(Ordering::Acquire)
    }

    fn continue_pass(&self, count: usize) -> bool {
        count < self.config.repeat
            || (self.config.continuous
                && self.doers_done.load(Ordering::Acquire)
                    < self.doers_count.load(Ordering::Acquire))
    }
}

/// Identity of a worker, carried into the step functions for error reports.
#[derive(Clone, Copy, Debug)]
struct Tag {
    nth: usize,
    key_space: u64,
    key_sequence: u64,
    ignore_not_found: bool,
}

fn key_not_found(tag: &Tag, op: &'static str, key: &[u8]) -> Result<()> {
    let key = key.escape_ascii().to_string();
    warn!(
        "key {} not found ({}, #{}, {}+{})",
        key, op, tag.nth, tag.key_space, tag.key_sequence
    );
    if tag.ignore_not_found {
        Ok(())
    } else {
        Err(Error::KeyNotFound {
            op,
            doer: tag.nth,
            key,
        })
    }
}

/// A benchmark worker.
pub struct Doer {
    nth: usize,
    kinds: KindSet,
    tag: Tag,
    share: u64,
    gen_a: KeyValueGenerator,
    gen_b: Option<KeyValueGenerator>,
    hist: Histogram,
    run: Arc<RunContext>,
}

impl Doer {
    /// Creates worker `nth` running `kinds`, starting at `key_sequence` of `key_space` (and of
    /// `key_space + 1` for the second generator), with `share` operations per kind and pass.
    pub fn new(
        run: &Arc<RunContext>,
        nth: usize,
        kinds: KindSet,
        key_space: u64,
        key_sequence: u64,
        share: u64,
    ) -> Result<Self> {
        if kinds.is_empty() {
            return Err(Error::config(format!("doer {} has nothing to do", nth)));
        }
        let vsize = run.config.vsize;
        let gen_a = KeyValueGenerator::new(&run.shape, key_space, key_sequence, vsize, 0)?;
        let gen_b = if kinds.intersects(KindSet::TWO_KEYSPACE) {
            info!(
                "doer.{}: {}, key-space {} and {}, key-sequence {}",
                nth,
                kinds,
                key_space,
                key_space + 1,
                key_sequence
            );
            Some(KeyValueGenerator::new(
                &run.shape,
                key_space + 1,
                key_sequence,
                vsize,
                0,
            )?)
        } else {
            info!(
                "doer.{}: {}, key-space {}, key-sequence {}",
                nth, kinds, key_space, key_sequence
            );
            None
        };
        let hist = Histogram::new(&run.hub);
        run.doers_count.fetch_add(1, Ordering::AcqRel);
        Ok(Self {
            nth,
            kinds,
            tag: Tag {
                nth,
                key_space,
                key_sequence,
                ignore_not_found: run.config.ignore_not_found,
            },
            share,
            gen_a,
            gen_b,
            hist,
            run: run.clone(),
        })
    }

    pub fn nth(&self) -> usize {
        self.nth
    }

    pub fn kinds(&self) -> KindSet {
        self.kinds
    }

    /// Runs all passes on a fresh context of `engine`. Any error marks the run as failed.
    pub fn fulfil(&mut self, engine: &dyn StorageEngine) -> Result<()> {
        let result = self.fulfil_inner(engine);
        if let Err(e) = &result {
            error!("doer.{} failed: {}", self.nth, e);
            self.run.fail();
        }
        result
    }

    fn fulfil_inner(&mut self, engine: &dyn StorageEngine) -> Result<()> {
        let mut ctx = engine.thread_new()?;
        for opt in self.run.config.engine_options.iter() {
            if let Err(e) = ctx.option(opt) {
                error!(
                    "engine rejected option `{}` for doer {}: {}",
                    opt, self.nth, e
                );
                ctx.dispose();
                return Err(e.into());
            }
        }
        let result = self.passes(ctx.as_mut());
        ctx.dispose();
        result
    }

    fn passes(&mut self, ctx: &mut dyn EngineContext) -> Result<()> {
        let mut count = 0;
        while self.run.continue_pass(count) {
            // the set is copied, so passes may borrow `self` mutably
            for kind in self.kinds.iter() {
                if self.run.failed() {
                    return Ok(());
                }
                self.run_benchmark(ctx, kind)?;
            }
            count += 1;
            if count == self.run.config.repeat {
                self.run.doers_done.fetch_add(1, Ordering::AcqRel);
            }
            if self.run.failed() {
                break;
            }
        }
        Ok(())
    }

    /// One pass of `kind`; the histogram is folded into the hub even if the pass fails.
    pub(crate) fn run_benchmark(
        &mut self,
        ctx: &mut dyn EngineContext,
        kind: BenchmarkKind,
    ) -> Result<()> {
        let Doer {
            tag,
            share,
            gen_a,
            gen_b,
            hist,
            run,
            ..
        } = self;
        let share = *share;
        gen_a.rewind(tag.key_sequence);
        if let Some(gen_b) = gen_b.as_mut() {
            gen_b.rewind(tag.key_sequence);
        }
        hist.reset(kind);
        let result = if share == 0 {
            Ok(())
        } else {
            match kind {
                BenchmarkKind::Set | BenchmarkKind::Get | BenchmarkKind::Delete => {
                    point(ctx, kind, gen_a, hist, share, tag)
                }
                BenchmarkKind::Iterate => iterate(ctx, hist, share),
                BenchmarkKind::Crud | BenchmarkKind::Batch => match gen_b.as_mut() {
                    Some(gen_b) if kind == BenchmarkKind::Crud => {
                        crud(ctx, gen_a, gen_b, hist, share, tag)
                    }
                    Some(gen_b) => batch(
                        ctx,
                        gen_a,
                        gen_b,
                        hist,
                        share,
                        run.config.batch_length,
                        tag,
                    ),
                    None => Err(Error::config(format!(
                        "doer {} has no second key space for {}",
                        tag.nth, kind
                    ))),
                },
            }
        };
        hist.merge();
        result
    }
}

impl Drop for Doer {
    fn drop(&mut self) {
        self.run.doers_count.fetch_sub(1, Ordering::AcqRel);
    }
}

// {{{ steps

fn point(
    ctx: &mut dyn EngineContext,
    kind: BenchmarkKind,
    gen: &mut KeyValueGenerator,
    hist: &mut Histogram,
    share: u64,
    tag: &Tag,
) -> Result<()> {
    for _ in 0..share {
        let kv = gen.get(kind != BenchmarkKind::Set);
        let t0 = Instant::now();
        let rc = match ctx.begin(kind) {
            Ok(()) => ctx.next(kind, kv).map(|got| match kind {
                BenchmarkKind::Delete => kv.key.len(),
                _ => got.volume(),
            }),
            Err(e) => Err(e),
        };
        let rc2 = ctx.done(kind);
        hist.add(t0, *rc.as_ref().unwrap_or(&kv.volume()));
        match rc {
            Err(EngineError::NotFound) => key_not_found(tag, kind.name(), kv.key)?,
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
        rc2?;
    }
    Ok(())
}

/// Set B, set A, delete B, get A. Returns the bytes moved.
fn quadruple(
    ctx: &mut dyn EngineContext,
    a: KeyValue<'_>,
    b: KeyValue<'_>,
    tag: &Tag,
) -> Result<usize> {
    ctx.next(BenchmarkKind::Set, b)?;
    ctx.next(BenchmarkKind::Set, a)?;
    let mut volume = b.volume() + a.volume();
    match ctx.next(BenchmarkKind::Delete, b) {
        Err(EngineError::NotFound) => key_not_found(tag, "crud.del", b.key)?,
        r => {
            r?;
        }
    }
    volume += b.key.len();
    match ctx.next(BenchmarkKind::Get, a) {
        Ok(got) => volume += got.volume(),
        Err(EngineError::NotFound) => {
            key_not_found(tag, "crud.get", a.key)?;
            volume += a.key.len();
        }
        Err(e) => return Err(e.into()),
    }
    Ok(volume)
}

/// Nominal bytes of a quadruple, used when it did not complete.
fn quadruple_volume(a: &KeyValue<'_>, b: &KeyValue<'_>) -> usize {
    b.volume() + a.volume() + b.key.len() + a.volume()
}

fn crud_step(
    ctx: &mut dyn EngineContext,
    a: KeyValue<'_>,
    b: KeyValue<'_>,
    tag: &Tag,
) -> Result<usize> {
    ctx.begin(BenchmarkKind::Crud)?;
    let volume = quadruple(ctx, a, b, tag)?;
    ctx.done(BenchmarkKind::Crud)?;
    Ok(volume)
}

fn crud(
    ctx: &mut dyn EngineContext,
    gen_a: &mut KeyValueGenerator,
    gen_b: &mut KeyValueGenerator,
    hist: &mut Histogram,
    share: u64,
    tag: &Tag,
) -> Result<()> {
    for _ in 0..share {
        let a = gen_a.get(false);
        let b = gen_b.get(false);
        let t0 = Instant::now();
        let rc = crud_step(ctx, a, b, tag);
        hist.add(
            t0,
            *rc.as_ref().unwrap_or(&quadruple_volume(&a, &b)),
        );
        rc?;
    }
    Ok(())
}

/// One batch transaction of up to `batch_length` quadruples. Returns the volume of the last
/// quadruple.
fn batch_step(
    ctx: &mut dyn EngineContext,
    pool_a: &mut KvPool,
    pool_b: &mut KvPool,
    done: &mut u64,
    share: u64,
    tag: &Tag,
) -> Result<usize> {
    ctx.begin(BenchmarkKind::Batch)?;
    let mut last = 0;
    while let (Some(a), Some(b)) = (pool_a.pull(), pool_b.pull()) {
        last = quadruple(ctx, a, b, tag)?;
        *done += 1;
        if *done == share {
            break;
        }
    }
    ctx.done(BenchmarkKind::Batch)?;
    Ok(last)
}

/// Every batch is charged `batch_length` times the volume of its last quadruple, a final
/// partial batch included.
fn batch(
    ctx: &mut dyn EngineContext,
    gen_a: &mut KeyValueGenerator,
    gen_b: &mut KeyValueGenerator,
    hist: &mut Histogram,
    share: u64,
    batch_length: usize,
    tag: &Tag,
) -> Result<()> {
    let nominal = {
        let (k, v) = (gen_a.key_size(), gen_a.value_size());
        (k + v) * 3 + k
    };
    let mut pool_a = KvPool::new(gen_a, batch_length);
    let mut pool_b = KvPool::new(gen_b, batch_length);
    let mut done = 0;
    loop {
        let t0 = Instant::now();
        let rc = batch_step(ctx, &mut pool_a, &mut pool_b, &mut done, share, tag);
        hist.add(t0, *rc.as_ref().unwrap_or(&nominal) * batch_length);
        rc?;
        if done >= share {
            return Ok(());
        }
        pool_a.fill(gen_a);
        pool_b.fill(gen_b);
    }
}

/// One cursor walk; exhaustion ends the pass and is not a sample.
fn iterate(ctx: &mut dyn EngineContext, hist: &mut Histogram, share: u64) -> Result<()> {
    let mut t0 = Instant::now();
    ctx.begin(BenchmarkKind::Iterate)?;
    for _ in 0..share {
        match ctx.next(BenchmarkKind::Iterate, KeyValue::default()) {
            Ok(kv) => hist.add(t0, kv.volume()),
            Err(EngineError::NotFound) => break,
            Err(e) => return Err(e.into()),
        }
        t0 = Instant::now();
    }
    ctx.done(BenchmarkKind::Iterate)?;
    Ok(())
}

// }}} steps

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::btreemap::BTreeMapEngine;
    use crate::engines::null::NullEngine;
    use std::time::Duration;
    use BenchmarkKind::*;

    fn context(config: Config, nspaces: u64) -> Arc<RunContext> {
        let shape = KeySpaceShape::setup(
            !config.binary,
            config.ksize,
            nspaces,
            1,
            config.keys,
            config.seed,
        )
        .unwrap();
        let hub = Arc::new(HistogramHub::new(Duration::from_secs(3600)));
        for k in config.kinds.iter() {
            hub.enable(*k);
        }
        Arc::new(RunContext::new(config, shape, hub))
    }

    fn config(kinds: &[BenchmarkKind], count: u64, keys: u64) -> Config {
        Config {
            kinds: kinds.to_vec(),
            count,
            keys,
            ..Default::default()
        }
    }

    #[test]
    fn set_then_get_finds_everything() {
        let run = context(config(&[Set, Get], 1000, 1000), 1);
        let engine = BTreeMapEngine::new();
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Set, Get]), 0, 0, 1000).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);
        assert_eq!(engine.len(), 1000);
        assert_eq!(run.hub.summary(Set).unwrap().count, 1000);
        assert_eq!(run.hub.summary(Get).unwrap().count, 1000);
        assert_eq!(run.doers_done(), 1);
        assert!(!run.failed());
    }

    #[test]
    fn missing_keys_fail_unless_ignored() {
        let run = context(config(&[Get], 10, 10), 1);
        let engine = BTreeMapEngine::new();
        let mut doer = Doer::new(&run, 3, KindSet::of(&[Get]), 0, 0, 10).unwrap();
        let err = doer.fulfil(&engine).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { op: "get", doer: 3, .. }));
        assert!(run.failed());
        drop(doer);
        // the failing sample is still recorded
        assert_eq!(run.hub.summary(Get).unwrap().count, 1);

        let mut c = config(&[Get, Delete], 10, 10);
        c.ignore_not_found = true;
        let run = context(c, 1);
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Get, Delete]), 0, 0, 10).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);
        assert_eq!(run.hub.summary(Get).unwrap().count, 10);
        assert_eq!(run.hub.summary(Delete).unwrap().count, 10);
    }

    #[test]
    fn crud_leaves_a_and_removes_b() {
        let run = context(config(&[Crud], 50, 1000), 2);
        let engine = BTreeMapEngine::new();
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Crud]), 0, 0, 50).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);
        assert_eq!(engine.len(), 50);
        let s = run.hub.summary(Crud).unwrap();
        assert_eq!(s.count, 50);
        // set B, set A, del B, get A
        assert_eq!(s.volume, 50 * (48 + 48 + 16 + 48));

        let mut ctx = engine.thread_new().unwrap();
        let mut gen_a = KeyValueGenerator::new(&run.shape, 0, 0, 32, 0).unwrap();
        let mut gen_b = KeyValueGenerator::new(&run.shape, 1, 0, 32, 0).unwrap();
        for _ in 0..50 {
            let a = gen_a.get(false);
            let expected = a.value.to_vec();
            let got = ctx.next(Get, KeyValue::new(a.key, &[])).unwrap();
            assert_eq!(got.value, &expected[..]);
            let b = gen_b.get(true);
            assert_eq!(ctx.next(Get, b), Err(EngineError::NotFound));
        }
    }

    #[test]
    fn batch_charges_full_batches() {
        let mut c = config(&[Batch], 750, 10_000);
        c.batch_length = 500;
        let run = context(c, 2);
        let engine = BTreeMapEngine::new();
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Batch]), 0, 0, 750).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);
        assert_eq!(engine.len(), 750);
        let s = run.hub.summary(Batch).unwrap();
        // one full batch and one of 250 quadruples, both charged for 500
        assert_eq!(s.count, 2);
        assert_eq!(s.volume, 2 * 500 * (48 + 48 + 16 + 48));
    }

    #[test]
    fn iterate_stops_at_exhaustion() {
        let engine = BTreeMapEngine::new();
        let run = context(config(&[Set, Iterate], 100, 100), 1);
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Set]), 0, 0, 100).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);

        let mut doer = Doer::new(&run, 0, KindSet::of(&[Iterate]), 0, 0, 1000).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);
        let s = run.hub.summary(Iterate).unwrap();
        assert_eq!(s.count, 100);
        assert_eq!(s.volume, 100 * 48);

        // the budget ends a pass too
        let run = context(config(&[Iterate], 10, 100), 1);
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Iterate]), 0, 0, 10).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);
        assert_eq!(run.hub.summary(Iterate).unwrap().count, 10);
    }

    struct Recording {
        inner: Box<dyn EngineContext>,
        seen: Vec<Vec<u8>>,
    }

    impl EngineContext for Recording {
        fn begin(&mut self, kind: BenchmarkKind) -> Result<(), EngineError> {
            self.inner.begin(kind)
        }

        fn next<'a>(
            &'a mut self,
            kind: BenchmarkKind,
            kv: KeyValue<'a>,
        ) -> Result<KeyValue<'a>, EngineError> {
            let got = self.inner.next(kind, kv)?;
            if kind == Iterate {
                self.seen.push(got.key.to_vec());
            }
            Ok(got)
        }

        fn done(&mut self, kind: BenchmarkKind) -> Result<(), EngineError> {
            self.inner.done(kind)
        }
    }

    #[test]
    fn iterate_walks_keys_in_order() {
        let engine = BTreeMapEngine::new();
        let run = context(config(&[Set, Iterate], 100, 100), 1);
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Set]), 0, 0, 100).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);

        let mut rec = Recording {
            inner: engine.thread_new().unwrap(),
            seen: Vec::new(),
        };
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Iterate]), 0, 0, 1000).unwrap();
        doer.run_benchmark(&mut rec, Iterate).unwrap();
        drop(doer);
        assert_eq!(rec.seen.len(), 100);
        // strictly ascending, hence distinct
        assert!(rec.seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn every_pass_restarts_at_the_key_sequence() {
        // fewer operations than keys, starting mid-way
        let run = context(config(&[Set, Get, Delete], 40, 100), 1);
        let engine = BTreeMapEngine::new();
        let kinds = KindSet::of(&[Set, Get, Delete]);
        let mut doer = Doer::new(&run, 0, kinds, 0, 30, 40).unwrap();
        doer.fulfil(&engine).unwrap();
        drop(doer);
        assert!(!run.failed());
        assert_eq!(run.hub.summary(Get).unwrap().count, 40);
        assert_eq!(run.hub.summary(Delete).unwrap().count, 40);
        assert!(engine.is_empty());
    }

    #[test]
    fn repeat_and_continuous_completion() {
        let mut c = config(&[Set], 10, 100);
        c.repeat = 3;
        let run = context(c, 1);
        let engine = NullEngine::new();
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Set]), 0, 0, 10).unwrap();
        doer.fulfil(&engine).unwrap();
        assert_eq!(run.hub.summary(Set).unwrap().count, 30);
        assert_eq!(run.doers_done(), 1);

        let mut c = config(&[Set], 10, 100);
        c.continuous = true;
        let run = context(c, 1);
        let mut a = Doer::new(&run, 0, KindSet::of(&[Set]), 0, 0, 10).unwrap();
        let b = Doer::new(&run, 1, KindSet::of(&[Set]), 0, 50, 10).unwrap();
        // `b` never runs, so `a` keeps going until the run is stopped
        let stopper = {
            let run = run.clone();
            std::thread::spawn(move || {
                while run.hub.summary(Set).map(|s| s.count).unwrap_or(0) < 50 {
                    std::thread::yield_now();
                }
                run.fail();
            })
        };
        a.fulfil(&engine).unwrap();
        stopper.join().unwrap();
        assert!(run.hub.summary(Set).unwrap().count >= 50);
        assert_eq!(run.doers_done(), 1);
        drop(b);
    }

    #[test]
    fn rejected_option_fails_the_doer() {
        let mut c = config(&[Set], 10, 100);
        c.engine_options = vec!["cache=1G".to_string()];
        let run = context(c, 1);
        let engine = BTreeMapEngine::new();
        let mut doer = Doer::new(&run, 0, KindSet::of(&[Set]), 0, 0, 10).unwrap();
        assert!(matches!(
            doer.fulfil(&engine),
            Err(Error::Engine(EngineError::Unsupported(_)))
        ));
        assert!(run.failed());
        assert!(engine.is_empty());
    }

    #[test]
    fn second_key_space_is_required() {
        let run = context(config(&[Crud], 10, 100), 1);
        assert!(Doer::new(&run, 0, KindSet::of(&[Crud]), 0, 0, 10).is_err());
        assert!(Doer::new(&run, 0, KindSet::EMPTY, 0, 0, 10).is_err());
    }
}
