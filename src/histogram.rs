//! Concurrent latency histograms with a live timeline.
//!
//! Every worker records into its own [`Histogram`]. From time to time (every hundredth of the
//! timeline interval) a worker folds the samples recorded since its last fold into the run-wide
//! [`HistogramHub`], but only if the hub's lock is free at that moment: a contended fold is
//! simply retried later, so the hot path never blocks.
//!
//! ## Timeline
//!
//! Once per interval (1 second by default), after every active worker has contributed at least
//! one fold, a line per enabled kind is printed:
//!
//! ```txt
//!      time | bench      rps      min       avg       rms       max       vol           #N
//!    1.004 |   set:  412.331K  780.000ns   2.117us   3.502us 510.004us  18.554Mbps   412.000K
//! ```
//!
//! `rps`, the latencies and `vol` describe the interval only; `#N` is the running total. With a
//! CSV prefix configured, the same data (in seconds) goes to `<prefix><engine>_<sync>_timeline.csv`.
//!
//! ## Final report
//!
//! After the run, each kind with operations gets a table of the non-empty latency buckets (the
//! range is inclusive), a summary of min/avg/rms/max latency and throughput, and percentiles. The
//! per-kind CSV is `<prefix><engine>_<sync>_<kind>.csv`.

use crate::config::SyncMode;
use crate::error::Result;
use crate::kind::BenchmarkKind;
use hdrhistogram::Histogram as HdrHistogram;
use log::{debug, warn};
use parking_lot::Mutex;
use quanta::Instant;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// {{{ buckets

/// Number of latency buckets.
pub const BUCKETS: usize = 167;

const NS_PER_SEC: u64 = 1_000_000_000;

const LINE: [u64; 16] = [12, 14, 16, 18, 20, 25, 30, 35, 40, 45, 50, 60, 70, 80, 90, 100];

const fn bounds() -> [u64; BUCKETS] {
    let mut b = [0u64; BUCKETS];
    b[0] = 9;
    let mut i = 1;
    let mut scale = 1u64;
    // 1ns .. 1s, 16 steps per decade
    while scale <= NS_PER_SEC {
        let mut j = 0;
        while j < LINE.len() {
            b[i] = scale * LINE[j];
            i += 1;
            j += 1;
        }
        scale *= 10;
    }
    b[i] = NS_PER_SEC * 5 * 60;
    b[i + 1] = NS_PER_SEC * 30 * 60;
    b[i + 2] = NS_PER_SEC * 3600 * 4;
    b[i + 3] = NS_PER_SEC * 3600 * 8;
    b[i + 4] = NS_PER_SEC * 3600 * 24;
    b[i + 5] = u64::MAX;
    b
}

/// Exclusive upper bounds of the buckets, in nanoseconds.
pub static BOUNDS: [u64; BUCKETS] = bounds();

/// Bucket `i` holds latencies in `[BOUNDS[i - 1], BOUNDS[i])`, bucket 0 starts at zero.
pub fn bucket_index(latency: u64) -> usize {
    BOUNDS
        .partition_point(|&b| b <= latency)
        .min(BUCKETS - 1)
}

fn bucket_range(i: usize) -> (u64, u64) {
    let lo = if i > 0 { BOUNDS[i - 1] } else { 0 };
    (lo, BOUNDS[i] - 1)
}

// }}} buckets

// {{{ formatting

/// Formats `val` with an SI prefix and a width of 7.
fn scaled(mut val: f64, unit: &str) -> String {
    const SCALE: &[u8] = b"yzafpnum KMGTPEZY";
    let mut idx = 8;
    while val > 995.0 && idx + 1 < SCALE.len() {
        val *= 1e-3;
        idx += 1;
    }
    while val < 1.0 && idx > 0 {
        val *= 1e3;
        idx -= 1;
    }
    if idx == 8 {
        format!(" {:7.3}{} ", val, unit)
    } else {
        format!(" {:7.3}{}{}", val, SCALE[idx] as char, unit)
    }
}

fn latency(ns: u64) -> String {
    scaled(ns as f64 / NS_PER_SEC as f64, "s")
}

fn secs(ns: u64) -> f64 {
    ns as f64 / NS_PER_SEC as f64
}

// }}} formatting

// {{{ csv

/// Naming of the CSV reports of a run: `<prefix><engine>_<sync>_<item>.csv`.
#[derive(Clone, Debug)]
pub struct CsvOutput {
    prefix: String,
    engine: String,
    sync: SyncMode,
}

impl CsvOutput {
    pub fn new(prefix: &str, engine: &str, sync: SyncMode) -> Self {
        Self {
            prefix: prefix.to_string(),
            engine: engine.to_string(),
            sync,
        }
    }

    pub fn path(&self, item: &str) -> PathBuf {
        PathBuf::from(format!(
            "{}{}_{}_{}.csv",
            self.prefix, self.engine, self.sync, item
        ))
    }

    pub fn create(&self, item: &str) -> Result<BufWriter<File>> {
        let path = self.path(item);
        debug!("Writing CSV report {}", path.display());
        Ok(BufWriter::new(File::create(path)?))
    }
}

// }}} csv

// {{{ accumulator

/// Running sums of a set of samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub n: u64,
    pub latency_sum: u128,
    pub latency_sq: u128,
    pub volume: u64,
}

impl Stat {
    fn delta(&self, since: &Stat) -> Stat {
        Stat {
            n: self.n - since.n,
            latency_sum: self.latency_sum - since.latency_sum,
            latency_sq: self.latency_sq - since.latency_sq,
            volume: self.volume - since.volume,
        }
    }

    fn add(&mut self, other: &Stat) {
        self.n += other.n;
        self.latency_sum += other.latency_sum;
        self.latency_sq += other.latency_sq;
        self.volume += other.volume;
    }

    fn avg(&self) -> u64 {
        if self.n == 0 {
            0
        } else {
            (self.latency_sum / self.n as u128) as u64
        }
    }

    fn rms(&self) -> u64 {
        if self.n == 0 {
            0
        } else {
            ((self.latency_sq / self.n as u128) as f64).sqrt() as u64
        }
    }
}

fn new_hdr() -> HdrHistogram<u64> {
    // auto-resizing, 3 significant figures never fails
    HdrHistogram::new(3).expect("valid histogram precision")
}

/// Samples of one kind. In a worker, `buckets`, `min`, `max` and `hdr` only cover the samples
/// since the last fold; in the hub they cover the whole run.
struct Accumulator {
    enabled: bool,
    acc: Stat,
    last: Stat,
    min: u64,
    max: u64,
    whole_min: u64,
    whole_max: u64,
    begin: Option<Instant>,
    end: Option<Instant>,
    buckets: Vec<u64>,
    hdr: HdrHistogram<u64>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            enabled: false,
            acc: Stat::default(),
            last: Stat::default(),
            min: u64::MAX,
            max: 0,
            whole_min: u64::MAX,
            whole_max: 0,
            begin: None,
            end: None,
            buckets: vec![0; BUCKETS],
            hdr: new_hdr(),
        }
    }

    fn record(&mut self, t0: Instant, now: Instant, volume: usize) {
        let latency = now.saturating_duration_since(t0).as_nanos() as u64;
        if self.begin.is_none() {
            self.begin = Some(t0);
        }
        self.end = Some(now);
        self.acc.n += 1;
        self.acc.latency_sum += latency as u128;
        self.acc.latency_sq += latency as u128 * latency as u128;
        self.acc.volume += volume as u64;
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
        self.buckets[bucket_index(latency)] += 1;
        self.hdr.saturating_record(latency);
    }

    fn pending(&self) -> bool {
        self.acc.n != self.last.n
    }

    /// Adds the unflushed samples of `src`.
    fn fold(&mut self, src: &Accumulator) {
        self.acc.add(&src.acc.delta(&src.last));
        for (d, s) in self.buckets.iter_mut().zip(src.buckets.iter()) {
            *d += s;
        }
        self.begin = match (self.begin, src.begin) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.end = self.end.max(src.end);
        self.min = self.min.min(src.min);
        self.max = self.max.max(src.max);
        assert!(self.hdr.add(&src.hdr).is_ok());
    }

    /// Marks everything recorded so far as flushed.
    fn roll(&mut self) {
        self.min = u64::MAX;
        self.max = 0;
        self.last = self.acc;
        self.buckets.iter_mut().for_each(|b| *b = 0);
        self.hdr.reset();
    }
}

// }}} accumulator

// {{{ hub

/// Outcome of a checkpoint attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Checkpoint {
    /// The interval has not elapsed yet.
    NotYet,
    /// Counted, but not every active worker has contributed to this epoch.
    Pending,
    /// A timeline line was emitted and a new epoch started.
    Emitted,
}

struct HubState {
    checkpoint: Instant,
    doers_active: usize,
    doers_merged: usize,
    per_kind: Vec<Accumulator>,
    timeline: Option<Box<dyn Write + Send>>,
    header_printed: bool,
}

/// The run-wide view of all workers' histograms.
pub struct HistogramHub {
    starting_point: Instant,
    interval_stat: Duration,
    interval_merge: Duration,
    /// Epoch of the timeline; written under the lock, read on the hot path without it.
    merge_evo: AtomicU64,
    state: Mutex<HubState>,
}

impl HistogramHub {
    /// Creates a hub printing a timeline line every `interval`.
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            starting_point: now,
            interval_stat: interval,
            interval_merge: interval / 100,
            merge_evo: AtomicU64::new(0),
            state: Mutex::new(HubState {
                checkpoint: now,
                doers_active: 0,
                doers_merged: 0,
                per_kind: (0..BenchmarkKind::COUNT).map(|_| Accumulator::new()).collect(),
                timeline: None,
                header_printed: false,
            }),
        }
    }

    /// Mirrors the timeline into `w` as CSV.
    pub fn set_timeline(&self, w: Box<dyn Write + Send>) {
        self.state.lock().timeline = Some(w);
    }

    /// Starts collecting `kind`. Samples of disabled kinds are dropped when folded.
    pub fn enable(&self, kind: BenchmarkKind) {
        let mut st = self.state.lock();
        let h = &mut st.per_kind[kind.index()];
        if !h.enabled {
            *h = Accumulator::new();
            h.enabled = true;
        }
    }

    /// Current timeline epoch.
    #[cfg(test)]
    fn epoch(&self) -> u64 {
        self.merge_evo.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.state.lock().doers_active
    }

    fn attach(&self) -> u64 {
        let mut st = self.state.lock();
        st.doers_active += 1;
        self.merge_evo.load(Ordering::Acquire)
    }

    fn detach(&self, evo: u64) {
        let mut st = self.state.lock();
        if evo == self.merge_evo.load(Ordering::Acquire) + 1 {
            // counted in the current epoch
            assert!(st.doers_merged > 0);
            st.doers_merged -= 1;
        }
        assert!(st.doers_active > 0);
        st.doers_active -= 1;
        if st.doers_merged > 0 && st.doers_merged == st.doers_active {
            let now = Instant::now();
            self.emit(&mut st, now);
        }
    }

    /// Counts the caller into the current epoch and emits the timeline line once every active
    /// worker has been counted. `None` forces the line, as done at the end of a run.
    pub fn checkpoint(&self, now: Option<Instant>) -> Checkpoint {
        let mut st = self.state.lock();
        self.checkpoint_locked(&mut st, now)
    }

    /// Forces the final timeline line.
    pub fn finish(&self) {
        self.checkpoint(None);
    }

    fn checkpoint_locked(&self, st: &mut HubState, now: Option<Instant>) -> Checkpoint {
        let now = match now {
            Some(now) => {
                if now.saturating_duration_since(st.checkpoint) < self.interval_stat {
                    return Checkpoint::NotYet;
                }
                st.doers_merged += 1;
                assert!(
                    st.doers_merged <= st.doers_active,
                    "{} workers merged but {} active",
                    st.doers_merged,
                    st.doers_active
                );
                if st.doers_active > st.doers_merged {
                    return Checkpoint::Pending;
                }
                now
            }
            None => Instant::now(),
        };
        self.emit(st, now);
        Checkpoint::Emitted
    }

    fn emit(&self, st: &mut HubState, now: Instant) {
        let mut csv = String::new();
        if !st.header_printed {
            let mut line = String::from("     time");
            csv.push_str("\ttime");
            for (i, _) in st.per_kind.iter().enumerate().filter(|(_, h)| h.enabled) {
                let name = BenchmarkKind::ALL[i].name();
                line.push_str(
                    " | bench      rps      min       avg       rms       max       vol           #N",
                );
                csv.push_str(&format!(
                    ",\t{0}_rps,\t{0}_min,\t{0}_avg,\t{0}_rms,\t{0}_max",
                    name
                ));
            }
            csv.push('\n');
            println!("{}", line);
            st.header_printed = true;
        }

        let timepoint = now.saturating_duration_since(self.starting_point).as_secs_f64();
        let wall = now
            .saturating_duration_since(st.checkpoint)
            .as_secs_f64()
            .max(1e-9);
        st.checkpoint = now;

        let mut line = format!("{:9.3}", timepoint);
        csv.push_str(&format!("{:e}", timepoint));
        for (i, h) in st.per_kind.iter_mut().enumerate() {
            if !h.enabled {
                continue;
            }
            line.push_str(&format!(" | {:>5}", BenchmarkKind::ALL[i].name()));
            let delta = h.acc.delta(&h.last);
            if delta.n > 0 {
                let rps = delta.n as f64 / wall;
                let bps = delta.volume as f64 / wall;
                let (avg, rms) = (delta.avg(), delta.rms());
                line.push(':');
                line.push_str(&scaled(rps, ""));
                line.push_str(&latency(h.min));
                line.push_str(&latency(avg));
                line.push_str(&latency(rms));
                line.push_str(&latency(h.max));
                line.push_str(&scaled(bps, "bps"));
                line.push_str(&scaled(h.acc.n as f64, ""));
                csv.push_str(&format!(
                    ",\t{:e},\t{:e},\t{:e},\t{:e},\t{:e}",
                    rps,
                    secs(h.min),
                    secs(avg),
                    secs(rms),
                    secs(h.max)
                ));
            } else {
                line.push_str(
                    "        -        -         -         -         -         -           - ",
                );
                csv.push_str(",\t\t,\t\t,\t\t,\t\t");
            }
            h.whole_min = h.whole_min.min(h.min);
            h.whole_max = h.whole_max.max(h.max);
            h.min = u64::MAX;
            h.max = 0;
            h.last = h.acc;
        }
        csv.push('\n');
        println!("{}", line);

        if let Some(w) = st.timeline.as_mut() {
            if let Err(e) = w.write_all(csv.as_bytes()).and_then(|_| w.flush()) {
                warn!("Timeline CSV disabled after write error: {}", e);
                st.timeline = None;
            }
        }

        st.doers_merged = 0;
        self.merge_evo.fetch_add(1, Ordering::AcqRel);
    }

    /// Folds the unflushed samples of `src` into `kind`'s totals. If `evo` shows the worker
    /// has not been counted in this epoch yet, this fold counts it.
    fn merge_locked(
        &self,
        st: &mut HubState,
        src: &Accumulator,
        kind: BenchmarkKind,
        evo: &mut u64,
        now: Instant,
    ) {
        let dst = &mut st.per_kind[kind.index()];
        if !dst.enabled || !src.pending() {
            return;
        }
        dst.fold(src);
        if *evo == self.merge_evo.load(Ordering::Acquire)
            && self.checkpoint_locked(st, Some(now)) != Checkpoint::NotYet
        {
            *evo += 1;
        }
    }

    /// Totals of `kind`, or `None` if nothing was recorded.
    pub fn summary(&self, kind: BenchmarkKind) -> Option<Summary> {
        let st = self.state.lock();
        let h = &st.per_kind[kind.index()];
        if !h.enabled || h.acc.n == 0 {
            return None;
        }
        let wall = match (h.begin, h.end) {
            (Some(b), Some(e)) => e.saturating_duration_since(b).as_nanos().max(1) as f64,
            _ => 1.0,
        };
        let buckets = h
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(i, &count)| {
                let (lo, hi) = bucket_range(i);
                Bucket { lo, hi, count }
            })
            .collect();
        Some(Summary {
            kind,
            count: h.acc.n,
            volume: h.acc.volume,
            latency_total: h.acc.latency_sum.min(u64::MAX as u128) as u64,
            min: h.whole_min.min(h.min),
            max: h.whole_max.max(h.max),
            avg: h.acc.avg(),
            rms: h.acc.rms(),
            throughput: h.acc.n as f64 * NS_PER_SEC as f64 / wall,
            p50: h.hdr.value_at_quantile(0.50),
            p95: h.hdr.value_at_quantile(0.95),
            p99: h.hdr.value_at_quantile(0.99),
            p999: h.hdr.value_at_quantile(0.999),
            buckets,
        })
    }

    /// Prints the final report of every kind with operations, writing per-kind CSV files if
    /// `csv` is given.
    pub fn print_report(&self, csv: Option<&CsvOutput>) -> Result<Vec<Summary>> {
        let mut summaries = Vec::new();
        for kind in BenchmarkKind::ALL {
            let Some(s) = self.summary(kind) else {
                continue;
            };
            s.print();
            if let Some(csv) = csv {
                let mut w = csv.create(kind.name())?;
                s.write_csv(&mut w)?;
                w.flush()?;
            }
            summaries.push(s);
        }
        Ok(summaries)
    }
}

// }}} hub

// {{{ summary

/// A non-empty latency bucket, bounds inclusive, in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bucket {
    pub lo: u64,
    pub hi: u64,
    pub count: u64,
}

/// Final statistics of one kind. Latencies are in nanoseconds, throughput in operations per
/// second.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub kind: BenchmarkKind,
    pub count: u64,
    pub volume: u64,
    pub latency_total: u64,
    pub min: u64,
    pub max: u64,
    pub avg: u64,
    pub rms: u64,
    pub throughput: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    pub buckets: Vec<Bucket>,
}

impl Summary {
    fn print(&self) {
        println!();
        println!(
            ">>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>> {}({})",
            self.kind, self.count
        );
        println!(
            "[{:>8}   {:>8}   ]{:>16}{:>8}{:>10}",
            "ltn_from", "ltn_to", "ops_count", "%", "p%"
        );
        println!("----------------------------------------------------------");
        let mut n = 0;
        for b in self.buckets.iter() {
            n += b.count;
            println!(
                "[{},{} ]{:>16}{:>7.2}%{:>9.4}%",
                latency(b.lo),
                latency(b.hi),
                b.count,
                b.count as f64 * 1e2 / self.count as f64,
                n as f64 * 1e2 / self.count as f64
            );
        }
        println!("----------------------------------------------------------");
        println!("total:{:>16}  {:>16}", latency(self.latency_total), n);
        println!("min latency:{}/op", latency(self.min));
        println!("avg latency:{}/op", latency(self.avg));
        println!("rms latency:{}/op", latency(self.rms));
        println!("max latency:{}/op", latency(self.max));
        println!(" throughput:{}ops/s", scaled(self.throughput, ""));
        println!(
            " percentile: p50{} p95{} p99{} p999{}",
            latency(self.p50),
            latency(self.p95),
            latency(self.p99),
            latency(self.p999)
        );
    }

    fn write_csv(&self, w: &mut impl Write) -> std::io::Result<()> {
        writeln!(w, "ltn_open,\tltn_close,\tops_count,\t%,\tp%")?;
        let mut n = 0;
        for b in self.buckets.iter() {
            n += b.count;
            writeln!(
                w,
                "{:e},\t{:e},\t{},\t{:e},\t{:e}",
                secs(b.lo),
                secs(b.hi),
                b.count,
                b.count as f64 * 1e2 / self.count as f64,
                n as f64 * 1e2 / self.count as f64
            )?;
        }
        writeln!(w)?;
        writeln!(w, "ltn_min,\tltn_avg,\tltn_rms,\tltn_max,\tthroughput")?;
        writeln!(
            w,
            "{:e},\t{:e},\t{:e},\t{:e},\t{:e}",
            secs(self.min),
            secs(self.avg),
            secs(self.rms),
            secs(self.max),
            self.throughput
        )
    }
}

// }}} summary

// {{{ histogram

/// A worker's histogram. Dropping it leaves the timeline's bookkeeping.
pub struct Histogram {
    hub: Arc<HistogramHub>,
    kind: Option<BenchmarkKind>,
    local: Accumulator,
    checkpoint: Instant,
    merge_evo: u64,
}

impl Histogram {
    pub fn new(hub: &Arc<HistogramHub>) -> Self {
        let merge_evo = hub.attach();
        Self {
            hub: hub.clone(),
            kind: None,
            local: Accumulator::new(),
            checkpoint: Instant::now(),
            merge_evo,
        }
    }

    /// Starts recording samples of `kind` from a clean slate.
    pub fn reset(&mut self, kind: BenchmarkKind) {
        self.kind = Some(kind);
        self.local = Accumulator::new();
        self.checkpoint = Instant::now();
    }

    /// Records an operation started at `t0` and finished now.
    pub fn add(&mut self, t0: Instant, volume: usize) {
        self.record_at(t0, Instant::now(), volume);
    }

    pub(crate) fn record_at(&mut self, t0: Instant, now: Instant, volume: usize) {
        self.local.record(t0, now, volume);

        let Some(kind) = self.kind else {
            return;
        };
        if now.saturating_duration_since(self.checkpoint) < self.hub.interval_merge
            || self.merge_evo != self.hub.merge_evo.load(Ordering::Acquire)
        {
            return;
        }
        let hub = &self.hub;
        if let Some(mut st) = hub.state.try_lock() {
            hub.merge_locked(&mut st, &self.local, kind, &mut self.merge_evo, now);
            drop(st);
            self.checkpoint = now;
            self.local.roll();
        }
    }

    /// Folds everything not yet folded into the hub, waiting for the lock.
    pub fn merge(&mut self) {
        let Some(kind) = self.kind else {
            return;
        };
        if !self.local.pending() {
            return;
        }
        let now = Instant::now();
        let hub = &self.hub;
        let mut st = hub.state.lock();
        hub.merge_locked(&mut st, &self.local, kind, &mut self.merge_evo, now);
        drop(st);
        self.checkpoint = now;
        self.local.roll();
    }

    /// Samples recorded since the last [`reset`](Self::reset).
    pub fn count(&self) -> u64 {
        self.local.acc.n
    }
}

impl Drop for Histogram {
    fn drop(&mut self) {
        self.hub.detach(self.merge_evo);
    }
}

// }}} histogram

// {{{ tests

#[cfg(test)]
mod tests {
    use super::*;
    use BenchmarkKind::*;

    fn ns(n: u64) -> Duration {
        Duration::from_nanos(n)
    }

    /// A hub whose timeline never fires during a test.
    fn quiet_hub() -> Arc<HistogramHub> {
        let hub = Arc::new(HistogramHub::new(Duration::from_secs(3600)));
        hub.enable(Set);
        hub
    }

    fn record_all(h: &mut Histogram, samples: &[u64]) {
        let t0 = Instant::now();
        for &s in samples {
            h.record_at(t0, t0 + ns(s), 10);
        }
    }

    #[test]
    fn bucket_table() {
        assert_eq!(BOUNDS.len(), BUCKETS);
        assert!(BOUNDS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(BOUNDS[0], 9);
        assert_eq!(BOUNDS[1], 12);
        assert_eq!(BOUNDS[16], 100);
        assert_eq!(BOUNDS[160], 100 * NS_PER_SEC);
        assert_eq!(BOUNDS[165], NS_PER_SEC * 3600 * 24);
        assert_eq!(BOUNDS[166], u64::MAX);
    }

    #[test]
    fn bucket_boundaries_are_exclusive() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(8), 0);
        assert_eq!(bucket_index(9), 1);
        assert_eq!(bucket_index(11), 1);
        assert_eq!(bucket_index(12), 2);
        assert_eq!(bucket_index(1_000), bucket_index(999) + 1);
        assert_eq!(bucket_index(u64::MAX - 1), BUCKETS - 1);
        assert_eq!(bucket_index(u64::MAX), BUCKETS - 1);
        assert_eq!(bucket_range(0), (0, 8));
        assert_eq!(bucket_range(1), (9, 11));
    }

    #[test]
    fn add_counts_min_max_and_buckets() {
        let hub = quiet_hub();
        let mut h = Histogram::new(&hub);
        h.reset(Set);
        let samples = [5, 100, 100, 2_500, 70_000, 42];
        record_all(&mut h, &samples);
        assert_eq!(h.count(), 6);
        h.merge();

        let s = hub.summary(Set).unwrap();
        assert_eq!(s.count, 6);
        assert_eq!(s.volume, 60);
        assert_eq!(s.min, 5);
        assert_eq!(s.max, 70_000);
        assert_eq!(s.buckets.iter().map(|b| b.count).sum::<u64>(), 6);
        assert!(s.buckets.iter().all(|b| b.lo <= b.hi));
        assert_eq!(s.avg, samples.iter().sum::<u64>() / 6);
        assert!(hub.summary(Get).is_none());
    }

    #[test]
    fn avg_and_rms() {
        let hub = quiet_hub();
        let mut h = Histogram::new(&hub);
        h.reset(Set);
        record_all(&mut h, &[100, 200, 300]);
        h.merge();
        let s = hub.summary(Set).unwrap();
        assert_eq!(s.avg, 200);
        assert_eq!(s.rms, 216);
        assert_eq!(s.p50, 200);
    }

    #[test]
    fn merged_deltas_equal_a_single_histogram() {
        let a_samples = [10u64, 20, 3_000, 45_000_000];
        let b_samples = [7u64, 9, 13, 1_000_000_000];

        let split = quiet_hub();
        let mut a = Histogram::new(&split);
        let mut b = Histogram::new(&split);
        a.reset(Set);
        b.reset(Set);
        record_all(&mut a, &a_samples[..2]);
        a.merge();
        record_all(&mut a, &a_samples[2..]);
        record_all(&mut b, &b_samples);
        a.merge();
        b.merge();
        // nothing is folded twice
        a.merge();

        let single = quiet_hub();
        let mut c = Histogram::new(&single);
        c.reset(Set);
        record_all(&mut c, &a_samples);
        record_all(&mut c, &b_samples);
        c.merge();

        let (s1, s2) = (split.summary(Set).unwrap(), single.summary(Set).unwrap());
        assert_eq!(s1.count, 8);
        assert_eq!(s1.count, s2.count);
        assert_eq!(s1.volume, s2.volume);
        assert_eq!(s1.min, s2.min);
        assert_eq!(s1.max, s2.max);
        assert_eq!(s1.avg, s2.avg);
        assert_eq!(s1.rms, s2.rms);
        assert_eq!(s1.buckets, s2.buckets);
        assert_eq!(s1.p99, s2.p99);
    }

    #[test]
    fn disabled_kinds_are_dropped() {
        let hub = quiet_hub();
        let mut h = Histogram::new(&hub);
        h.reset(Crud);
        record_all(&mut h, &[1, 2, 3]);
        h.merge();
        assert!(hub.summary(Crud).is_none());
    }

    #[test]
    fn checkpoint_waits_for_every_worker() {
        let hub = Arc::new(HistogramHub::new(Duration::from_secs(1)));
        hub.enable(Get);
        let a = Histogram::new(&hub);
        let b = Histogram::new(&hub);
        assert_eq!(hub.active(), 2);

        assert_eq!(hub.checkpoint(Some(Instant::now())), Checkpoint::NotYet);
        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(hub.checkpoint(Some(later)), Checkpoint::Pending);
        assert_eq!(hub.epoch(), 0);
        assert_eq!(hub.checkpoint(Some(later)), Checkpoint::Emitted);
        assert_eq!(hub.epoch(), 1);
        // the new epoch starts at `later`
        assert_eq!(hub.checkpoint(Some(later)), Checkpoint::NotYet);

        drop(a);
        drop(b);
        assert_eq!(hub.active(), 0);
        hub.finish();
        assert_eq!(hub.epoch(), 2);
    }

    #[test]
    fn hot_path_counts_each_worker_once_per_epoch() {
        let hub = Arc::new(HistogramHub::new(ns(1)));
        hub.enable(Set);
        let mut a = Histogram::new(&hub);
        let _b = Histogram::new(&hub);
        a.reset(Set);
        let t0 = Instant::now();
        a.record_at(t0, t0 + Duration::from_secs(1), 1);
        assert_eq!(a.merge_evo, 1);
        assert_eq!(hub.epoch(), 0);
        // already counted, keeps accumulating locally
        a.record_at(t0, t0 + Duration::from_secs(2), 1);
        assert_eq!(a.count(), 2);
        assert_eq!(hub.summary(Set).unwrap().count, 1);
        a.merge();
        assert_eq!(hub.summary(Set).unwrap().count, 2);
        assert_eq!(hub.epoch(), 0);
    }

    #[test]
    fn departure_of_a_counted_worker_is_uncounted() {
        let hub = Arc::new(HistogramHub::new(ns(1)));
        hub.enable(Set);
        let mut a = Histogram::new(&hub);
        let b = Histogram::new(&hub);
        let mut c = Histogram::new(&hub);
        a.reset(Set);
        c.reset(Set);
        let t0 = Instant::now();
        a.record_at(t0, t0 + Duration::from_secs(1), 1);
        assert_eq!(hub.epoch(), 0);

        drop(b);
        drop(a);
        assert_eq!(hub.active(), 1);
        assert_eq!(hub.epoch(), 0);

        c.record_at(t0, t0 + Duration::from_secs(1), 1);
        assert_eq!(hub.epoch(), 1);
    }

    #[test]
    fn departure_can_complete_an_epoch() {
        let hub = Arc::new(HistogramHub::new(ns(1)));
        hub.enable(Set);
        let mut a = Histogram::new(&hub);
        let b = Histogram::new(&hub);
        a.reset(Set);
        let t0 = Instant::now();
        a.record_at(t0, t0 + Duration::from_secs(1), 1);
        assert_eq!(hub.epoch(), 0);
        drop(b);
        assert_eq!(hub.epoch(), 1);
        drop(a);
        assert_eq!(hub.active(), 0);
    }

    #[test]
    fn timeline_and_report_csv() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = format!("{}/", dir.path().display());
        let csv = CsvOutput::new(&prefix, "null", SyncMode::Lazy);
        assert_eq!(
            csv.path("timeline"),
            dir.path().join("null_lazy_timeline.csv")
        );

        let hub = quiet_hub();
        hub.enable(Get);
        hub.set_timeline(Box::new(csv.create("timeline").unwrap()));
        let mut h = Histogram::new(&hub);
        h.reset(Get);
        record_all(&mut h, &[1_000, 2_000]);
        h.merge();
        drop(h);
        hub.finish();

        let summaries = hub.print_report(Some(&csv)).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].kind, Get);

        let timeline = std::fs::read_to_string(csv.path("timeline")).unwrap();
        let mut lines = timeline.lines();
        assert_eq!(
            lines.next().unwrap(),
            "\ttime,\tset_rps,\tset_min,\tset_avg,\tset_rms,\tset_max,\tget_rps,\tget_min,\tget_avg,\tget_rms,\tget_max"
        );
        assert_eq!(lines.count(), 1);

        let report = std::fs::read_to_string(csv.path("get")).unwrap();
        assert!(report.starts_with("ltn_open,"));
        assert!(report.contains("ltn_min,"));
        assert!(!csv.path("set").exists());
    }

    #[test]
    fn scaled_units() {
        assert_eq!(scaled(1500.0, "bps").trim(), "1.500Kbps");
        assert_eq!(scaled(42.0, "").trim(), "42.000");
        assert_eq!(latency(2_500_000).trim(), "2.500ms");
        assert_eq!(latency(780).trim(), "780.000ns");
    }
}

// }}} tests
