//! Deterministic, collision-free key/value generation.
//!
//! A key is a pure function of a coordinate `point = key_space * period + serial` and the
//! seed. The coordinate goes through a chain of bijections on a `bits`-wide integer (offset,
//! s-box on the low byte, two multiply/xor-shift rounds), so two coordinates below
//! `2^bits` never produce the same mixed value. The first bytes of a key spell out the whole
//! mixed value; the rest of the key and the value are filled from a remix stream.
//!
//! The shape of the key space is fixed once per run with [`KeySpaceShape::setup`]; each
//! worker then creates its own [`KeyValueGenerator`] over a partition of it, without any
//! coordination with the other workers.

use crate::error::{Error, Result};
use crate::KeyValue;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

/// Golden ratio fraction, used as the additive offset of the mixer and the remix stream.
const FRACTAL: u64 = 0x9e37_79b9_7f4a_7c15;

/// Odd multipliers of the two mixing rounds, truncated to the chosen width.
const MAGIC: [u64; 2] = [0xbf58_476d_1ce4_e5b9, 0x94d0_49bb_1331_11eb];

/// Supported widths of the mixed key value.
const WIDTHS: [u32; 7] = [16, 24, 32, 40, 48, 56, 64];

/// 64 printable symbols, in ASCII order.
const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

fn remix(mut x: u64) -> u64 {
    x = x.wrapping_add(FRACTAL);
    x = (x ^ (x >> 30)).wrapping_mul(MAGIC[0]);
    x = (x ^ (x >> 27)).wrapping_mul(MAGIC[1]);
    x ^ (x >> 31)
}

/// The run-wide shape of the synthetic key domain.
#[derive(Debug)]
pub struct KeySpaceShape {
    printable: bool,
    key_size: usize,
    nspaces: u64,
    nsectors: u64,
    period: u64,
    bits: u32,
    mask: u64,
    multiplier: [u64; 2],
    shift: [u32; 2],
    sbox: [u8; 256],
}

impl KeySpaceShape {
    /// Fit the mixer to `nspaces` key spaces of `period` keys each.
    ///
    /// `nsectors` is the number of same-category workers that will split one key space; each
    /// sector must hold at least one key.
    pub fn setup(
        printable: bool,
        key_size: usize,
        nspaces: u64,
        nsectors: u64,
        period: u64,
        seed: u64,
    ) -> Result<Arc<Self>> {
        if period == 0 {
            return Err(Error::config("number of keys must be positive"));
        }
        if nspaces == 0 {
            return Err(Error::config("number of key spaces must be positive"));
        }
        if nsectors == 0 || nsectors > period {
            return Err(Error::config(format!(
                "cannot split {} keys into {} sectors",
                period, nsectors
            )));
        }
        let total = period as u128 * nspaces as u128;
        // the smallest width whose range covers every coordinate
        let bits = WIDTHS
            .into_iter()
            .find(|&w| total <= 1u128 << w)
            .ok_or_else(|| {
                Error::config(format!(
                    "key space of {} x {} keys exceeds 64 bits",
                    nspaces, period
                ))
            })?;

        let bits_per_symbol = if printable { 6 } else { 8 };
        let need = bits.div_ceil(bits_per_symbol) as usize;
        if key_size < need {
            return Err(Error::config(format!(
                "key size {} is too short for {} distinct {} keys, at least {} is required",
                key_size,
                total,
                if printable { "printable" } else { "binary" },
                need
            )));
        }

        let mask = if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        let multiplier = [(MAGIC[0] & mask) | 1, (MAGIC[1] & mask) | 1];
        let shift = [bits / 2, bits / 2 - 3];

        let mut sbox: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut rng = StdRng::seed_from_u64(seed ^ (key_size as u64).wrapping_mul(FRACTAL));
        sbox.shuffle(&mut rng);

        Ok(Arc::new(Self {
            printable,
            key_size,
            nspaces,
            nsectors,
            period,
            bits,
            mask,
            multiplier,
            shift,
            sbox,
        }))
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn nspaces(&self) -> u64 {
        self.nspaces
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Number of keys in one sector.
    pub fn sector_len(&self) -> u64 {
        self.period / self.nsectors
    }

    fn bits_per_symbol(&self) -> u32 {
        if self.printable {
            6
        } else {
            8
        }
    }

    /// Bijection on `[0, 2^bits)`.
    fn mix(&self, point: u64) -> u64 {
        let mask = self.mask;
        let mut x = point.wrapping_add(FRACTAL) & mask;
        x = (x & !0xff) | self.sbox[(x & 0xff) as usize] as u64;
        x = x.wrapping_mul(self.multiplier[0]) & mask;
        x ^= x >> self.shift[0];
        x = x.wrapping_mul(self.multiplier[1]) & mask;
        x ^= x >> self.shift[1];
        x
    }

    fn symbol(&self, v: u64) -> u8 {
        if self.printable {
            ALPHABET[(v & 63) as usize]
        } else {
            v as u8
        }
    }

    fn stream(&self, state: &mut u64, dst: &mut [u8]) {
        let bps = self.bits_per_symbol();
        for chunk in dst.chunks_mut((64 / bps) as usize) {
            *state = remix(*state);
            let mut v = *state;
            for b in chunk.iter_mut() {
                *b = self.symbol(v);
                v >>= bps;
            }
        }
    }

    /// Writes the key of `point` into `dst` and returns the final mixing state.
    fn fill_key(&self, point: u64, dst: &mut [u8]) -> u64 {
        debug_assert!(point <= self.mask);
        let mixed = self.mix(point);
        let bps = self.bits_per_symbol();
        let head = self.bits.div_ceil(bps) as usize;
        let mut v = mixed;
        for b in dst[..head].iter_mut() {
            *b = self.symbol(v);
            v >>= bps;
        }
        let mut state = mixed;
        self.stream(&mut state, &mut dst[head..]);
        state
    }

    fn fill_value(&self, key_state: u64, age: u64, dst: &mut [u8]) {
        let mut state = key_state ^ age.wrapping_mul(FRACTAL);
        self.stream(&mut state, dst);
    }
}

/// A per-worker generator walking one partition of the key domain.
pub struct KeyValueGenerator {
    shape: Arc<KeySpaceShape>,
    base: u64,
    serial: u64,
    age: u64,
    value_size: usize,
    buf: Box<[u8]>,
}

impl KeyValueGenerator {
    /// Creates a generator over key space `key_space`, starting at `key_sequence`.
    ///
    /// `age` salts the values: the same key yields a different value at a different age.
    pub fn new(
        shape: &Arc<KeySpaceShape>,
        key_space: u64,
        key_sequence: u64,
        value_size: usize,
        age: u64,
    ) -> Result<Self> {
        if key_space >= shape.nspaces {
            return Err(Error::config(format!(
                "key space {} is out of the {} configured",
                key_space, shape.nspaces
            )));
        }
        let buf = vec![0u8; shape.key_size + value_size].into_boxed_slice();
        Ok(Self {
            shape: shape.clone(),
            base: key_space * shape.period,
            serial: key_sequence % shape.period,
            age,
            value_size,
            buf,
        })
    }

    pub fn key_size(&self) -> usize {
        self.shape.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// The serial the next call to [`get`](Self::get) will use.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Restarts the walk at `key_sequence`.
    pub fn rewind(&mut self, key_sequence: u64) {
        self.serial = key_sequence % self.shape.period;
    }

    fn advance(&mut self) -> u64 {
        let point = self.base + self.serial;
        self.serial = (self.serial + 1) % self.shape.period;
        point
    }

    /// Generates the next pair. The value is empty when `key_only` is set.
    pub fn get(&mut self, key_only: bool) -> KeyValue<'_> {
        let point = self.advance();
        let ksize = self.shape.key_size;
        let (key, value) = self.buf.split_at_mut(ksize);
        let state = self.shape.fill_key(point, key);
        if key_only {
            return KeyValue::new(key, &[]);
        }
        self.shape.fill_value(state, self.age, value);
        KeyValue::new(key, value)
    }

    /// Generates the next pair straight into `key` and `value`, used by the pool.
    pub(crate) fn generate_into(&mut self, key: &mut [u8], value: &mut [u8]) {
        debug_assert_eq!(key.len(), self.shape.key_size);
        debug_assert_eq!(value.len(), self.value_size);
        let point = self.advance();
        let state = self.shape.fill_key(point, key);
        self.shape.fill_value(state, self.age, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;

    fn collect_keys(gen: &mut KeyValueGenerator, n: u64) -> HashSet<Box<[u8]>> {
        let mut keys = HashSet::new();
        for _ in 0..n {
            keys.insert(gen.get(true).key.into());
        }
        keys
    }

    #[test]
    fn width_is_the_smallest_that_fits() {
        let s = KeySpaceShape::setup(true, 16, 1, 1, 1 << 16, 0).unwrap();
        assert_eq!(s.bits(), 16);
        let s = KeySpaceShape::setup(true, 16, 1, 1, (1 << 16) + 1, 0).unwrap();
        assert_eq!(s.bits(), 24);
        let s = KeySpaceShape::setup(true, 16, 2, 1, 1 << 31, 0).unwrap();
        assert_eq!(s.bits(), 32);
        let s = KeySpaceShape::setup(false, 8, 2, 1, 1 << 62, 0).unwrap();
        assert_eq!(s.bits(), 64);
    }

    #[test]
    fn setup_rejects_bad_shapes() {
        // 16 bits need 3 printable symbols or 2 bytes
        assert!(matches!(
            KeySpaceShape::setup(true, 2, 1, 1, 1000, 0),
            Err(Error::Config(_))
        ));
        assert!(KeySpaceShape::setup(false, 2, 1, 1, 1000, 0).is_ok());
        assert!(KeySpaceShape::setup(false, 1, 1, 1, 1000, 0).is_err());
        // 64 bits need 11 printable symbols
        assert!(KeySpaceShape::setup(true, 10, 4, 1, 1 << 62, 0).is_err());
        assert!(KeySpaceShape::setup(true, 11, 4, 1, 1 << 62, 0).is_ok());
        // exactly 2^64 coordinates still fit
        let s = KeySpaceShape::setup(false, 8, 4, 1, 1 << 62, 0).unwrap();
        assert_eq!(s.bits(), 64);
        assert!(KeySpaceShape::setup(false, 8, 2, 1, u64::MAX, 0).is_err());
        // overflow of the coordinate space
        assert!(KeySpaceShape::setup(true, 16, 3, 1, u64::MAX / 2, 0).is_err());
        assert!(KeySpaceShape::setup(true, 16, 1, 1, 0, 0).is_err());
        assert!(KeySpaceShape::setup(true, 16, 1, 11, 10, 0).is_err());
    }

    #[test]
    fn magic_multipliers_are_odd() {
        for period in [1u64 << 10, 1 << 20, 1 << 30, 1 << 38, 1 << 46, 1 << 54, 1 << 62] {
            let s = KeySpaceShape::setup(false, 8, 1, 1, period, 7).unwrap();
            assert!(s.multiplier.iter().all(|m| m & 1 == 1));
            assert!(s.shift.iter().all(|&sh| sh > 0 && sh < s.bits()));
        }
    }

    #[test]
    fn mixer_is_a_permutation_at_16_bits() {
        let s = KeySpaceShape::setup(false, 2, 1, 1, 1 << 16, 42).unwrap();
        let mut seen = vec![false; 1 << 16];
        for p in 0..(1u64 << 16) {
            let m = s.mix(p) as usize;
            assert!(!seen[m], "collision at point {}", p);
            seen[m] = true;
        }
    }

    #[test]
    fn no_collisions_within_a_period() {
        for (printable, ksize, period) in [
            (true, 3, 1000u64),
            (true, 16, 50_000),
            (false, 2, 65_536),
            (false, 4, 100_000),
            (true, 8, 70_000),
        ] {
            let shape = KeySpaceShape::setup(printable, ksize, 1, 1, period, 1).unwrap();
            let mut gen = KeyValueGenerator::new(&shape, 0, 0, 0, 0).unwrap();
            let keys = collect_keys(&mut gen, period);
            assert_eq!(keys.len() as u64, period, "{} {} {}", printable, ksize, period);
        }
    }

    #[test]
    fn key_spaces_are_disjoint() {
        let shape = KeySpaceShape::setup(true, 16, 2, 1, 10_000, 5).unwrap();
        let mut a = KeyValueGenerator::new(&shape, 0, 0, 0, 0).unwrap();
        let mut b = KeyValueGenerator::new(&shape, 1, 0, 0, 0).unwrap();
        let ka = collect_keys(&mut a, 10_000);
        let kb = collect_keys(&mut b, 10_000);
        assert!(ka.is_disjoint(&kb));
        assert!(KeyValueGenerator::new(&shape, 2, 0, 0, 0).is_err());
    }

    #[test]
    fn output_is_deterministic() {
        let s1 = KeySpaceShape::setup(true, 16, 2, 1, 1000, 99).unwrap();
        let s2 = KeySpaceShape::setup(true, 16, 2, 1, 1000, 99).unwrap();
        let mut g1 = KeyValueGenerator::new(&s1, 1, 17, 32, 0).unwrap();
        let mut g2 = KeyValueGenerator::new(&s2, 1, 17, 32, 0).unwrap();
        for _ in 0..100 {
            let a = g1.get(false);
            let (k, v) = (a.key.to_vec(), a.value.to_vec());
            let b = g2.get(false);
            assert_eq!(k, b.key);
            assert_eq!(v, b.value);
            assert_eq!(v.len(), 32);
        }

        let s3 = KeySpaceShape::setup(true, 16, 2, 1, 1000, 100).unwrap();
        let mut g3 = KeyValueGenerator::new(&s3, 1, 17, 32, 0).unwrap();
        let mut g1 = KeyValueGenerator::new(&s1, 1, 17, 32, 0).unwrap();
        let differs = (0..100).any(|_| g1.get(true).key.to_vec() != g3.get(true).key);
        assert!(differs);
    }

    #[test]
    fn serial_wraps_around_the_period() {
        let shape = KeySpaceShape::setup(true, 16, 1, 1, 10, 0).unwrap();
        let mut gen = KeyValueGenerator::new(&shape, 0, 8, 0, 0).unwrap();
        let first = gen.get(true).key.to_vec();
        assert_eq!(gen.serial(), 9);
        gen.get(true);
        assert_eq!(gen.serial(), 0);
        for _ in 0..8 {
            gen.get(true);
        }
        assert_eq!(gen.get(true).key, &first[..]);
    }

    #[test]
    fn rewind_restarts_the_walk() {
        let shape = KeySpaceShape::setup(true, 16, 2, 1, 100, 0).unwrap();
        let mut gen = KeyValueGenerator::new(&shape, 1, 40, 8, 0).unwrap();
        let first: Vec<Vec<u8>> = (0..30).map(|_| gen.get(false).key.to_vec()).collect();
        assert_eq!(gen.serial(), 70);
        gen.rewind(40);
        assert_eq!(gen.serial(), 40);
        let again: Vec<Vec<u8>> = (0..30).map(|_| gen.get(false).key.to_vec()).collect();
        assert_eq!(first, again);
        gen.rewind(140);
        assert_eq!(gen.serial(), 40);
    }

    #[test]
    fn age_changes_values_only() {
        let shape = KeySpaceShape::setup(false, 8, 1, 1, 100, 3).unwrap();
        let mut young = KeyValueGenerator::new(&shape, 0, 0, 24, 0).unwrap();
        let mut old = KeyValueGenerator::new(&shape, 0, 0, 24, 1).unwrap();
        let y = young.get(false);
        let (yk, yv) = (y.key.to_vec(), y.value.to_vec());
        let o = old.get(false);
        assert_eq!(yk, o.key);
        assert_ne!(yv, o.value);
    }

    #[test]
    fn printable_keys_use_the_alphabet() {
        let shape = KeySpaceShape::setup(true, 40, 1, 1, 1000, 11).unwrap();
        let mut gen = KeyValueGenerator::new(&shape, 0, 0, 100, 0).unwrap();
        for _ in 0..100 {
            let kv = gen.get(false);
            assert_eq!(kv.key.len(), 40);
            assert_eq!(kv.value.len(), 100);
            assert!(kv.key.iter().chain(kv.value).all(|b| ALPHABET.contains(b)));
        }
    }

    #[test]
    fn generate_into_matches_get() {
        let shape = KeySpaceShape::setup(true, 16, 1, 1, 1000, 8).unwrap();
        let mut g1 = KeyValueGenerator::new(&shape, 0, 3, 10, 0).unwrap();
        let mut g2 = KeyValueGenerator::new(&shape, 0, 3, 10, 0).unwrap();
        let (mut k, mut v) = ([0u8; 16], [0u8; 10]);
        g1.generate_into(&mut k, &mut v);
        let kv = g2.get(false);
        assert_eq!(kv.key, &k[..]);
        assert_eq!(kv.value, &v[..]);
    }
}
