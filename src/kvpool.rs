//! Pre-generated key/value pairs for batch workloads.
//!
//! Filling the pool happens outside of the timed region, so a batch transaction measures only
//! the engine calls.

use crate::kvgen::KeyValueGenerator;
use crate::KeyValue;

pub struct KvPool {
    key_size: usize,
    value_size: usize,
    len: usize,
    cursor: usize,
    buf: Box<[u8]>,
}

impl KvPool {
    /// Creates a pool of `size` pairs shaped like `gen`'s output and fills it.
    pub fn new(gen: &mut KeyValueGenerator, size: usize) -> Self {
        let (key_size, value_size) = (gen.key_size(), gen.value_size());
        let buf = vec![0u8; size * (key_size + value_size)].into_boxed_slice();
        let mut pool = Self {
            key_size,
            value_size,
            len: size,
            cursor: 0,
            buf,
        };
        pool.fill(gen);
        pool
    }

    /// Regenerates every slot from `gen`, advancing it by the pool size, and rewinds.
    pub fn fill(&mut self, gen: &mut KeyValueGenerator) {
        debug_assert_eq!(gen.key_size(), self.key_size);
        debug_assert_eq!(gen.value_size(), self.value_size);
        let stride = self.key_size + self.value_size;
        if stride > 0 {
            for slot in self.buf.chunks_exact_mut(stride) {
                let (key, value) = slot.split_at_mut(self.key_size);
                gen.generate_into(key, value);
            }
        }
        self.cursor = 0;
    }

    /// The next pair in generation order, or `None` once the pool is drained.
    pub fn pull(&mut self) -> Option<KeyValue<'_>> {
        if self.cursor >= self.len {
            return None;
        }
        let stride = self.key_size + self.value_size;
        let slot = &self.buf[self.cursor * stride..(self.cursor + 1) * stride];
        self.cursor += 1;
        let (key, value) = slot.split_at(self.key_size);
        Some(KeyValue::new(key, value))
    }

    #[cfg(test)]
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pairs left to pull.
    #[cfg(test)]
    fn remaining(&self) -> usize {
        self.len - self.cursor
    }
}
