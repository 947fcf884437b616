use bytemuck::{Pod, Zeroable};

use crate::arena::Scratch;
use crate::errors::{HashCrfError, Result};

/// One coordinate of a sparse gradient.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Entry {
    /// Index into the weight vector.
    pub index: u32,
    /// Value.
    pub value: f32,
}

impl Entry {
    #[inline(always)]
    pub const fn new(index: u32, value: f32) -> Self {
        Self { index, value }
    }
}

/// Sums entries sharing an index.
///
/// The entries are stably sorted by index and merged in place; the merged
/// vector is the returned prefix.
pub fn merge_duplicates(entries: &mut [Entry]) -> &mut [Entry] {
    entries.sort_by_key(|e| e.index);
    let mut len = 0;
    for i in 0..entries.len() {
        let e = entries[i];
        if len != 0 && entries[len - 1].index == e.index {
            entries[len - 1].value += e.value;
        } else {
            entries[len] = e;
            len += 1;
        }
    }
    &mut entries[..len]
}

const NIL: u32 = u32::MAX;

/// Hash map from index to summed value, chained through linked lists that
/// live in a fixed slice of arena words.
pub struct SparseBuilder<'a> {
    heads: &'a mut [u32],
    keys: &'a mut [u32],
    values: &'a mut [f32],
    next: &'a mut [u32],
    len: usize,
}

impl<'a> SparseBuilder<'a> {
    /// Creates an empty builder with `buckets` chains (a power of two).
    ///
    /// # Errors
    ///
    /// `words` must be able to hold the bucket heads.
    pub fn new(words: &'a mut [u32], buckets: usize) -> Result<Self> {
        debug_assert!(buckets.is_power_of_two());
        let mut scratch = Scratch::new(words, "scratch");
        let heads = scratch.filled(buckets, NIL)?;
        let capacity = scratch.remaining() / 3;
        let keys = scratch.take(capacity)?;
        let values = scratch.take(capacity)?;
        let next = scratch.take(capacity)?;
        Ok(Self {
            heads,
            keys,
            values,
            next,
            len: 0,
        })
    }

    #[inline(always)]
    fn bucket(&self, key: u32) -> usize {
        (key.wrapping_mul(0x9e37_79b1) ^ (key >> 16)) as usize & (self.heads.len() - 1)
    }

    /// Adds `value` to the entry of `key`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`HashCrfError::StoreExhausted`] when a new key does not fit.
    pub fn add(&mut self, key: u32, value: f32) -> Result<()> {
        let bucket = self.bucket(key);
        let mut node = self.heads[bucket];
        while node != NIL {
            let i = node as usize;
            if self.keys[i] == key {
                self.values[i] += value;
                return Ok(());
            }
            node = self.next[i];
        }
        if self.len == self.keys.len() {
            return Err(HashCrfError::store_exhausted("scratch"));
        }
        let i = self.len;
        self.keys[i] = key;
        self.values[i] = value;
        self.next[i] = self.heads[bucket];
        self.heads[bucket] = i as u32;
        self.len += 1;
        Ok(())
    }

    /// Returns the number of distinct keys.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no further key can be inserted.
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.len == self.keys.len()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.heads.fill(NIL);
        self.len = 0;
    }

    /// Returns the distinct keys in insertion order.
    #[inline(always)]
    pub fn keys(&self) -> &[u32] {
        &self.keys[..self.len]
    }

    /// Returns the summed values, parallel to [`SparseBuilder::keys`].
    #[cfg(test)]
    #[inline(always)]
    pub fn values(&self) -> &[f32] {
        &self.values[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hashbrown::HashMap;

    use crate::test_utils::hashmap;

    #[test]
    fn test_merge_duplicates() {
        let mut entries = vec![
            Entry::new(5, 1.0),
            Entry::new(2, 0.5),
            Entry::new(5, -0.25),
            Entry::new(0, 2.0),
            Entry::new(2, 0.5),
        ];
        let merged = merge_duplicates(&mut entries);
        assert_eq!(
            &[Entry::new(0, 2.0), Entry::new(2, 1.0), Entry::new(5, 0.75)],
            merged
        );
    }

    #[test]
    fn test_merge_duplicates_empty() {
        let mut entries: Vec<Entry> = vec![];
        assert!(merge_duplicates(&mut entries).is_empty());
    }

    #[test]
    fn test_sparse_builder_sums() {
        let mut words = vec![0; 64];
        let mut builder = SparseBuilder::new(&mut words, 4).unwrap();
        for (k, v) in [(7, 1.0), (3, 2.0), (7, 0.5), (11, -1.0), (3, 1.0)] {
            builder.add(k, v).unwrap();
        }
        assert_eq!(3, builder.len());
        assert_eq!(&[7, 3, 11], builder.keys());
        let got: HashMap<u32, f32> = builder
            .keys()
            .iter()
            .copied()
            .zip(builder.values().iter().copied())
            .collect();
        assert_eq!(hashmap![7 => 1.5, 3 => 3.0, 11 => -1.0], got);
    }

    #[test]
    fn test_sparse_builder_exhaustion() {
        // 4 heads + 2 nodes of 3 words
        let mut words = vec![0; 10];
        let mut builder = SparseBuilder::new(&mut words, 4).unwrap();
        builder.add(1, 1.0).unwrap();
        builder.add(2, 1.0).unwrap();
        builder.add(1, 1.0).unwrap();
        assert_eq!(
            Err(HashCrfError::store_exhausted("scratch")),
            builder.add(3, 1.0)
        );
        assert_eq!(2, builder.len());
        assert!(builder.is_full());

        builder.clear();
        assert!(!builder.is_full());
        builder.add(3, 2.0).unwrap();
        builder.add(3, 1.0).unwrap();
        assert_eq!(&[3], builder.keys());
        assert_eq!(&[3.0], builder.values());
    }
}
