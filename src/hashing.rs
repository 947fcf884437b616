//! Feature hashing with sign correction (Weinberger et al., 2009).

use std::io::Cursor;

use crate::arena::Scratch;
use crate::errors::Result;

/// Seed used when hashing textual feature keys.
pub const KEY_SEED: u32 = 0;

const SIGN_BIT: u32 = 1 << 31;

/// MurmurHash3 (x86, 32-bit) of a byte range.
#[inline(always)]
pub fn murmur3_32(bytes: &[u8], seed: u32) -> u32 {
    // Reading from an in-memory cursor never fails.
    murmur3::murmur3_32(&mut Cursor::new(bytes), seed).unwrap_or_default()
}

/// Hashes a textual feature key through its UTF-16LE encoding.
pub fn hash_key(key: &str) -> u32 {
    let bytes: Vec<u8> = key.encode_utf16().flat_map(u16::to_le_bytes).collect();
    murmur3_32(&bytes, KEY_SEED)
}

/// Hashes a feature index for a hypothesized class.
///
/// Returns the index inside `[0, dimension)` and the sign to multiply the value with.
/// `dimension` must be a power of two not larger than 2^31.
#[inline(always)]
pub fn hash_feature(index: u32, class: u32, dimension: u32) -> (u32, f32) {
    let h = murmur3_32(&index.to_le_bytes(), class);
    let sign = if h & SIGN_BIT == 0 { 1.0 } else { -1.0 };
    (h & (dimension - 1), sign)
}

/// Projects one sparse vector into the hashed space of `class`.
///
/// Hashed indices may repeat; consumers only sum or dot-product them.
pub fn hash(
    values: &[f32],
    indices: &[u32],
    class: u32,
    dimension: u32,
    out_values: &mut [f32],
    out_indices: &mut [u32],
) {
    debug_assert_eq!(values.len(), indices.len());
    for (((&v, &i), ov), oi) in values
        .iter()
        .zip(indices)
        .zip(out_values.iter_mut())
        .zip(out_indices.iter_mut())
    {
        let (hashed, sign) = hash_feature(i, class, dimension);
        *ov = sign * v;
        *oi = hashed;
    }
}

/// Per-position, per-class hashed sparse vectors of one chain.
///
/// The vector of position `t` and class `k` occupies
/// `[starts[t] * labels + k * nz[t], starts[t] * labels + (k + 1) * nz[t])`.
#[derive(Clone, Copy, Debug)]
pub struct HashedSequence<'a> {
    /// Number of classes.
    pub labels: usize,
    /// Nonzero count of each position.
    pub nz: &'a [u32],
    /// Prefix sums of `nz` (one more element than positions).
    pub starts: &'a [u32],
    /// Signed values.
    pub values: &'a [f32],
    /// Hashed indices.
    pub indices: &'a [u32],
}

impl<'a> HashedSequence<'a> {
    /// Returns the chain length.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.nz.len()
    }

    /// Returns the hashed vector of position `t` for class `k`.
    #[inline(always)]
    pub fn block(&self, t: usize, k: usize) -> (&'a [f32], &'a [u32]) {
        let nz = self.nz[t] as usize;
        let start = self.starts[t] as usize * self.labels + k * nz;
        (
            &self.values[start..start + nz],
            &self.indices[start..start + nz],
        )
    }
}

/// Hashes every position of a chain once per class.
///
/// `starts` must hold `nz.len() + 1` elements and the outputs
/// `sum(nz) * labels` elements each.
#[allow(clippy::too_many_arguments)]
pub fn feature_hashing_sequence<'a>(
    nz: &'a [u32],
    values: &[f32],
    keys: &[u32],
    labels: usize,
    dimension: u32,
    starts: &'a mut [u32],
    out_values: &'a mut [f32],
    out_indices: &'a mut [u32],
) -> HashedSequence<'a> {
    let mut total = 0;
    starts[0] = 0;
    for (t, &n) in nz.iter().enumerate() {
        total += n;
        starts[t + 1] = total;
    }
    for (t, &n) in nz.iter().enumerate() {
        let n = n as usize;
        let src = starts[t] as usize;
        for k in 0..labels {
            let dst = src * labels + k * n;
            hash(
                &values[src..src + n],
                &keys[src..src + n],
                k as u32,
                dimension,
                &mut out_values[dst..dst + n],
                &mut out_indices[dst..dst + n],
            );
        }
    }
    HashedSequence {
        labels,
        nz,
        starts,
        values: out_values,
        indices: out_indices,
    }
}

/// Hashes a chain into buffers taken from `scratch`.
///
/// # Errors
///
/// Fails when the scratch space is too small.
pub fn hash_sequence<'a>(
    nz: &'a [u32],
    values: &[f32],
    keys: &[u32],
    labels: usize,
    dimension: u32,
    scratch: &mut Scratch<'a>,
) -> Result<HashedSequence<'a>> {
    let total = keys.len() * labels;
    let starts = scratch.take(nz.len() + 1)?;
    let out_values = scratch.take(total)?;
    let out_indices = scratch.take(total)?;
    Ok(feature_hashing_sequence(
        nz,
        values,
        keys,
        labels,
        dimension,
        starts,
        out_values,
        out_indices,
    ))
}
