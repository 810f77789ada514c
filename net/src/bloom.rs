//! BIP37 Bloom filter construction: sizing, insertion, and the
//! Kirsch-Mitzenmacher double-hashing scheme used to derive the N hash
//! functions from a single MurmurHash3 implementation.

use std::f64::consts::LN_2;

/// Seed constant from BIP37: `nHashFuncs * i + nTweak` feeds MurmurHash3,
/// where the 0xFBA4C795 multiplier de-correlates successive hash rounds.
const MURMUR_SEED_MULTIPLIER: u32 = 0xFBA4_C795;

const MAX_BLOOM_FILTER_SIZE_BYTES: usize = 36_000;
const MAX_HASH_FUNCS: u32 = 50;

/// A BIP37 Bloom filter. Construct with [`BloomFilter::new`], [`insert`]
/// the watched items, then read `filter_bytes`/`n_hash_funcs`/`n_tweak`
/// to build a `filterload` payload.
///
/// [`insert`]: BloomFilter::insert
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    n_hash_funcs: u32,
    n_tweak: u32,
}

impl BloomFilter {
    /// Sizes the filter for `elements` items at false-positive rate `fp_rate`,
    /// following the formulas from BIP37:
    ///
    /// ```text
    /// size (bits)  = -1 / ln(2)^2 * elements * ln(fp_rate)
    /// n_hash_funcs = size / elements * ln(2)
    /// ```
    pub fn new(elements: u32, fp_rate: f64, n_tweak: u32) -> Self {
        let elements = elements as f64;

        let size_bits = (-1.0 / LN_2.powi(2) * elements * fp_rate.ln()).max(8.0);
        let size_bytes = ((size_bits / 8.0).ceil() as usize).min(MAX_BLOOM_FILTER_SIZE_BYTES);

        let n_hash_funcs = ((size_bytes * 8) as f64 / elements * LN_2).max(1.0) as u32;
        let n_hash_funcs = n_hash_funcs.min(MAX_HASH_FUNCS);

        BloomFilter { bits: vec![0u8; size_bytes], n_hash_funcs, n_tweak }
    }

    pub fn insert(&mut self, data: &[u8]) {
        for i in 0..self.n_hash_funcs {
            let idx = self.hash_index(i, data);
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.n_hash_funcs).all(|i| {
            let idx = self.hash_index(i, data);
            self.bits[idx / 8] & (1 << (idx % 8)) != 0
        })
    }

    fn hash_index(&self, round: u32, data: &[u8]) -> usize {
        let seed = round.wrapping_mul(MURMUR_SEED_MULTIPLIER).wrapping_add(self.n_tweak);
        (murmur3_32(data, seed) as usize) % (self.bits.len() * 8)
    }

    pub fn filter_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn n_hash_funcs(&self) -> u32 {
        self.n_hash_funcs
    }

    pub fn n_tweak(&self) -> u32 {
        self.n_tweak
    }
}

/// MurmurHash3 (x86, 32-bit variant), as used by BIP37.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let mut k1 = u32::from_le_bytes(chunk.try_into().unwrap());
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let mut k1 = 0u32;
    for (i, &byte) in tail.iter().enumerate().rev() {
        k1 ^= (byte as u32) << (8 * i);
        if i == 0 {
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}
