//! # Bloom — filter policies for table point lookups
//!
//! A filter policy condenses a set of keys into a compact byte string that
//! can later answer "might this key be in the set?". A *false positive*
//! (answering yes for an absent key) only costs a wasted block read; a
//! *false negative* would lose data, so policies must never produce one.
//!
//! ## Usage in ShaleKV
//!
//! The table builder feeds each data block's keys to a policy and stores the
//! resulting filters in the table's filter block. Point lookups consult the
//! filter for the target block first -- if it says "not present", the block
//! read is skipped entirely.
//!
//! Filters produced by [`FilterPolicy::create_filter`] are framed externally
//! (the filter block records where each one starts and ends), so the
//! serialized form carries no length header of its own.
//!
//! ## Example
//!
//! ```rust
//! use bloom::{BloomFilterPolicy, FilterPolicy};
//!
//! let policy = BloomFilterPolicy::new(10);
//! let mut filter = Vec::new();
//! policy.create_filter(&[b"hello", b"world"], &mut filter);
//! assert!(policy.key_may_match(b"hello", &filter));
//! assert!(!policy.key_may_match(b"absent", &filter));
//! ```

/// Condenses key sets into filters and answers membership queries on them.
///
/// Implementations must be pure functions of their input: a filter created
/// by one process must be readable by another, and `key_may_match` must
/// return `true` for every key that was in the `create_filter` input.
pub trait FilterPolicy: Send + Sync {
    /// Identifies the policy. The name is embedded in table files, so a
    /// policy whose filter layout changes incompatibly must also change
    /// its name.
    fn name(&self) -> &'static str;

    /// Appends a filter summarizing `keys` to `dst`. The keys may contain
    /// duplicates. Existing bytes in `dst` must be left untouched.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Returns `true` if `key` might have been in the set `filter` was
    /// built from, `false` only if it definitely was not.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// A Bloom filter policy with a fixed bit budget per key.
///
/// Each filter is a bit array followed by one byte recording the number of
/// probes, so readers stay compatible if the probe count changes. Probes
/// use double hashing: two independent FNV-1a hashes `h1`, `h2` and bit
/// positions `(h1 + i * h2) mod bits`.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    /// Number of probes per key; derived from `bits_per_key` to minimize
    /// the false positive rate and clamped to keep probing cheap.
    k: usize,
}

impl BloomFilterPolicy {
    /// Creates a policy spending `bits_per_key` filter bits per key.
    /// Ten bits per key yields roughly a 1% false positive rate.
    pub fn new(bits_per_key: usize) -> Self {
        // Optimal probe count: k = bits_per_key * ln 2.
        let k = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as usize;
        let k = k.clamp(1, 30);
        Self { bits_per_key, k }
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "shalekv.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // Round the bit count up to a whole number of bytes, with a floor
        // that keeps tiny key sets from producing a uselessly dense array.
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = bits.div_ceil(8);
        let bits = (bytes * 8) as u64;

        let base = dst.len();
        dst.resize(base + bytes, 0);
        dst.push(self.k as u8);

        let array = &mut dst[base..base + bytes];
        for key in keys {
            let (h1, h2) = hash_pair(key);
            for i in 0..self.k {
                set_bit(array, probe(h1, h2, i as u64, bits));
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bits = ((filter.len() - 1) * 8) as u64;
        let k = filter[filter.len() - 1];
        if k > 30 {
            // Reserved for a future encoding; treat as a match rather than
            // misread the array.
            return true;
        }
        let array = &filter[..filter.len() - 1];

        let (h1, h2) = hash_pair(key);
        for i in 0..k {
            if !get_bit(array, probe(h1, h2, u64::from(i), bits)) {
                return false;
            }
        }
        true
    }
}

/// Two independent 64-bit hashes from FNV-1a with different starting bases.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h1 = fnv1a_64(key, 0xcbf2_9ce4_8422_2325);
    let h2 = fnv1a_64(key, 0x517c_c1b7_2722_0a95);
    (h1, h2)
}

fn probe(h1: u64, h2: u64, i: u64, bits: u64) -> u64 {
    h1.wrapping_add(i.wrapping_mul(h2)) % bits
}

fn set_bit(array: &mut [u8], idx: u64) {
    array[(idx / 8) as usize] |= 1 << (idx % 8);
}

fn get_bit(array: &[u8], idx: u64) -> bool {
    (array[(idx / 8) as usize] >> (idx % 8)) & 1 == 1
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
