//! # Cache — sharded, pinning LRU cache
//!
//! A bounded, thread-safe cache of reference-counted entries, used by the
//! ShaleKV read path to keep open tables and decoded blocks resident.
//!
//! The keyspace is split across 16 independent shards selected by the top
//! bits of a 32-bit key hash. Each shard owns its own mutex, hash table, and
//! recency list, so concurrent lookups against different shards never
//! contend. Within a shard the low hash bits pick the bucket, so shard
//! selection and bucket selection draw on disjoint bits.
//!
//! ## Pinning
//!
//! [`Cache::insert`] and [`Cache::lookup`] return a [`Handle`] that pins the
//! entry: a pinned entry is never evicted and its memory is never reclaimed,
//! even if it is erased or displaced by a newer value for the same key. The
//! pin is released when the handle drops. Entries become eligible for
//! eviction only once the cache holds their sole remaining reference.
//!
//! Pinned entries stay on the recency list; eviction walks past them, so a
//! heavily pinned shard may transiently exceed its capacity until handles
//! are released.
//!
//! ## Example
//!
//! ```rust
//! use cache::Cache;
//!
//! let cache: Cache<String> = Cache::new(64);
//! let h = cache.insert(b"table/7", "open table".to_string(), 1, None);
//! assert_eq!(h.value(), "open table");
//! drop(h); // unpin; the entry stays resident until evicted
//! assert!(cache.lookup(b"table/7").is_some());
//! ```

mod shard;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::shard::Shard;
pub use crate::shard::Deleter;

/// log2 of the default shard count. Four bits keep per-shard mutex
/// contention low without fragmenting small capacities too far.
const SHARD_BITS: u32 = 4;

/// FNV-1a over the key bytes. Stable across processes, cheap, and
/// well-mixed in both the high bits (shard selection) and the low bits
/// (bucket selection).
fn hash32(data: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for &b in data {
        h ^= u32::from(b);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Locks a shard, recovering from poisoning. Deleters are the only foreign
/// code run under the lock; a panic there leaves the index-based shard
/// state structurally intact.
fn lock<V>(shard: &Mutex<Shard<V>>) -> MutexGuard<'_, Shard<V>> {
    match shard.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A pinned reference to a cache entry.
///
/// Holding a handle keeps the entry alive: the deleter will not run and the
/// value will not be reclaimed until every handle for the entry has been
/// dropped and the cache itself has let go of it. Dropping the handle
/// releases the pin.
pub struct Handle<V> {
    shard: Arc<Mutex<Shard<V>>>,
    index: u32,
    value: Arc<V>,
}

impl<V> Handle<V> {
    /// The cached value. Does not take the shard lock.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// A shared owner of the cached value, for callers that need the value
    /// to outlive the pin (e.g. an iterator over a cached block).
    pub fn value_arc(&self) -> Arc<V> {
        Arc::clone(&self.value)
    }
}

impl<V> Drop for Handle<V> {
    fn drop(&mut self) {
        lock(&self.shard).release(self.index);
    }
}

/// Sharded LRU cache with pinning. See the crate docs for semantics.
///
/// `V` is the cached value type; the charge of each entry is supplied by
/// the caller at insert time, so a cache can be bounded by bytes, by entry
/// count, or by any other additive measure.
pub struct Cache<V> {
    shards: Vec<Arc<Mutex<Shard<V>>>>,
    shard_bits: u32,
    last_id: AtomicU64,
}

impl<V> Cache<V> {
    /// Creates a cache with the default shard count and a total capacity of
    /// `capacity` charge units, split evenly (rounding up) across shards.
    pub fn new(capacity: usize) -> Self {
        Self::with_shard_bits(capacity, SHARD_BITS)
    }

    /// Creates a cache with `1 << shard_bits` shards. A single shard
    /// (`shard_bits == 0`) gives fully deterministic eviction order, which
    /// is occasionally useful for tests and small fixed working sets.
    pub fn with_shard_bits(capacity: usize, shard_bits: u32) -> Self {
        assert!(shard_bits < 32, "shard_bits must leave hash bits for bucketing");
        let num_shards = 1usize << shard_bits;
        let per_shard = capacity.div_ceil(num_shards);
        let shards = (0..num_shards)
            .map(|_| Arc::new(Mutex::new(Shard::new(per_shard))))
            .collect();
        Self {
            shards,
            shard_bits,
            last_id: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, hash: u32) -> &Arc<Mutex<Shard<V>>> {
        let index = if self.shard_bits == 0 {
            0
        } else {
            (hash >> (32 - self.shard_bits)) as usize
        };
        &self.shards[index]
    }

    /// Inserts a value under `key`, charging `charge` units against the
    /// owning shard's capacity, and returns a pinned handle to it.
    ///
    /// If an entry with the same key already exists it is displaced
    /// immediately: new lookups see the new value, while outstanding
    /// handles keep the old value alive until they drop. The optional
    /// `deleter` runs exactly once, under the shard lock, just before the
    /// entry's memory is reclaimed; it must not call back into the cache.
    pub fn insert(
        &self,
        key: &[u8],
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> Handle<V> {
        let hash = hash32(key);
        let shard = Arc::clone(self.shard_for(hash));
        let value = Arc::new(value);
        let index = lock(&shard).insert(key, hash, Arc::clone(&value), charge, deleter);
        Handle { shard, index, value }
    }

    /// Looks up `key`, returning a pinned handle on hit. A hit also marks
    /// the entry most-recently used.
    pub fn lookup(&self, key: &[u8]) -> Option<Handle<V>> {
        let hash = hash32(key);
        let shard = Arc::clone(self.shard_for(hash));
        let found = lock(&shard).lookup(key, hash);
        found.map(|(index, value)| Handle { shard, index, value })
    }

    /// Removes `key` from the cache. Outstanding handles still pin the
    /// entry; its deleter runs after the last one drops.
    pub fn erase(&self, key: &[u8]) {
        let hash = hash32(key);
        lock(self.shard_for(hash)).erase(key, hash);
    }

    /// Drops every entry that is not currently pinned.
    pub fn prune(&self) {
        for shard in &self.shards {
            lock(shard).prune();
        }
    }

    /// Sum of the charges of all live entries, including entries that have
    /// been erased or displaced but are still pinned by a handle.
    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).total_charge()).sum()
    }

    /// Returns a new numeric id. Ids are unique for the lifetime of the
    /// cache; clients that share the cache use them to partition key
    /// spaces (the table layer prefixes block-cache keys with one).
    pub fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}
