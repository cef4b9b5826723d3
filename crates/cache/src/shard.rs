//! A single cache shard: arena-backed entries, a chained hash table, and a
//! doubly linked recency list, all guarded by the owning mutex in `lib.rs`.
//!
//! Entries live in an arena of stable slots and refer to each other by slot
//! index, so list and chain surgery never touches a dangling pointer. An
//! entry's reference count includes one reference held by the shard itself
//! for as long as the entry is resident (in the hash table and on the
//! recency list); every outstanding [`crate::Handle`] holds one more. The
//! entry's memory and its deleter run exactly once, when the count reaches
//! zero.

use std::sync::Arc;

/// Runs when an entry is reclaimed, immediately before its value drops.
/// Invoked under the shard lock, so it must not re-enter the cache.
pub type Deleter<V> = Box<dyn Fn(&[u8], &V) + Send + Sync>;

/// Null slot index for list and chain links.
const NIL: u32 = u32::MAX;

struct Entry<V> {
    key: Box<[u8]>,
    hash: u32,
    value: Arc<V>,
    deleter: Option<Deleter<V>>,
    charge: usize,
    /// One reference for the shard while resident, plus one per handle.
    refs: u32,
    /// True while the entry is in the hash table and on the recency list.
    resident: bool,
    /// Hash chain link.
    next_hash: u32,
    /// Recency list links; head is least recent, tail is most recent.
    prev: u32,
    next: u32,
}

/// Where a chain link is stored: either a bucket head or the `next_hash`
/// field of another entry. Resolving lookup, insert, and remove through
/// this one indirection keeps chain surgery free of head special cases.
#[derive(Clone, Copy)]
enum Link {
    Bucket(usize),
    Chain(u32),
}

pub(crate) struct Shard<V> {
    capacity: usize,
    usage: usize,
    slots: Vec<Option<Entry<V>>>,
    free: Vec<u32>,
    buckets: Vec<u32>,
    elems: usize,
    head: u32,
    tail: u32,
}

impl<V> Shard<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            usage: 0,
            slots: Vec::new(),
            free: Vec::new(),
            buckets: vec![NIL; 4],
            elems: 0,
            head: NIL,
            tail: NIL,
        }
    }

    /// Inserts an entry with two references (the shard's and the returned
    /// handle's), displaces any existing entry with the same key, then
    /// evicts until back under capacity or only pinned entries remain.
    pub fn insert(
        &mut self,
        key: &[u8],
        hash: u32,
        value: Arc<V>,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> u32 {
        let index = self.alloc(Entry {
            key: key.into(),
            hash,
            value,
            deleter,
            charge,
            refs: 2,
            resident: true,
            next_hash: NIL,
            prev: NIL,
            next: NIL,
        });
        self.list_append(index);
        self.usage += charge;

        let old = self.table_insert(index);
        if old != NIL {
            self.list_remove(old);
            self.slot_mut(old).resident = false;
            self.unref(old);
        }

        self.evict();
        index
    }

    /// Returns the slot index and value of `key` if present, bumping its
    /// reference count and moving it to the most-recent end.
    pub fn lookup(&mut self, key: &[u8], hash: u32) -> Option<(u32, Arc<V>)> {
        let index = self.link_target(self.find_link(key, hash));
        if index == NIL {
            return None;
        }
        self.slot_mut(index).refs += 1;
        self.list_remove(index);
        self.list_append(index);
        Some((index, Arc::clone(&self.slot(index).value)))
    }

    /// Drops one handle reference.
    pub fn release(&mut self, index: u32) {
        self.unref(index);
    }

    /// Removes `key` from the table and list. Outstanding handles still
    /// pin the entry.
    pub fn erase(&mut self, key: &[u8], hash: u32) {
        let index = self.link_target(self.find_link(key, hash));
        if index != NIL {
            self.remove_resident(index);
        }
    }

    /// Drops every entry whose sole remaining reference is the shard's.
    pub fn prune(&mut self) {
        let mut index = self.head;
        while index != NIL {
            let next = self.slot(index).next;
            if self.slot(index).refs == 1 {
                self.remove_resident(index);
            }
            index = next;
        }
    }

    pub fn total_charge(&self) -> usize {
        self.usage
    }

    /// Walks from the least-recent end, reclaiming unpinned entries until
    /// usage fits capacity. Pinned entries are skipped in place so their
    /// recency is preserved for when they are released.
    fn evict(&mut self) {
        let mut index = self.head;
        while self.usage > self.capacity && index != NIL {
            let next = self.slot(index).next;
            if self.slot(index).refs == 1 {
                self.remove_resident(index);
            }
            index = next;
        }
        if self.usage > self.capacity {
            tracing::trace!(
                usage = self.usage,
                capacity = self.capacity,
                "cache shard over capacity; all resident entries are pinned"
            );
        }
    }

    /// Takes a resident entry out of the table and list and drops the
    /// shard's reference.
    fn remove_resident(&mut self, index: u32) {
        self.table_remove(index);
        self.list_remove(index);
        self.slot_mut(index).resident = false;
        self.unref(index);
    }

    fn unref(&mut self, index: u32) {
        let entry = self.slot_mut(index);
        debug_assert!(entry.refs > 0);
        entry.refs -= 1;
        if entry.refs == 0 {
            debug_assert!(!entry.resident);
            let entry = match self.slots[index as usize].take() {
                Some(entry) => entry,
                None => unreachable!("stale cache slot index"),
            };
            self.usage -= entry.charge;
            if let Some(deleter) = &entry.deleter {
                deleter(&entry.key, &entry.value);
            }
            drop(entry);
            self.free.push(index);
        }
    }

    // ---- arena ----

    fn alloc(&mut self, entry: Entry<V>) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(entry);
                index
            }
            None => {
                self.slots.push(Some(entry));
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn slot(&self, index: u32) -> &Entry<V> {
        match &self.slots[index as usize] {
            Some(entry) => entry,
            None => unreachable!("stale cache slot index"),
        }
    }

    fn slot_mut(&mut self, index: u32) -> &mut Entry<V> {
        match &mut self.slots[index as usize] {
            Some(entry) => entry,
            None => unreachable!("stale cache slot index"),
        }
    }

    // ---- hash table ----

    /// Finds the link whose target is the entry matching `key`/`hash`, or
    /// the trailing link of the bucket's chain if there is no match.
    fn find_link(&self, key: &[u8], hash: u32) -> Link {
        let mut link = Link::Bucket(hash as usize & (self.buckets.len() - 1));
        loop {
            let index = self.link_target(link);
            if index == NIL {
                return link;
            }
            let entry = self.slot(index);
            if entry.hash == hash && entry.key.as_ref() == key {
                return link;
            }
            link = Link::Chain(index);
        }
    }

    fn link_target(&self, link: Link) -> u32 {
        match link {
            Link::Bucket(b) => self.buckets[b],
            Link::Chain(index) => self.slot(index).next_hash,
        }
    }

    fn set_link(&mut self, link: Link, target: u32) {
        match link {
            Link::Bucket(b) => self.buckets[b] = target,
            Link::Chain(index) => self.slot_mut(index).next_hash = target,
        }
    }

    /// Installs `index` in the table, unchaining and returning any entry
    /// it displaces (NIL if the key was absent).
    fn table_insert(&mut self, index: u32) -> u32 {
        let hash = self.slot(index).hash;
        let link = {
            let key = &self.slot(index).key;
            self.find_link(key, hash)
        };
        let old = self.link_target(link);
        let chain_tail = if old == NIL { NIL } else { self.slot(old).next_hash };
        self.slot_mut(index).next_hash = chain_tail;
        self.set_link(link, index);
        if old == NIL {
            self.elems += 1;
            if self.elems > self.buckets.len() {
                // Entries are large relative to a bucket slot, so keep the
                // average chain length at or below one.
                self.grow_table();
            }
        }
        old
    }

    fn table_remove(&mut self, index: u32) {
        let hash = self.slot(index).hash;
        let link = {
            let key = &self.slot(index).key;
            self.find_link(key, hash)
        };
        debug_assert_eq!(self.link_target(link), index);
        let next = self.slot(index).next_hash;
        self.set_link(link, next);
        self.elems -= 1;
    }

    fn grow_table(&mut self) {
        let mut new_len = 4;
        while new_len < self.elems {
            new_len *= 2;
        }
        let old_buckets = std::mem::replace(&mut self.buckets, vec![NIL; new_len]);
        for bucket in old_buckets {
            let mut index = bucket;
            while index != NIL {
                let next = self.slot(index).next_hash;
                let b = self.slot(index).hash as usize & (new_len - 1);
                self.slot_mut(index).next_hash = self.buckets[b];
                self.buckets[b] = index;
                index = next;
            }
        }
    }

    // ---- recency list ----

    fn list_append(&mut self, index: u32) {
        let old_tail = self.tail;
        {
            let entry = self.slot_mut(index);
            entry.prev = old_tail;
            entry.next = NIL;
        }
        if old_tail != NIL {
            self.slot_mut(old_tail).next = index;
        } else {
            self.head = index;
        }
        self.tail = index;
    }

    fn list_remove(&mut self, index: u32) {
        let (prev, next) = {
            let entry = self.slot(index);
            (entry.prev, entry.next)
        };
        if prev != NIL {
            self.slot_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slot_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
        let entry = self.slot_mut(index);
        entry.prev = NIL;
        entry.next = NIL;
    }
}

impl<V> Drop for Shard<V> {
    fn drop(&mut self) {
        // The shard is kept alive by every outstanding handle, so by the
        // time it drops each resident entry holds only the shard's own
        // reference; unref below runs its deleter.
        let mut index = self.head;
        while index != NIL {
            let next = self.slot(index).next;
            debug_assert_eq!(self.slot(index).refs, 1);
            self.slot_mut(index).resident = false;
            self.unref(index);
            index = next;
        }
    }
}
