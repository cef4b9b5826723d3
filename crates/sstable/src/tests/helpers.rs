//! Shared fixtures for the sstable tests.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bloom::FilterPolicy;

use crate::coding::{decode_fixed32, put_fixed32};
use crate::error::Error;
use crate::iterator::{CleanupList, Iter};
use crate::options::Options;
use crate::table::Table;
use crate::TableBuilder;

/// Builds a table file at `path` from pre-sorted entries and returns its
/// size.
pub fn build_table_file(
    path: &Path,
    options: &Options,
    entries: &[(Vec<u8>, Vec<u8>)],
) -> anyhow::Result<u64> {
    let file = File::create(path)?;
    let mut builder = TableBuilder::new(options.clone(), file);
    for (key, value) in entries {
        builder.add(key, value)?;
    }
    Ok(builder.finish()?)
}

/// Opens a table previously written with [`build_table_file`].
pub fn open_table(path: &Path, options: &Options, size: u64) -> anyhow::Result<Arc<Table>> {
    let file = File::open(path)?;
    Ok(Arc::new(Table::open(options.clone(), file, size)?))
}

/// `n` sorted `(key, value)` pairs with zero-padded numeric keys.
pub fn numbered_entries(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..n)
        .map(|i| {
            (
                format!("key{i:04}").into_bytes(),
                format!("value{i}").into_bytes(),
            )
        })
        .collect()
}

/// Drains `iter` front to back.
pub fn collect_forward(iter: &mut dyn Iter) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    iter.seek_to_first();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    out
}

/// Drains `iter` back to front.
pub fn collect_backward(iter: &mut dyn Iter) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    iter.seek_to_last();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.prev();
    }
    out
}

/// An in-memory [`Iter`] over sorted entries, for driving the merging
/// iterator without table files.
pub struct VecIter {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
    status: Option<Error>,
    cleanups: CleanupList,
}

impl VecIter {
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Self {
            entries,
            pos: None,
            status: None,
            cleanups: CleanupList::default(),
        }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
                .collect(),
        )
    }

    pub fn with_status(mut self, status: Error) -> Self {
        self.status = Some(status);
        self
    }
}

impl Iter for VecIter {
    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn seek_to_first(&mut self) {
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
    }

    fn seek_to_last(&mut self) {
        self.pos = self.entries.len().checked_sub(1);
    }

    fn seek(&mut self, target: &[u8]) {
        let pos = self.entries.partition_point(|(k, _)| k.as_slice() < target);
        self.pos = if pos < self.entries.len() { Some(pos) } else { None };
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.pos = match self.pos {
            Some(p) if p + 1 < self.entries.len() => Some(p + 1),
            _ => None,
        };
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        self.pos = match self.pos {
            Some(p) if p > 0 => Some(p - 1),
            _ => None,
        };
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos.expect("key() on invalid iterator")].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos.expect("value() on invalid iterator")].1
    }

    fn status(&self) -> crate::Result<()> {
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    fn register_cleanup(&mut self, cleanup: Box<dyn FnOnce() + Send>) {
        self.cleanups.push(cleanup);
    }
}

/// A transparent filter policy for filter-block tests: each key
/// contributes its 32-bit hash, and matching means "hash present", so
/// tests can predict exactly which keys match.
pub struct TestHashFilter;

fn test_hash(key: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for &b in key {
        h ^= u32::from(b);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

impl FilterPolicy for TestHashFilter {
    fn name(&self) -> &'static str {
        "TestHashFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        for key in keys {
            put_fixed32(dst, test_hash(key));
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        let h = test_hash(key);
        filter
            .chunks_exact(4)
            .any(|chunk| decode_fixed32(chunk) == h)
    }
}
