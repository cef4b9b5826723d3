//! Sorted key/value blocks with prefix compression and restart points.
//!
//! Keys within a block share prefixes with their predecessor; every
//! `restart_interval`-th entry is written in full (a *restart point*) so
//! seeks can binary-search the restart array and scan at most one interval.
//!
//! Entry layout:
//!
//! ```text
//! [shared: varint32][non_shared: varint32][value_len: varint32]
//! [key suffix: non_shared bytes][value: value_len bytes]
//! ```
//!
//! The block body ends with the restart array (fixed32 offsets) and a
//! fixed32 restart count.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::coding::{decode_fixed32, get_varint32, put_fixed32, put_varint32};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::format::BlockContents;
use crate::iterator::{CleanupList, Iter};

/// An immutable, decoded block. Shared between the block cache and any
/// number of live iterators via `Arc`.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    /// Offset of the restart array within `data`.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Validates the restart array framing and takes ownership of the
    /// bytes.
    pub fn new(contents: BlockContents) -> Result<Self> {
        let data = contents.data;
        if data.len() < 4 {
            return Err(Error::corruption("block too small for restart count"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts = ((data.len() - 4) / 4) as u32;
        if num_restarts == 0 || num_restarts > max_restarts {
            return Err(Error::corruption("bad restart count in block"));
        }
        let restart_offset = data.len() - 4 - num_restarts as usize * 4;
        Ok(Self {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Decoded size in bytes; used as the block-cache charge.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> usize {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + 4 * index as usize..]) as usize
    }
}

/// Builds the wire form of a [`Block`] from keys added in comparator
/// order.
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries since the last restart point.
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        Self {
            restart_interval,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    /// Appends an entry. `key` must sort after every previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.restart_interval);

        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_length = self.last_key.len().min(key.len());
            while shared < min_length && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Start a new restart point with an uncompressed key.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
    }

    /// Appends the restart array and returns the finished block body.
    pub fn finish(&mut self) -> &[u8] {
        for i in 0..self.restarts.len() {
            let restart = self.restarts[i];
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Size of the block if `finish` were called now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Cursor over one block. Holds the block alive via `Arc`, so it may
/// outlive the cache pin that produced it.
pub struct BlockIter {
    block: Arc<Block>,
    comparator: Arc<dyn Comparator>,
    /// Offset of the current entry; `restart_offset` when invalid.
    current: usize,
    /// Restart block containing `current`.
    restart_index: u32,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Option<Error>,
    cleanups: CleanupList,
}

impl BlockIter {
    pub fn new(block: Arc<Block>, comparator: Arc<dyn Comparator>) -> Self {
        let restart_offset = block.restart_offset;
        let num_restarts = block.num_restarts;
        Self {
            block,
            comparator,
            current: restart_offset,
            restart_index: num_restarts,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            status: None,
            cleanups: CleanupList::default(),
        }
    }

    /// Offset just past the current entry.
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // Leave `current` to be computed by the next parse: an empty value
        // span at the restart offset makes `next_entry_offset` land there.
        self.value_offset = self.block.restart_point(index);
        self.value_len = 0;
    }

    fn mark_corrupt(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
        if self.status.is_none() {
            self.status = Some(Error::corruption("bad entry in block"));
        }
        self.key.clear();
        self.value_offset = 0;
        self.value_len = 0;
    }

    /// Decodes the entry at `next_entry_offset`, rebuilding the prefixed
    /// key. Returns false (leaving the iterator invalid) at the end of the
    /// block or on a malformed entry.
    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.block.restart_offset {
            self.current = self.block.restart_offset;
            self.restart_index = self.block.num_restarts;
            return false;
        }

        let available = &self.block.data[self.current..self.block.restart_offset];
        let mut input = available;
        let header = (
            get_varint32(&mut input),
            get_varint32(&mut input),
            get_varint32(&mut input),
        );
        let (Some(shared), Some(non_shared), Some(value_len)) = header else {
            self.mark_corrupt();
            return false;
        };
        let (shared, non_shared, value_len) =
            (shared as usize, non_shared as usize, value_len as usize);
        if shared > self.key.len() || input.len() < non_shared + value_len {
            self.mark_corrupt();
            return false;
        }
        let header_len = available.len() - input.len();

        self.key.truncate(shared);
        self.key.extend_from_slice(&input[..non_shared]);
        self.value_offset = self.current + header_len + non_shared;
        self.value_len = value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }

    /// The full key stored at restart point `index` (restart entries never
    /// share a prefix). `None` on malformed data.
    fn restart_key(&self, index: u32) -> Option<&[u8]> {
        let offset = self.block.restart_point(index);
        if offset >= self.block.restart_offset {
            return None;
        }
        let mut input = &self.block.data[offset..self.block.restart_offset];
        let shared = get_varint32(&mut input)?;
        let non_shared = get_varint32(&mut input)? as usize;
        let _value_len = get_varint32(&mut input)?;
        if shared != 0 || input.len() < non_shared {
            return None;
        }
        Some(&input[..non_shared])
    }
}

impl Iter for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.block.restart_offset {
            // Keep scanning toward the end of the block.
        }
    }

    fn seek(&mut self, target: &[u8]) {
        // Binary search the restart array for the last restart point whose
        // key is < target, then scan forward within that interval.
        let mut left: u32 = 0;
        let mut right: u32 = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            match self.restart_key(mid) {
                Some(mid_key) => {
                    if self.comparator.compare(mid_key, target) == Ordering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                None => {
                    self.mark_corrupt();
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());

        // Back up to the last restart point strictly before the current
        // entry, then scan forward until just short of it.
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No entries before the first one.
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts;
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {
            // Stop at the entry immediately preceding `original`.
        }
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    fn register_cleanup(&mut self, cleanup: Box<dyn FnOnce() + Send>) {
        self.cleanups.push(cleanup);
    }
}
