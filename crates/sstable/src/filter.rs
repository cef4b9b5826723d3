//! The table's filter block: one policy-generated filter per fixed span of
//! data-file bytes.
//!
//! ```text
//! [filter 0]
//! [filter 1]
//! ...
//! [filter N-1]
//! [offset of filter 0: fixed32]
//! ...
//! [offset of filter N-1: fixed32]
//! [offset of the offset array: fixed32]
//! [base_lg: 1 byte]
//! ```
//!
//! Filter `i` covers the keys of every data block whose file offset falls
//! in `[i << base_lg, (i + 1) << base_lg)`. The mapping is lossy on
//! purpose: a span with no blocks gets an empty filter, and a block is
//! attributed to the span its *starting* offset lands in. Readers only
//! ever ask with a block's starting offset, so no key escapes its filter.

use std::sync::Arc;

use bloom::FilterPolicy;

use crate::coding::{decode_fixed32, put_fixed32};

/// Default span: one filter per 2 KiB of table file.
pub const FILTER_BASE_LG: u8 = 11;

/// Accumulates per-block key sets and emits the encoded filter block.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    base_lg: u8,
    /// Key bytes for the filter being accumulated, flattened back to back.
    keys: Vec<u8>,
    /// Start offset of each key in `keys`.
    start: Vec<usize>,
    /// Encoded filters so far.
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        Self::with_base_lg(policy, FILTER_BASE_LG)
    }

    /// Overrides the span width; smaller spans mean more, smaller filters.
    pub fn with_base_lg(policy: Arc<dyn FilterPolicy>, base_lg: u8) -> Self {
        debug_assert!(base_lg < 64);
        Self {
            policy,
            base_lg,
            keys: Vec::new(),
            start: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Tells the builder a data block begins at `block_offset`. Must be
    /// called with non-decreasing offsets. Flushes accumulated keys into
    /// filters (empty ones for spans no block started in) until the filter
    /// covering `block_offset` is the one being accumulated.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset >> self.base_lg;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    /// Adds a key belonging to the current data block.
    pub fn add_key(&mut self, key: &[u8]) {
        self.start.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    /// Emits the final filter and the trailing offset array, consuming the
    /// builder.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.start.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        for i in 0..self.filter_offsets.len() {
            let offset = self.filter_offsets[i];
            put_fixed32(&mut self.result, offset);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.push(self.base_lg);
        self.result
    }

    /// Flushes the accumulated keys as one filter, or records an empty
    /// filter when no keys arrived for the span.
    fn generate_filter(&mut self) {
        let num_keys = self.start.len();
        self.filter_offsets.push(self.result.len() as u32);
        if num_keys == 0 {
            return;
        }

        // Rebuild the key slices from the flattened buffer; a trailing
        // sentinel offset makes every length a subtraction.
        self.start.push(self.keys.len());
        let keys: Vec<&[u8]> = (0..num_keys)
            .map(|i| &self.keys[self.start[i]..self.start[i + 1]])
            .collect();
        self.policy.create_filter(&keys, &mut self.result);

        self.keys.clear();
        self.start.clear();
    }
}

/// Answers "might this key appear in the data block at this offset?" from
/// an encoded filter block.
///
/// Structural anomalies make the reader inert (it answers "maybe" to
/// everything): a false positive costs one block read, a false negative
/// would hide data.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Byte position of the offset array within `data`; also the length
    /// of the filter section.
    array_offset: usize,
    num_filters: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> Self {
        let mut reader = Self {
            policy,
            data: Vec::new(),
            array_offset: 0,
            num_filters: 0,
            base_lg: 0,
        };
        let n = contents.len();
        // 1 byte for base_lg plus 4 for the offset-array position.
        if n < 5 {
            return reader;
        }
        let base_lg = contents[n - 1];
        if base_lg >= 64 {
            // A span wider than the address space is not a real encoding.
            return reader;
        }
        let array_offset = decode_fixed32(&contents[n - 5..]) as usize;
        if array_offset > n - 5 {
            return reader;
        }
        reader.base_lg = base_lg;
        reader.array_offset = array_offset;
        reader.num_filters = (n - 5 - array_offset) / 4;
        reader.data = contents;
        reader
    }

    /// True unless the filter covering `block_offset` proves `key` absent.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            return true;
        }
        let start =
            decode_fixed32(&self.data[self.array_offset + index * 4..]) as usize;
        // The slot one past the last filter offset is the array-offset
        // word itself, so the final filter's limit is the filter-section
        // length.
        let limit =
            decode_fixed32(&self.data[self.array_offset + index * 4 + 4..]) as usize;
        if start > limit || limit > self.array_offset {
            // Treat structural damage as a potential match.
            return true;
        }
        if start == limit {
            // An empty filter holds no keys.
            return false;
        }
        self.policy.key_may_match(key, &self.data[start..limit])
    }
}
