//! # SSTable — immutable sorted tables and the machinery that reads them
//!
//! The on-disk unit of the ShaleKV storage engine: a write-once file of
//! sorted key/value pairs, plus everything the read path needs to use a
//! set of them efficiently -- a table cache that bounds open files, an
//! optional shared block cache, Bloom-filter short-circuiting for point
//! lookups, and a direction-aware merging iterator for scans across many
//! tables.
//!
//! ## File layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (sorted entries, prefix-compressed,             │
//! │              restart points every N entries)                │
//! │   ... each block followed by a 5-byte trailer:              │
//! │   [compression type: u8][crc32 of body+type: u32 LE]        │
//! ├─────────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK (one filter per 2^base_lg bytes of file;       │
//! │               present when a filter policy is configured)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ METAINDEX BLOCK ("filter.<policy name>" → filter handle)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (shortened separator key → data block handle)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 48 bytes: metaindex handle, index       │
//! │         handle, zero padding, magic)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Block handles are varint `(offset, size)` pairs; all fixed-width
//! integers are little-endian.
//!
//! ## Read paths
//!
//! Point lookup: [`TableCache::get`] pins the open table (opening it on
//! miss), seeks its index block, asks the filter whether the target block
//! can contain the key, and only then reads the block -- through the block
//! cache when one is configured.
//!
//! Range scan: one [`Iter`] per table from the table cache, composed by
//! [`new_merging_iterator`] into a single sorted, bidirectional cursor.
//! Every iterator releases its cache pins when dropped.

mod block;
mod builder;
mod coding;
mod comparator;
mod error;
mod filter;
mod format;
mod iterator;
mod merge;
mod options;
mod table;
mod table_cache;

pub use block::{Block, BlockBuilder, BlockIter};
pub use builder::TableBuilder;
pub use comparator::{BytewiseComparator, Comparator};
pub use error::{Error, Result};
pub use filter::{FilterBlockBuilder, FilterBlockReader, FILTER_BASE_LG};
pub use format::{
    read_block, BlockContents, BlockHandle, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE,
    MAX_ENCODED_HANDLE, TABLE_MAGIC,
};
pub use iterator::{empty_iterator, error_iterator, CleanupList, Iter};
pub use merge::new_merging_iterator;
pub use options::{CompressionType, Options, ReadOptions};
pub use table::{Table, TableIter};
pub use table_cache::TableCache;

#[cfg(test)]
mod tests;
