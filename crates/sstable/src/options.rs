//! Knobs for building and reading tables.

use std::sync::Arc;

use bloom::FilterPolicy;
use cache::Cache;

use crate::block::Block;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::error::Error;

/// How a block body is encoded on disk. The type byte lives in the block
/// trailer; codecs themselves are pluggable at the layer above, so the only
/// built-in is the identity encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
}

impl CompressionType {
    pub fn to_byte(self) -> u8 {
        match self {
            CompressionType::None => 0,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(CompressionType::None),
            other => Err(Error::corruption(format!(
                "unknown compression type {other:#04x}"
            ))),
        }
    }
}

/// Table-wide configuration, shared by the builder and the reader. A table
/// must be read with the same comparator and filter policy it was built
/// with.
#[derive(Clone)]
pub struct Options {
    /// Key order for data and index blocks.
    pub comparator: Arc<dyn Comparator>,

    /// Uncompressed data-block payload at which the builder cuts a block.
    pub block_size: usize,

    /// Keys between restart points inside a block. Larger intervals
    /// compress better and seek slower.
    pub block_restart_interval: usize,

    pub compression: CompressionType,

    /// When set, the builder emits a filter block and readers consult it
    /// before touching a data block.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// When set, decoded data blocks are kept here across reads, keyed per
    /// table via [`Cache::new_id`].
    pub block_cache: Option<Arc<Cache<Block>>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            filter_policy: None,
            block_cache: None,
        }
    }
}

/// Per-read configuration.
#[derive(Clone, Copy, Debug)]
pub struct ReadOptions {
    /// Verify the trailer checksum of every block read.
    pub verify_checksums: bool,

    /// Insert blocks read on behalf of this operation into the block
    /// cache. Scans that should not wash out the cache turn this off.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}
