//! Reading immutable table files.
//!
//! A [`Table`] keeps the decoded index block, the filter block, and the
//! open file; data blocks are fetched on demand, optionally through the
//! shared block cache. Point lookups go index -> filter -> block; scans go
//! through [`TableIter`], which walks the index and lazily opens one data
//! block at a time in either direction.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use crate::block::{Block, BlockIter};
use crate::coding::put_fixed64;
use crate::error::{Error, Result};
use crate::filter::FilterBlockReader;
use crate::format::{read_block, BlockHandle, Footer, FOOTER_SIZE};
use crate::iterator::{CleanupList, Iter};
use crate::options::{Options, ReadOptions};

/// An open, immutable table file.
pub struct Table {
    options: Options,
    file: File,
    /// Distinguishes this table's blocks in the shared block cache; 0 when
    /// no cache is configured.
    cache_id: u64,
    index_block: Arc<Block>,
    filter: Option<FilterBlockReader>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("cache_id", &self.cache_id)
            .field("index_block", &self.index_block)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Opens a table of `size` bytes. Reads and validates the footer, the
    /// index block, and (when a filter policy is configured) the filter
    /// block.
    pub fn open(options: Options, file: File, size: u64) -> Result<Table> {
        if size < FOOTER_SIZE as u64 {
            return Err(Error::corruption("file is too short to be a table"));
        }
        let mut footer_bytes = [0u8; FOOTER_SIZE];
        file.read_exact_at(&mut footer_bytes, size - FOOTER_SIZE as u64)?;
        let footer = Footer::decode_from(&footer_bytes)?;

        let read_options = ReadOptions::default();
        let index_contents = read_block(&file, &read_options, &footer.index_handle)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let cache_id = match &options.block_cache {
            Some(cache) => cache.new_id(),
            None => 0,
        };

        let mut table = Table {
            options,
            file,
            cache_id,
            index_block,
            filter: None,
        };
        table.read_meta(&footer);
        Ok(table)
    }

    /// Loads the filter block named in the metaindex block. Filters only
    /// accelerate reads, so failures here degrade to "no filter" instead
    /// of failing the open.
    fn read_meta(&mut self, footer: &Footer) {
        let Some(policy) = self.options.filter_policy.clone() else {
            return;
        };
        let read_options = ReadOptions::default();
        let Ok(contents) = read_block(&self.file, &read_options, &footer.metaindex_handle)
        else {
            tracing::warn!("unreadable metaindex block; continuing without filter");
            return;
        };
        let Ok(meta) = Block::new(contents) else {
            tracing::warn!("malformed metaindex block; continuing without filter");
            return;
        };

        let mut iter = BlockIter::new(Arc::new(meta), self.options.comparator.clone());
        let key = format!("filter.{}", policy.name());
        iter.seek(key.as_bytes());
        if !iter.valid() || iter.key() != key.as_bytes() {
            return;
        }
        let mut handle_bytes = iter.value();
        let Ok(handle) = BlockHandle::decode_from(&mut handle_bytes) else {
            return;
        };
        if let Ok(contents) = read_block(&self.file, &read_options, &handle) {
            self.filter = Some(FilterBlockReader::new(policy, contents.data));
        }
    }

    /// The block-cache key for a block of this table.
    fn cache_key(&self, handle: &BlockHandle) -> Vec<u8> {
        let mut key = Vec::with_capacity(16);
        put_fixed64(&mut key, self.cache_id);
        put_fixed64(&mut key, handle.offset);
        key
    }

    /// Produces an iterator over one data block, consulting the block
    /// cache when configured. A cached block's pin is tied to the returned
    /// iterator via its cleanup hook.
    fn block_iter(&self, options: &ReadOptions, handle: &BlockHandle) -> Result<BlockIter> {
        let comparator = self.options.comparator.clone();

        let Some(block_cache) = &self.options.block_cache else {
            let contents = read_block(&self.file, options, handle)?;
            let block = Arc::new(Block::new(contents)?);
            return Ok(BlockIter::new(block, comparator));
        };

        let cache_key = self.cache_key(handle);
        if let Some(cache_handle) = block_cache.lookup(&cache_key) {
            let mut iter = BlockIter::new(cache_handle.value_arc(), comparator);
            iter.register_cleanup(Box::new(move || drop(cache_handle)));
            return Ok(iter);
        }

        let contents = read_block(&self.file, options, handle)?;
        let cachable = contents.cachable;
        let block = Block::new(contents)?;
        if cachable && options.fill_cache {
            let charge = block.size();
            let cache_handle = block_cache.insert(&cache_key, block, charge, None);
            let mut iter = BlockIter::new(cache_handle.value_arc(), comparator);
            iter.register_cleanup(Box::new(move || drop(cache_handle)));
            Ok(iter)
        } else {
            Ok(BlockIter::new(Arc::new(block), comparator))
        }
    }

    /// Point lookup. Seeks the index, consults the filter for the target
    /// block's offset, and only then reads the block. On a hit, `found` is
    /// called once with the stored key and value; absence is signaled by
    /// `found` never running.
    pub fn internal_get(
        &self,
        options: &ReadOptions,
        key: &[u8],
        found: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<()> {
        let mut index_iter =
            BlockIter::new(self.index_block.clone(), self.options.comparator.clone());
        index_iter.seek(key);
        if !index_iter.valid() {
            return index_iter.status();
        }

        let mut handle_bytes = index_iter.value();
        let handle = BlockHandle::decode_from(&mut handle_bytes)?;
        if let Some(filter) = &self.filter {
            if !filter.key_may_match(handle.offset, key) {
                // Definitely absent; skip the block read entirely.
                return Ok(());
            }
        }

        let mut block_iter = self.block_iter(options, &handle)?;
        block_iter.seek(key);
        if block_iter.valid()
            && self.options.comparator.compare(block_iter.key(), key) == std::cmp::Ordering::Equal
        {
            found(block_iter.key(), block_iter.value());
        }
        block_iter.status()
    }

    /// An iterator over every entry in `table`, in comparator order. Takes
    /// the `Arc` so the iterator can hold the table alive on its own.
    pub fn new_iter(table: &Arc<Table>, options: ReadOptions) -> TableIter {
        TableIter::new(Arc::clone(table), options)
    }
}

/// Two-level iterator: an index cursor picks the data block, a lazily
/// opened block cursor walks within it. Blocks are only read when the
/// iterator actually lands in them.
pub struct TableIter {
    table: Arc<Table>,
    options: ReadOptions,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
    /// Handle of the block `data_iter` is over, so repositioning within
    /// the same block does not re-read it.
    data_block_handle: Option<BlockHandle>,
    status: Option<Error>,
    cleanups: CleanupList,
}

impl TableIter {
    fn new(table: Arc<Table>, options: ReadOptions) -> Self {
        let index_iter = BlockIter::new(
            table.index_block.clone(),
            table.options.comparator.clone(),
        );
        Self {
            table,
            options,
            index_iter,
            data_iter: None,
            data_block_handle: None,
            status: None,
            cleanups: CleanupList::default(),
        }
    }

    /// Points `data_iter` at the block the index cursor designates,
    /// reusing the current block when it is the same one.
    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            self.data_block_handle = None;
            return;
        }
        let mut handle_bytes = self.index_iter.value();
        let handle = match BlockHandle::decode_from(&mut handle_bytes) {
            Ok(handle) => handle,
            Err(err) => {
                if self.status.is_none() {
                    self.status = Some(err);
                }
                self.data_iter = None;
                self.data_block_handle = None;
                return;
            }
        };
        if self.data_block_handle == Some(handle) {
            return;
        }
        match self.table.block_iter(&self.options, &handle) {
            Ok(iter) => {
                self.data_iter = Some(iter);
                self.data_block_handle = Some(handle);
            }
            Err(err) => {
                if self.status.is_none() {
                    self.status = Some(err);
                }
                self.data_iter = None;
                self.data_block_handle = None;
            }
        }
    }

    /// Advances over exhausted (or unreadable) blocks until the data
    /// cursor is valid or the index runs out.
    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |iter| !iter.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                self.data_block_handle = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |iter| !iter.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                self.data_block_handle = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_last();
            }
        }
    }
}

impl Iter for TableIter {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |iter| iter.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.data_iter {
            iter.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.data_iter {
            iter.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.data_iter {
            Some(iter) => iter.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.data_iter {
            Some(iter) => iter.value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(iter) = &self.data_iter {
            iter.status()?;
        }
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    fn register_cleanup(&mut self, cleanup: Box<dyn FnOnce() + Send>) {
        self.cleanups.push(cleanup);
    }
}
