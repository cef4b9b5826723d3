//! Writing immutable table files.
//!
//! Entries arrive in comparator order and are packed into data blocks; a
//! block is cut when its payload reaches `Options::block_size`. Each cut
//! records a *pending* index entry whose key is shortened with
//! [`Comparator::find_shortest_separator`] once the first key of the next
//! block is known, so index keys are as short as the data allows. The
//! filter block tracks data-block offsets as blocks are cut.
//!
//! [`Comparator::find_shortest_separator`]:
//!     crate::comparator::Comparator::find_shortest_separator

use std::fs::File;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::block::BlockBuilder;
use crate::error::Result;
use crate::filter::FilterBlockBuilder;
use crate::format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use crate::options::{CompressionType, Options};

/// Streams sorted entries into a table file. Call [`add`](Self::add) in
/// key order, then [`finish`](Self::finish) exactly once.
pub struct TableBuilder {
    options: Options,
    file: File,
    /// File offset where the next block will start.
    offset: u64,
    num_entries: u64,
    data_block: BlockBuilder,
    /// Index entries use restart interval 1: every key is a restart point,
    /// so index seeks never scan.
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    /// Set between cutting a data block and learning the next block's
    /// first key, which bounds the separator.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    filter_block: Option<FilterBlockBuilder>,
}

impl TableBuilder {
    pub fn new(options: Options, file: File) -> Self {
        let mut filter_block = options
            .filter_policy
            .clone()
            .map(FilterBlockBuilder::new);
        if let Some(filter) = &mut filter_block {
            filter.start_block(0);
        }
        let block_restart_interval = options.block_restart_interval;
        Self {
            options,
            file,
            offset: 0,
            num_entries: 0,
            data_block: BlockBuilder::new(block_restart_interval),
            index_block: BlockBuilder::new(1),
            last_key: Vec::new(),
            pending_index_entry: false,
            pending_handle: BlockHandle::new(0, 0),
            filter_block,
        }
    }

    /// Appends an entry. `key` must sort strictly after every key added
    /// before it.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(
            self.num_entries == 0
                || self.options.comparator.compare(key, &self.last_key)
                    == std::cmp::Ordering::Greater,
            "keys must be added in strictly increasing order"
        );

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            // last_key is the final key of the block just cut; shorten it
            // toward (but not reaching) the first key of this block.
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(filter) = &mut self.filter_block {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Cuts the current data block, if any.
    pub fn flush(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let raw = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.pending_handle = self.write_raw_block(&raw, self.options.compression)?;
        self.pending_index_entry = true;

        if let Some(filter) = &mut self.filter_block {
            filter.start_block(self.offset);
        }
        Ok(())
    }

    /// Writes the filter, metaindex, and index blocks plus the footer,
    /// syncs the file, and returns its final size.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;

        // Filter block. Written raw: filters are already dense, and the
        // reader addresses them by byte offset.
        let filter_handle = match self.filter_block.take() {
            Some(filter) => {
                let contents = filter.finish();
                Some(self.write_raw_block(&contents, CompressionType::None)?)
            }
            None => None,
        };

        // Metaindex block: maps "filter.<policy>" to the filter block.
        let mut meta_block = BlockBuilder::new(self.options.block_restart_interval);
        if let (Some(handle), Some(policy)) = (filter_handle, &self.options.filter_policy) {
            let key = format!("filter.{}", policy.name());
            let mut handle_encoding = Vec::new();
            handle.encode_to(&mut handle_encoding);
            meta_block.add(key.as_bytes(), &handle_encoding);
        }
        let metaindex_handle = {
            let raw = meta_block.finish().to_vec();
            self.write_raw_block(&raw, self.options.compression)?
        };

        // Index block, including the entry for the final data block.
        if self.pending_index_entry {
            self.options.comparator.find_short_successor(&mut self.last_key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }
        let index_handle = {
            let raw = self.index_block.finish().to_vec();
            self.write_raw_block(&raw, self.options.compression)?
        };

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let mut footer_encoding = Vec::new();
        footer.encode_to(&mut footer_encoding);
        self.file.write_all(&footer_encoding)?;
        self.offset += FOOTER_SIZE as u64;

        self.file.flush()?;
        self.file.sync_all()?;
        Ok(self.offset)
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far (including trailers, excluding the footer
    /// until `finish` runs).
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    fn write_raw_block(
        &mut self,
        raw: &[u8],
        compression: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, raw.len() as u64);
        self.file.write_all(raw)?;

        // Trailer: type byte, then CRC32 of body plus type.
        let type_byte = compression.to_byte();
        let mut crc = crc32fast::Hasher::new();
        crc.update(raw);
        crc.update(&[type_byte]);
        self.file.write_u8(type_byte)?;
        self.file.write_u32::<LittleEndian>(crc.finalize())?;

        self.offset += (raw.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }
}
