//! On-disk framing for table files: block pointers, the fixed footer, and
//! the per-block trailer.
//!
//! ```text
//! <data block 0> <trailer>
//! <data block 1> <trailer>
//! ...
//! <filter block> <trailer>      (present when a filter policy is set)
//! <metaindex block> <trailer>
//! <index block> <trailer>
//! <footer: 48 bytes, fixed>
//! ```
//!
//! Every block is followed by a 5-byte trailer: one compression-type byte
//! and a little-endian CRC32 of the block body plus the type byte. The
//! footer holds varint-encoded handles for the metaindex and index blocks,
//! zero-padded so the footer is always exactly [`FOOTER_SIZE`] bytes, then
//! the magic number.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::coding::{decode_fixed32, decode_fixed64, get_varint64, put_varint64};
use crate::error::{Error, Result};
use crate::options::{CompressionType, ReadOptions};

/// Identifies a table file. Chosen once and never changed.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Compression-type byte plus CRC32 of (body || type).
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Worst-case encoding of a [`BlockHandle`]: two 10-byte varints.
pub const MAX_ENCODED_HANDLE: usize = 10 + 10;

/// Two padded handles plus the 8-byte magic.
pub const FOOTER_SIZE: usize = 2 * MAX_ENCODED_HANDLE + 8;

/// Points at the extent of a file holding a block: byte offset and body
/// size, excluding the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Decodes a handle from the front of `input`, consuming it.
    pub fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let offset =
            get_varint64(input).ok_or_else(|| Error::corruption("bad block handle"))?;
        let size =
            get_varint64(input).ok_or_else(|| Error::corruption("bad block handle"))?;
        Ok(Self { offset, size })
    }
}

/// The fixed-size tail of every table file, locating the metaindex and
/// index blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Appends exactly [`FOOTER_SIZE`] bytes to `dst`.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let base = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(base + 2 * MAX_ENCODED_HANDLE, 0);
        dst.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        debug_assert_eq!(dst.len(), base + FOOTER_SIZE);
    }

    /// Decodes a footer from exactly [`FOOTER_SIZE`] bytes.
    pub fn decode_from(input: &[u8]) -> Result<Self> {
        if input.len() != FOOTER_SIZE {
            return Err(Error::invalid_argument(format!(
                "footer must be {FOOTER_SIZE} bytes, got {}",
                input.len()
            )));
        }
        let magic = decode_fixed64(&input[FOOTER_SIZE - 8..]);
        if magic != TABLE_MAGIC {
            return Err(Error::corruption("not a table file (bad magic number)"));
        }
        let mut handles = &input[..2 * MAX_ENCODED_HANDLE];
        let metaindex_handle = BlockHandle::decode_from(&mut handles)?;
        let index_handle = BlockHandle::decode_from(&mut handles)?;
        Ok(Self {
            metaindex_handle,
            index_handle,
        })
    }
}

/// A block body as it came off disk.
#[derive(Debug)]
pub struct BlockContents {
    pub data: Vec<u8>,
    /// Whether the caller may keep this block in a cache. Reads through
    /// [`read_block`] always may; the flag exists so other producers of
    /// block contents can opt out.
    pub cachable: bool,
}

/// Reads the block identified by `handle`, checks its trailer, and strips
/// it.
///
/// # Errors
///
/// `Io` on a short or failed read, `Corruption` on a checksum mismatch
/// (only when `options.verify_checksums` is set) or an unknown
/// compression-type byte.
pub fn read_block(
    file: &File,
    options: &ReadOptions,
    handle: &BlockHandle,
) -> Result<BlockContents> {
    let n = usize::try_from(handle.size)
        .map_err(|_| Error::corruption("block handle size overflows"))?;
    let mut buf = vec![0u8; n + BLOCK_TRAILER_SIZE];
    file.read_exact_at(&mut buf, handle.offset)?;

    if options.verify_checksums {
        let expected = decode_fixed32(&buf[n + 1..]);
        let actual = crc32fast::hash(&buf[..n + 1]);
        if expected != actual {
            tracing::warn!(offset = handle.offset, "block checksum mismatch");
            return Err(Error::corruption("block checksum mismatch"));
        }
    }

    match CompressionType::from_byte(buf[n])? {
        CompressionType::None => {
            buf.truncate(n);
            Ok(BlockContents {
                data: buf,
                cachable: true,
            })
        }
    }
}
