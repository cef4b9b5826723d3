use std::sync::Arc;

use bloom::{BloomFilterPolicy, FilterPolicy};

use super::helpers::TestHashFilter;
use crate::filter::{FilterBlockBuilder, FilterBlockReader, FILTER_BASE_LG};

fn policy() -> Arc<dyn FilterPolicy> {
    Arc::new(TestHashFilter)
}

// -------------------- Builder layout --------------------

#[test]
fn empty_builder_encodes_only_the_trailer() {
    let builder = FilterBlockBuilder::new(policy());
    let block = builder.finish();
    // No filters: a zero array offset and the base_lg byte.
    assert_eq!(block, vec![0, 0, 0, 0, FILTER_BASE_LG]);

    let reader = FilterBlockReader::new(policy(), block);
    assert!(reader.key_may_match(0, b"foo"));
    assert!(reader.key_may_match(100_000, b"foo"));
}

#[test]
fn single_filter_covers_several_blocks() {
    // Three data blocks, all within the first 2 KiB span.
    let mut builder = FilterBlockBuilder::new(policy());
    builder.start_block(100);
    builder.add_key(b"foo");
    builder.add_key(b"bar");
    builder.add_key(b"box");
    builder.start_block(200);
    builder.add_key(b"box");
    builder.start_block(300);
    builder.add_key(b"hello");

    let reader = FilterBlockReader::new(policy(), builder.finish());
    assert!(reader.key_may_match(100, b"foo"));
    assert!(reader.key_may_match(100, b"bar"));
    assert!(reader.key_may_match(100, b"box"));
    assert!(reader.key_may_match(100, b"hello"));
    assert!(reader.key_may_match(100, b"foo"));
    assert!(!reader.key_may_match(100, b"missing"));
    assert!(!reader.key_may_match(100, b"other"));
}

#[test]
fn multiple_filters_map_by_block_offset() {
    let mut builder = FilterBlockBuilder::new(policy());

    // First filter: span [0, 2048).
    builder.start_block(0);
    builder.add_key(b"foo");
    builder.start_block(2000);
    builder.add_key(b"bar");

    // Second filter: span [2048, 4096).
    builder.start_block(3100);
    builder.add_key(b"box");

    // Third and fourth filters are empty; fifth covers [8192, 10240).
    builder.start_block(9000);
    builder.add_key(b"box");
    builder.add_key(b"hello");

    let reader = FilterBlockReader::new(policy(), builder.finish());

    // Span 0.
    assert!(reader.key_may_match(0, b"foo"));
    assert!(reader.key_may_match(2000, b"bar"));
    assert!(!reader.key_may_match(0, b"box"));
    assert!(!reader.key_may_match(0, b"hello"));

    // Span 1.
    assert!(reader.key_may_match(3100, b"box"));
    assert!(!reader.key_may_match(3100, b"foo"));
    assert!(!reader.key_may_match(3100, b"bar"));
    assert!(!reader.key_may_match(3100, b"hello"));

    // Empty spans match nothing.
    assert!(!reader.key_may_match(4100, b"foo"));
    assert!(!reader.key_may_match(4100, b"box"));
    assert!(!reader.key_may_match(6200, b"hello"));

    // Span 4, including the final filter's limit handling.
    assert!(reader.key_may_match(9000, b"box"));
    assert!(reader.key_may_match(9000, b"hello"));
    assert!(!reader.key_may_match(9000, b"foo"));
    assert!(!reader.key_may_match(9000, b"bar"));
}

#[test]
fn narrow_base_lg_partitions_every_8_bytes() {
    // One filter per 8 file bytes: a block at offset 0 with "x", a gap
    // span, then a block at offset 16 with "y".
    let mut builder = FilterBlockBuilder::with_base_lg(policy(), 3);
    builder.start_block(0);
    builder.add_key(b"x");
    builder.start_block(16);
    builder.add_key(b"y");

    let reader = FilterBlockReader::new(policy(), builder.finish());
    assert!(reader.key_may_match(0, b"x"));
    assert!(!reader.key_may_match(8, b"x"), "gap span has an empty filter");
    assert!(reader.key_may_match(16, b"y"));
    assert!(!reader.key_may_match(16, b"x"));
    // Offsets past the last filter are conservatively a match.
    assert!(reader.key_may_match(24, b"anything"));
}

// -------------------- Reader resilience --------------------

#[test]
fn truncated_contents_make_the_reader_inert() {
    for contents in [vec![], vec![FILTER_BASE_LG], vec![0, 0, 0, FILTER_BASE_LG]] {
        let reader = FilterBlockReader::new(policy(), contents);
        assert!(reader.key_may_match(0, b"anything"));
        assert!(reader.key_may_match(4096, b"anything"));
    }
}

#[test]
fn out_of_range_array_offset_makes_the_reader_inert() {
    // Claims the offset array starts past the end of the block.
    let mut contents = Vec::new();
    crate::coding::put_fixed32(&mut contents, 1_000);
    contents.push(FILTER_BASE_LG);
    let reader = FilterBlockReader::new(policy(), contents);
    assert!(reader.key_may_match(0, b"anything"));
}

#[test]
fn corrupt_filter_offsets_are_a_conservative_match() {
    // One "filter" whose recorded start exceeds its limit (the limit slot
    // is the array-offset word, 0 here).
    let mut contents = Vec::new();
    crate::coding::put_fixed32(&mut contents, 9); // offsets[0]: start past limit
    crate::coding::put_fixed32(&mut contents, 0); // array offset
    contents.push(FILTER_BASE_LG);
    let reader = FilterBlockReader::new(policy(), contents);
    assert!(reader.key_may_match(0, b"anything"));
}

// -------------------- With the real Bloom policy --------------------

#[test]
fn bloom_backed_filter_block_has_no_false_negatives() {
    let policy: Arc<dyn FilterPolicy> = Arc::new(BloomFilterPolicy::new(10));
    let mut builder = FilterBlockBuilder::new(policy.clone());

    let mut keys_by_span: Vec<(u64, Vec<Vec<u8>>)> = Vec::new();
    for span in 0..4u64 {
        let offset = span * 2048;
        builder.start_block(offset);
        let keys: Vec<Vec<u8>> = (0..100)
            .map(|i| format!("span{span}-key{i}").into_bytes())
            .collect();
        for key in &keys {
            builder.add_key(key);
        }
        keys_by_span.push((offset, keys));
    }

    let reader = FilterBlockReader::new(policy, builder.finish());
    for (offset, keys) in &keys_by_span {
        for key in keys {
            assert!(reader.key_may_match(*offset, key));
        }
    }
}
