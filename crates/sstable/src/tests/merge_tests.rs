use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use super::helpers::{build_table_file, collect_backward, collect_forward, VecIter};
use crate::comparator::{BytewiseComparator, Comparator};
use crate::iterator::Iter;
use crate::merge::new_merging_iterator;
use crate::options::{Options, ReadOptions};
use crate::table::Table;
use crate::Error;

fn comparator() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

fn merged(children: Vec<Box<dyn Iter>>) -> Box<dyn Iter> {
    new_merging_iterator(comparator(), children)
}

fn expect_entry(iter: &dyn Iter, key: &str, value: &str) {
    assert!(iter.valid());
    assert_eq!(iter.key(), key.as_bytes(), "key mismatch");
    assert_eq!(iter.value(), value.as_bytes(), "value mismatch");
}

// -------------------- Degenerate shapes --------------------

#[test]
fn zero_children_is_an_empty_iterator() -> Result<()> {
    let mut iter = merged(vec![]);
    iter.seek_to_first();
    assert!(!iter.valid());
    iter.status()?;
    Ok(())
}

#[test]
fn one_child_is_passed_through() -> Result<()> {
    let child = VecIter::from_pairs(&[("a", "1"), ("b", "2")]);
    let mut iter = merged(vec![Box::new(child)]);
    assert_eq!(
        collect_forward(iter.as_mut()),
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ]
    );
    Ok(())
}

#[test]
fn all_children_empty_is_never_valid() -> Result<()> {
    let mut iter = merged(vec![
        Box::new(VecIter::new(Vec::new())),
        Box::new(VecIter::new(Vec::new())),
    ]);
    iter.seek_to_first();
    assert!(!iter.valid());
    iter.seek_to_last();
    assert!(!iter.valid());
    iter.seek(b"x");
    assert!(!iter.valid());
    iter.status()?;
    Ok(())
}

// -------------------- Sorted merge --------------------

#[test]
fn forward_merge_is_globally_sorted() -> Result<()> {
    let a = VecIter::from_pairs(&[("apple", "a"), ("cherry", "a"), ("fig", "a")]);
    let b = VecIter::from_pairs(&[("banana", "b"), ("date", "b")]);
    let c = VecIter::from_pairs(&[("elderberry", "c")]);

    let mut iter = merged(vec![Box::new(a), Box::new(b), Box::new(c)]);
    let keys: Vec<Vec<u8>> = collect_forward(iter.as_mut())
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        keys,
        ["apple", "banana", "cherry", "date", "elderberry", "fig"]
            .map(|k| k.as_bytes().to_vec())
    );
    Ok(())
}

#[test]
fn reverse_merge_is_the_mirror() -> Result<()> {
    let a = VecIter::from_pairs(&[("a", "1"), ("c", "1"), ("e", "1")]);
    let b = VecIter::from_pairs(&[("b", "2"), ("d", "2"), ("f", "2")]);

    let mut iter = merged(vec![Box::new(a), Box::new(b)]);
    let forward = collect_forward(iter.as_mut());
    let mut backward = collect_backward(iter.as_mut());
    backward.reverse();
    assert_eq!(forward, backward);
    Ok(())
}

#[test]
fn equal_keys_break_ties_by_child_order() -> Result<()> {
    // Both children carry "k"; values name the source.
    let first = VecIter::from_pairs(&[("k", "first")]);
    let second = VecIter::from_pairs(&[("k", "second")]);
    let mut iter = merged(vec![Box::new(first), Box::new(second)]);

    // Forward: the earlier child wins the tie.
    iter.seek_to_first();
    expect_entry(iter.as_ref(), "k", "first");
    iter.next();
    expect_entry(iter.as_ref(), "k", "second");
    iter.next();
    assert!(!iter.valid());

    // Reverse: the later child comes first.
    iter.seek_to_last();
    expect_entry(iter.as_ref(), "k", "second");
    iter.prev();
    expect_entry(iter.as_ref(), "k", "first");
    iter.prev();
    assert!(!iter.valid());
    Ok(())
}

// -------------------- Direction flips --------------------

#[test]
fn interleaved_children_with_direction_flips() -> Result<()> {
    // A = [1, 3, 5] and B = [2, 3, 4]; values record the source.
    let a = VecIter::from_pairs(&[("1", "a"), ("3", "a"), ("5", "a")]);
    let b = VecIter::from_pairs(&[("2", "b"), ("3", "b"), ("4", "b")]);
    let mut iter = merged(vec![Box::new(a), Box::new(b)]);

    iter.seek_to_first();
    expect_entry(iter.as_ref(), "1", "a");
    iter.next();
    expect_entry(iter.as_ref(), "2", "b");
    iter.next();
    expect_entry(iter.as_ref(), "3", "a"); // stable tie-break: child A first
    iter.next();
    expect_entry(iter.as_ref(), "3", "b");
    iter.next();
    expect_entry(iter.as_ref(), "4", "b");

    // Flip to reverse: replay the same keys backwards.
    iter.prev();
    expect_entry(iter.as_ref(), "3", "b");
    iter.prev();
    expect_entry(iter.as_ref(), "3", "a");
    iter.prev();
    expect_entry(iter.as_ref(), "2", "b");
    iter.prev();
    expect_entry(iter.as_ref(), "1", "a");
    iter.prev();
    assert!(!iter.valid());
    Ok(())
}

#[test]
fn flip_forward_again_after_reverse() -> Result<()> {
    let a = VecIter::from_pairs(&[("1", "a"), ("3", "a"), ("5", "a")]);
    let b = VecIter::from_pairs(&[("2", "b"), ("4", "b"), ("6", "b")]);
    let mut iter = merged(vec![Box::new(a), Box::new(b)]);

    iter.seek(b"3");
    expect_entry(iter.as_ref(), "3", "a");
    iter.prev();
    expect_entry(iter.as_ref(), "2", "b");
    iter.next();
    expect_entry(iter.as_ref(), "3", "a");
    iter.next();
    expect_entry(iter.as_ref(), "4", "b");
    iter.prev();
    expect_entry(iter.as_ref(), "3", "a");
    Ok(())
}

#[test]
fn prev_from_seek_when_some_children_are_past_the_end() -> Result<()> {
    // Seeking lands child B past its last entry; Prev must pull it back
    // via seek_to_last.
    let a = VecIter::from_pairs(&[("m", "a"), ("z", "a")]);
    let b = VecIter::from_pairs(&[("b", "b"), ("c", "b")]);
    let mut iter = merged(vec![Box::new(a), Box::new(b)]);

    iter.seek(b"x");
    expect_entry(iter.as_ref(), "z", "a");
    iter.prev();
    expect_entry(iter.as_ref(), "m", "a");
    iter.prev();
    expect_entry(iter.as_ref(), "c", "b");
    iter.prev();
    expect_entry(iter.as_ref(), "b", "b");
    iter.prev();
    assert!(!iter.valid());
    Ok(())
}

// -------------------- Seek --------------------

#[test]
fn seek_positions_all_children() -> Result<()> {
    let a = VecIter::from_pairs(&[("a", "1"), ("d", "1"), ("g", "1")]);
    let b = VecIter::from_pairs(&[("b", "2"), ("e", "2"), ("h", "2")]);
    let mut iter = merged(vec![Box::new(a), Box::new(b)]);

    iter.seek(b"d");
    expect_entry(iter.as_ref(), "d", "1");
    iter.seek(b"dd");
    expect_entry(iter.as_ref(), "e", "2");
    iter.seek(b"zzz");
    assert!(!iter.valid());
    Ok(())
}

// -------------------- Status --------------------

#[test]
fn child_errors_surface_in_status() {
    let healthy = VecIter::from_pairs(&[("a", "1")]);
    let failing = VecIter::new(Vec::new()).with_status(Error::corruption("bad child"));
    let mut iter = merged(vec![Box::new(healthy), Box::new(failing)]);

    iter.seek_to_first();
    // The healthy child still yields its entry.
    expect_entry(iter.as_ref(), "a", "1");
    // But the failure is never hidden.
    let err = iter.status().unwrap_err();
    assert!(err.is_corruption(), "got {err}");
}

// -------------------- Over real tables --------------------

#[test]
fn merging_table_iterators_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let options = Options {
        block_size: 64,
        ..Default::default()
    };

    // Two tables with interleaved key ranges, one with overlapping keys.
    let even: Vec<(Vec<u8>, Vec<u8>)> = (0..100)
        .map(|i| {
            (
                format!("key{:04}", 2 * i).into_bytes(),
                b"even".to_vec(),
            )
        })
        .collect();
    let odd: Vec<(Vec<u8>, Vec<u8>)> = (0..100)
        .map(|i| {
            (
                format!("key{:04}", 2 * i + 1).into_bytes(),
                b"odd".to_vec(),
            )
        })
        .collect();

    let even_path = dir.path().join("even.ldb");
    let odd_path = dir.path().join("odd.ldb");
    let even_size = build_table_file(&even_path, &options, &even)?;
    let odd_size = build_table_file(&odd_path, &options, &odd)?;

    let even_table = super::helpers::open_table(&even_path, &options, even_size)?;
    let odd_table = super::helpers::open_table(&odd_path, &options, odd_size)?;

    let children: Vec<Box<dyn Iter>> = vec![
        Box::new(Table::new_iter(&even_table, ReadOptions::default())),
        Box::new(Table::new_iter(&odd_table, ReadOptions::default())),
    ];
    let mut iter = new_merging_iterator(options.comparator.clone(), children);

    let all = collect_forward(iter.as_mut());
    assert_eq!(all.len(), 200);
    assert!(all.windows(2).all(|w| w[0].0 < w[1].0), "globally sorted");
    assert_eq!(all[0].0, b"key0000");
    assert_eq!(all[199].0, b"key0199");

    // Walk backwards across table boundaries too.
    let mut reversed = collect_backward(iter.as_mut());
    reversed.reverse();
    assert_eq!(all, reversed);
    iter.status()?;
    Ok(())
}
