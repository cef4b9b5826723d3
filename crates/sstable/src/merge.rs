//! K-way merge of sorted iterators into one globally sorted stream.
//!
//! The merge is direction-aware. While moving forward, every non-current
//! child sits strictly *after* the exposed key; while moving backward,
//! strictly *before* it. That invariant is what makes a step O(N): only a
//! direction flip has to reposition the other children, and each step just
//! rescans for the new extremum. Child counts are small (one iterator per
//! live table in a read), so no heap is kept.
//!
//! When children expose equal keys the merge is stable: forward traversal
//! prefers the earliest child, reverse traversal the latest, mirroring
//! which entry each direction reaches first.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::{empty_iterator, CleanupList, Iter};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges `children` into a single sorted iterator sharing `comparator`.
///
/// Zero children yield an empty iterator and a single child is returned
/// unwrapped.
pub fn new_merging_iterator(
    comparator: Arc<dyn Comparator>,
    mut children: Vec<Box<dyn Iter>>,
) -> Box<dyn Iter> {
    match children.len() {
        0 => empty_iterator(),
        1 => children.remove(0),
        _ => Box::new(MergingIterator {
            comparator,
            children,
            current: None,
            direction: Direction::Forward,
            cleanups: CleanupList::default(),
        }),
    }
}

struct MergingIterator {
    comparator: Arc<dyn Comparator>,
    children: Vec<Box<dyn Iter>>,
    /// Index of the child whose entry is exposed; `None` when invalid.
    current: Option<usize>,
    direction: Direction,
    cleanups: CleanupList,
}

impl MergingIterator {
    /// Exposes the valid child with the smallest key, breaking ties toward
    /// the earliest child.
    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for i in 0..self.children.len() {
            if !self.children[i].valid() {
                continue;
            }
            smallest = match smallest {
                None => Some(i),
                Some(s) => {
                    let cmp = self
                        .comparator
                        .compare(self.children[i].key(), self.children[s].key());
                    if cmp == Ordering::Less {
                        Some(i)
                    } else {
                        Some(s)
                    }
                }
            };
        }
        self.current = smallest;
    }

    /// Exposes the valid child with the largest key, breaking ties toward
    /// the latest child.
    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for i in (0..self.children.len()).rev() {
            if !self.children[i].valid() {
                continue;
            }
            largest = match largest {
                None => Some(i),
                Some(l) => {
                    let cmp = self
                        .comparator
                        .compare(self.children[i].key(), self.children[l].key());
                    if cmp == Ordering::Greater {
                        Some(i)
                    } else {
                        Some(l)
                    }
                }
            };
        }
        self.current = largest;
    }
}

impl Iter for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        let current = match self.current {
            Some(i) => i,
            None => return,
        };

        // After a reverse step the other children sit before key(); push
        // each to its first entry strictly after key() so the forward
        // invariant holds again.
        if self.direction != Direction::Forward {
            let key = self.children[current].key().to_vec();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                child.seek(&key);
                if child.valid() && self.comparator.compare(&key, child.key()) == Ordering::Equal
                {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let current = match self.current {
            Some(i) => i,
            None => return,
        };

        // Mirror of next(): park every other child strictly before key().
        if self.direction != Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                child.seek(&key);
                if child.valid() {
                    // Child sits at its first entry >= key(); one step back
                    // puts it strictly before.
                    child.prev();
                } else {
                    // No entries >= key(): its largest entry is before.
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }

    fn register_cleanup(&mut self, cleanup: Box<dyn FnOnce() + Send>) {
        self.cleanups.push(cleanup);
    }
}
