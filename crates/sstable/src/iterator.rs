//! The iterator contract shared by blocks, tables, and merges.

use crate::error::{Error, Result};

/// A repositionable cursor over sorted `(key, value)` pairs.
///
/// An iterator is either positioned at an entry (`valid()`) or not; `key`
/// and `value` may only be called while valid. Errors encountered while
/// moving do not panic and do not stop later repositioning: the iterator
/// becomes invalid and `status()` reports the first failure.
pub trait Iter: Send {
    fn valid(&self) -> bool;

    /// Positions at the first entry, if any.
    fn seek_to_first(&mut self);

    /// Positions at the last entry, if any.
    fn seek_to_last(&mut self);

    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Moves to the next entry; becomes invalid after the last.
    fn next(&mut self);

    /// Moves to the previous entry; becomes invalid before the first.
    fn prev(&mut self);

    /// Current key. Only meaningful while `valid()`.
    fn key(&self) -> &[u8];

    /// Current value. Only meaningful while `valid()`.
    fn value(&self) -> &[u8];

    /// `Ok` if no error has occurred, otherwise the first error.
    fn status(&self) -> Result<()>;

    /// Registers a hook run when the iterator drops. Hooks run in reverse
    /// registration order; callers use this to tie resource lifetimes
    /// (cache pins, open handles) to the iterator.
    fn register_cleanup(&mut self, cleanup: Box<dyn FnOnce() + Send>);
}

/// Drop-time hooks, run last-registered first.
#[derive(Default)]
pub struct CleanupList {
    cleanups: Vec<Box<dyn FnOnce() + Send>>,
}

impl CleanupList {
    pub fn push(&mut self, cleanup: Box<dyn FnOnce() + Send>) {
        self.cleanups.push(cleanup);
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        while let Some(cleanup) = self.cleanups.pop() {
            cleanup();
        }
    }
}

/// An iterator over nothing, optionally carrying an error.
struct StatusIter {
    status: Option<Error>,
    cleanups: CleanupList,
}

impl Iter for StatusIter {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}

    fn key(&self) -> &[u8] {
        debug_assert!(false, "key() on an invalid iterator");
        &[]
    }

    fn value(&self) -> &[u8] {
        debug_assert!(false, "value() on an invalid iterator");
        &[]
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

/// An empty iterator with an `Ok` status.
pub fn empty_iterator() -> Box<dyn Iter> {
    Box::new(StatusIter {
        status: None,
        cleanups: CleanupList::default(),
    })
}

/// An empty iterator whose `status()` reports `err`. Returned where an
/// iterator is owed to the caller but constructing the real one failed.
pub fn error_iterator(err: Error) -> Box<dyn Iter> {
    Box::new(StatusIter {
        status: Some(err),
        cleanups: CleanupList::default(),
    })
}
