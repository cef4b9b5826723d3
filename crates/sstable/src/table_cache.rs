//! A cache of open tables, keyed by file number.
//!
//! Opening a table means a file open plus footer, index, and filter block
//! reads, so the engine keeps recently used tables pinned in a shared
//! [`cache::Cache`] charged one unit per table. Capacity therefore caps
//! the number of simultaneously open table files directly.

use std::fs::File;
use std::path::{Path, PathBuf};

use cache::{Cache, Handle};

use crate::error::Result;
use crate::iterator::{error_iterator, Iter};
use crate::options::{Options, ReadOptions};
use crate::table::Table;

/// Current table file name: `<dbname>/<number, 6 digits>.ldb`.
fn table_file_name(dbname: &Path, file_number: u64) -> PathBuf {
    dbname.join(format!("{file_number:06}.ldb"))
}

/// Table file name written by older databases: same stem, `.sst`.
fn legacy_table_file_name(dbname: &Path, file_number: u64) -> PathBuf {
    dbname.join(format!("{file_number:06}.sst"))
}

/// Shared cache of open [`Table`]s for one database directory.
pub struct TableCache {
    dbname: PathBuf,
    options: Options,
    cache: Cache<Table>,
}

impl TableCache {
    /// Creates a cache holding at most `entries` open tables.
    pub fn new(dbname: impl Into<PathBuf>, options: Options, entries: usize) -> Self {
        Self {
            dbname: dbname.into(),
            options,
            cache: Cache::new(entries),
        }
    }

    /// Returns a pinned handle to the open table for `file_number`,
    /// opening and caching it on miss.
    ///
    /// Open failures are returned but never cached, so a transient error
    /// (or a file someone repairs) heals on the next call.
    fn find_table(&self, file_number: u64, file_size: u64) -> Result<Handle<Table>> {
        let key = file_number.to_le_bytes();
        if let Some(handle) = self.cache.lookup(&key) {
            return Ok(handle);
        }

        let file_name = table_file_name(&self.dbname, file_number);
        let file = match File::open(&file_name) {
            Ok(file) => file,
            Err(primary_err) => {
                let legacy_name = legacy_table_file_name(&self.dbname, file_number);
                match File::open(&legacy_name) {
                    Ok(file) => {
                        tracing::debug!(
                            file = %legacy_name.display(),
                            "opened table via legacy file name"
                        );
                        file
                    }
                    Err(_) => return Err(primary_err.into()),
                }
            }
        };

        let table = Table::open(self.options.clone(), file, file_size)?;
        Ok(self.cache.insert(&key, table, 1, None))
    }

    /// Point lookup in table `file_number`. On a hit, `found` runs once
    /// with the stored key and value.
    pub fn get(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        key: &[u8],
        found: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<()> {
        let handle = self.find_table(file_number, file_size)?;
        let result = handle.value().internal_get(options, key, found);
        drop(handle);
        result
    }

    /// An iterator over table `file_number`. The table stays pinned in the
    /// cache for as long as the iterator lives, so a long scan survives
    /// cache churn; open errors come back as the iterator's status.
    pub fn iter(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> Box<dyn Iter> {
        let handle = match self.find_table(file_number, file_size) {
            Ok(handle) => handle,
            Err(err) => return error_iterator(err),
        };
        let table = handle.value_arc();
        let mut iter = Table::new_iter(&table, *options);
        iter.register_cleanup(Box::new(move || drop(handle)));
        Box::new(iter)
    }

    /// Forgets the cached table for `file_number`; the next access
    /// reopens the file. Called when the file is replaced or deleted.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&file_number.to_le_bytes());
    }
}
