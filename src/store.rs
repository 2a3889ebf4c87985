//! Row/column store contract the filesystem is built on.
//!
//! A file maps to one row; each block and the descriptor map to one column
//! of that row. Only single-row multi-column writes are assumed atomic.

use alloc::{
    collections::{BTreeMap, BTreeSet},
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use log::debug;
use spin::Mutex;

use crate::common::{DbfsError, DbfsResult};

/// Column mutations for one row. `None` deletes the column.
pub type ColumnBatch = BTreeMap<String, Option<Vec<u8>>>;

pub trait ColumnStore: Send + Sync {
    fn get_column(&self, row: &str, column: &str) -> DbfsResult<Option<Vec<u8>>>;

    /// Columns absent from the row are absent from the result.
    fn get_columns(
        &self,
        row: &str,
        columns: &BTreeSet<String>,
    ) -> DbfsResult<BTreeMap<String, Vec<u8>>>;

    /// Apply all mutations to `row` at once. An empty batch deletes the row.
    fn set_columns(&self, row: &str, columns: ColumnBatch) -> DbfsResult<()>;

    fn list_row_keys_having_column(&self, column: &str, limit: usize)
        -> DbfsResult<Vec<String>>;

    fn column_names(&self, row: &str) -> DbfsResult<Vec<String>>;

    /// Apply `columns` only if `guard` currently holds `expected`.
    ///
    /// Returns `Ok(false)` when the guard does not match. Stores without
    /// compare-and-set keep the default, which reports `Unsupported`.
    fn set_columns_if(
        &self,
        _row: &str,
        _guard: &str,
        _expected: Option<&[u8]>,
        _columns: ColumnBatch,
    ) -> DbfsResult<bool> {
        Err(DbfsError::Unsupported(
            "conditional column writes".to_string(),
        ))
    }
}

impl<T: ColumnStore + ?Sized> ColumnStore for Arc<T> {
    fn get_column(&self, row: &str, column: &str) -> DbfsResult<Option<Vec<u8>>> {
        (**self).get_column(row, column)
    }

    fn get_columns(
        &self,
        row: &str,
        columns: &BTreeSet<String>,
    ) -> DbfsResult<BTreeMap<String, Vec<u8>>> {
        (**self).get_columns(row, columns)
    }

    fn set_columns(&self, row: &str, columns: ColumnBatch) -> DbfsResult<()> {
        (**self).set_columns(row, columns)
    }

    fn list_row_keys_having_column(
        &self,
        column: &str,
        limit: usize,
    ) -> DbfsResult<Vec<String>> {
        (**self).list_row_keys_having_column(column, limit)
    }

    fn column_names(&self, row: &str) -> DbfsResult<Vec<String>> {
        (**self).column_names(row)
    }

    fn set_columns_if(
        &self,
        row: &str,
        guard: &str,
        expected: Option<&[u8]>,
        columns: ColumnBatch,
    ) -> DbfsResult<bool> {
        (**self).set_columns_if(row, guard, expected, columns)
    }
}

type Row = BTreeMap<String, Vec<u8>>;

/// In-memory column store with compare-and-set support.
#[derive(Debug, Default)]
pub struct MemStore {
    rows: Mutex<BTreeMap<String, Row>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    fn apply(rows: &mut BTreeMap<String, Row>, row: &str, columns: ColumnBatch) {
        if columns.is_empty() {
            rows.remove(row);
            return;
        }
        let entry = rows.entry(row.to_string()).or_default();
        for (column, value) in columns {
            match value {
                Some(bytes) => {
                    entry.insert(column, bytes);
                }
                None => {
                    entry.remove(&column);
                }
            }
        }
        if entry.is_empty() {
            rows.remove(row);
        }
    }
}

impl ColumnStore for MemStore {
    fn get_column(&self, row: &str, column: &str) -> DbfsResult<Option<Vec<u8>>> {
        let rows = self.rows.lock();
        Ok(rows.get(row).and_then(|r| r.get(column)).cloned())
    }

    fn get_columns(
        &self,
        row: &str,
        columns: &BTreeSet<String>,
    ) -> DbfsResult<BTreeMap<String, Vec<u8>>> {
        let rows = self.rows.lock();
        let mut found = BTreeMap::new();
        if let Some(r) = rows.get(row) {
            for column in columns {
                if let Some(value) = r.get(column) {
                    found.insert(column.clone(), value.clone());
                }
            }
        }
        Ok(found)
    }

    fn set_columns(&self, row: &str, columns: ColumnBatch) -> DbfsResult<()> {
        debug!("mem store: {} mutations on row {}", columns.len(), row);
        let mut rows = self.rows.lock();
        Self::apply(&mut rows, row, columns);
        Ok(())
    }

    fn list_row_keys_having_column(
        &self,
        column: &str,
        limit: usize,
    ) -> DbfsResult<Vec<String>> {
        let rows = self.rows.lock();
        Ok(rows
            .iter()
            .filter(|(_, r)| r.contains_key(column))
            .map(|(key, _)| key.clone())
            .take(limit)
            .collect())
    }

    fn column_names(&self, row: &str) -> DbfsResult<Vec<String>> {
        let rows = self.rows.lock();
        Ok(rows
            .get(row)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn set_columns_if(
        &self,
        row: &str,
        guard: &str,
        expected: Option<&[u8]>,
        columns: ColumnBatch,
    ) -> DbfsResult<bool> {
        let mut rows = self.rows.lock();
        let current = rows.get(row).and_then(|r| r.get(guard)).map(|v| v.as_slice());
        if current != expected {
            debug!("mem store: guard {} on row {} does not match", guard, row);
            return Ok(false);
        }
        Self::apply(&mut rows, row, columns);
        Ok(true)
    }
}
