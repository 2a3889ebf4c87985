//! Translates block sets into row/column traffic.

use alloc::{
    collections::{BTreeMap, BTreeSet},
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use log::debug;

use crate::{
    block::{self, FileDescriptor, DESCRIPTOR_COLUMN},
    common::{DbfsError, DbfsResult},
    directory::DbfsContext,
    store::{ColumnBatch, ColumnStore},
};

pub struct BlockMapper<S: ColumnStore> {
    ctx: Arc<DbfsContext<S>>,
}

impl<S: ColumnStore> Clone for BlockMapper<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: ColumnStore> BlockMapper<S> {
    pub fn new(ctx: Arc<DbfsContext<S>>) -> Self {
        Self { ctx }
    }

    /// Deliver `blocks` and the serialized descriptor in one row mutation.
    /// Returns the descriptor bytes that were stored.
    pub fn write_blocks(
        &self,
        descriptor: &FileDescriptor,
        blocks: ColumnBatch,
    ) -> DbfsResult<Vec<u8>> {
        let (columns, bytes, size) = self.batch(descriptor, blocks)?;
        debug!(
            "write {} columns ({} bytes) to {}",
            columns.len(),
            size,
            descriptor.name
        );
        self.ctx.store().set_columns(&descriptor.name, columns)?;
        self.ctx.stats().record_write(size);
        Ok(bytes)
    }

    /// Like `write_blocks`, but only lands if the stored descriptor still
    /// equals `expected`.
    pub fn write_blocks_guarded(
        &self,
        descriptor: &FileDescriptor,
        blocks: ColumnBatch,
        expected: &[u8],
    ) -> DbfsResult<Vec<u8>> {
        let (columns, bytes, size) = self.batch(descriptor, blocks)?;
        debug!(
            "guarded write of {} columns ({} bytes) to {}",
            columns.len(),
            size,
            descriptor.name
        );
        let applied = self.ctx.store().set_columns_if(
            &descriptor.name,
            DESCRIPTOR_COLUMN,
            Some(expected),
            columns,
        )?;
        if !applied {
            return Err(DbfsError::Conflict(descriptor.name.clone()));
        }
        self.ctx.stats().record_write(size);
        Ok(bytes)
    }

    /// One multi-column read. `names` is already distinct and byte-ordered.
    pub fn read_blocks(
        &self,
        descriptor: &FileDescriptor,
        names: &BTreeSet<String>,
    ) -> DbfsResult<BTreeMap<String, Vec<u8>>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        debug!("read {} blocks from {}", names.len(), descriptor.name);
        let values = self.ctx.store().get_columns(&descriptor.name, names)?;
        self.ctx
            .stats()
            .record_read(values.values().map(|v| v.len()).sum());
        Ok(values)
    }

    /// Tombstone block columns. With `only_listed` the chain's columns go;
    /// otherwise every column of the row except the descriptor.
    /// Returns how many columns were tombstoned.
    pub fn delete_blocks(&self, descriptor: &FileDescriptor, only_listed: bool) -> DbfsResult<usize> {
        let columns = self.sweep_batch(descriptor, only_listed)?;
        // an empty batch would drop the whole row
        if columns.is_empty() {
            return Ok(0);
        }
        let count = columns.len();
        debug!("tombstone {} blocks of {}", count, descriptor.name);
        self.ctx.store().set_columns(&descriptor.name, columns)?;
        self.ctx.stats().record_write(0);
        Ok(count)
    }

    /// The tombstones `delete_blocks` would write, without writing them.
    pub fn sweep_batch(
        &self,
        descriptor: &FileDescriptor,
        only_listed: bool,
    ) -> DbfsResult<ColumnBatch> {
        let names: BTreeSet<String> = if only_listed {
            descriptor.blocks.iter().map(|b| b.name.clone()).collect()
        } else {
            let names = self.ctx.store().column_names(&descriptor.name)?;
            self.ctx.stats().record_read(0);
            names
                .into_iter()
                .filter(|c| c != DESCRIPTOR_COLUMN)
                .collect()
        };
        Ok(names.into_iter().map(|n| (n, None)).collect())
    }

    fn batch(
        &self,
        descriptor: &FileDescriptor,
        mut blocks: ColumnBatch,
    ) -> DbfsResult<(ColumnBatch, Vec<u8>, usize)> {
        if blocks.contains_key(DESCRIPTOR_COLUMN) {
            return Err(DbfsError::InvalidArgument(format!(
                "block batch for {} uses the reserved descriptor column",
                descriptor.name
            )));
        }
        let bytes = block::serialize(descriptor)?;
        let size = bytes.len()
            + blocks
                .values()
                .map(|v| v.as_ref().map(|b| b.len()).unwrap_or(0))
                .sum::<usize>();
        blocks.insert(DESCRIPTOR_COLUMN.to_string(), Some(bytes.clone()));
        Ok((blocks, bytes, size))
    }
}
