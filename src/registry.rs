//! Descriptor CRUD and file-name enumeration.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use log::{debug, info, warn};

use crate::{
    block::{self, FileDescriptor, DESCRIPTOR_COLUMN},
    common::DbfsResult,
    directory::DbfsContext,
    store::ColumnStore,
};

pub struct DescriptorRegistry<S: ColumnStore> {
    ctx: Arc<DbfsContext<S>>,
}

impl<S: ColumnStore> Clone for DescriptorRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: ColumnStore> DescriptorRegistry<S> {
    pub fn new(ctx: Arc<DbfsContext<S>>) -> Self {
        Self { ctx }
    }

    /// Names of every live file, bounded by the configured list limit.
    pub fn list_file_names(&self) -> DbfsResult<Vec<String>> {
        let limit = self.ctx.config().list_limit;
        let rows = self
            .ctx
            .store()
            .list_row_keys_having_column(DESCRIPTOR_COLUMN, limit)?;
        self.ctx.stats().record_read(0);
        if rows.len() >= limit {
            warn!("file listing hit the scan limit of {} rows", limit);
        }
        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            if self.get_descriptor(&row)?.is_some() {
                names.push(row);
            }
        }
        Ok(names)
    }

    pub fn get_descriptor(&self, name: &str) -> DbfsResult<Option<FileDescriptor>> {
        Ok(self.get_record(name)?.filter(|d| !d.deleted))
    }

    /// A live descriptor, or a fresh one persisted in its place. A deleted
    /// record hands its block-number high-water mark to the new file.
    pub fn get_or_create_descriptor(&self, name: &str) -> DbfsResult<FileDescriptor> {
        let descriptor = match self.get_record(name)? {
            Some(descriptor) if !descriptor.deleted => return Ok(descriptor),
            Some(deleted) => self.emptied(&deleted),
            None => self.empty_descriptor(name),
        };
        self.put_descriptor(&descriptor)?;
        info!(
            "created file {} (blocks from {})",
            name, descriptor.next_block_number
        );
        Ok(descriptor)
    }

    /// Full replace of the descriptor column; last writer wins.
    pub fn put_descriptor(&self, descriptor: &FileDescriptor) -> DbfsResult<()> {
        let bytes = block::serialize(descriptor)?;
        debug!(
            "put descriptor {} ({} blocks, generation {})",
            descriptor.name,
            descriptor.blocks.len(),
            descriptor.generation
        );
        self.ctx.stats().record_write(bytes.len());
        let mut columns = BTreeMap::new();
        columns.insert(DESCRIPTOR_COLUMN.to_string(), Some(bytes));
        self.ctx.store().set_columns(&descriptor.name, columns)
    }

    /// Replace the descriptor with an empty one, keeping the block-number
    /// high-water mark and advancing the generation.
    pub fn reset_descriptor(&self, name: &str) -> DbfsResult<FileDescriptor> {
        let descriptor = match self.get_record(name)? {
            Some(old) => self.emptied(&old),
            None => self.empty_descriptor(name),
        };
        self.put_descriptor(&descriptor)?;
        info!("reset file {}", name);
        Ok(descriptor)
    }

    /// Empty successor of `old`. Nothing is stored.
    pub fn emptied(&self, old: &FileDescriptor) -> FileDescriptor {
        let mut descriptor = self.empty_descriptor(&old.name);
        descriptor.next_block_number = old
            .blocks
            .iter()
            .map(|b| b.number + 1)
            .max()
            .unwrap_or(0)
            .max(old.next_block_number);
        descriptor.generation = old.generation + 1;
        descriptor
    }

    /// Persist a deleted-flagged copy of `descriptor` and return it. The
    /// record stays in the row but reads as absent from then on.
    pub fn mark_deleted(&self, descriptor: &FileDescriptor) -> DbfsResult<FileDescriptor> {
        let mut flagged = descriptor.clone();
        flagged.deleted = true;
        flagged.touch(self.ctx.now());
        self.put_descriptor(&flagged)?;
        info!("deleted file {}", flagged.name);
        Ok(flagged)
    }

    fn get_record(&self, name: &str) -> DbfsResult<Option<FileDescriptor>> {
        let bytes = self.ctx.store().get_column(name, DESCRIPTOR_COLUMN)?;
        self.ctx
            .stats()
            .record_read(bytes.as_ref().map(|b| b.len()).unwrap_or(0));
        block::decode_record(bytes.as_deref(), self.ctx.config().block_size)
    }

    fn empty_descriptor(&self, name: &str) -> FileDescriptor {
        FileDescriptor::new(name, self.ctx.config().block_size, self.ctx.now())
    }
}
