//! Random-access files on top of the block chain.
//!
//! `BlockFile` is the single engine: it owns one descriptor and one cursor
//! and is not meant to be shared between threads. `SharedBlockFile` puts a
//! per-handle lock around it and is what the `RandomAccessFile` interface
//! hands out.
//!
//! Writes overwrite in place. A write that starts inside a block splits it
//! into a prefix fragment and a remainder; bytes the write covers are
//! removed from the chain (whole entries) or trimmed off the front of the
//! entry where the write ends, which leaves the suffix fragment. Fragments
//! keep pointing at the column of the block they were cut from, so no bytes
//! are rewritten to preserve them. Columns no longer referenced by any
//! entry are tombstoned in the same row mutation that lands the write.

use alloc::{
    collections::BTreeSet,
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use log::{debug, error, info};
use spin::Mutex;

use crate::{
    block::{self, FileDescriptor},
    common::{DbfsError, DbfsResult, OpenMode},
    directory::DbfsContext,
    mapper::BlockMapper,
    registry::DescriptorRegistry,
    store::{ColumnBatch, ColumnStore},
};

/// Read/write position inside the chain.
///
/// Either `index < chain length` and `position < blocks[index].data_length`,
/// or `index == chain length` and `position == 0` (end of file).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub index: usize,
    pub position: usize,
    /// File offset of the first byte of `blocks[index]`.
    pub block_offset: u64,
}

impl Cursor {
    pub fn offset(&self) -> u64 {
        self.block_offset + self.position as u64
    }
}

pub struct BlockFile<S: ColumnStore> {
    ctx: Arc<DbfsContext<S>>,
    registry: DescriptorRegistry<S>,
    mapper: BlockMapper<S>,
    mode: OpenMode,
    descriptor: FileDescriptor,
    cursor: Cursor,
    /// Descriptor bytes as last stored; the guard for conditional writes.
    persisted: Vec<u8>,
    closed: bool,
}

impl<S: ColumnStore> BlockFile<S> {
    /// Open `name`. Write modes create a missing file, read-only mode
    /// reports it as `NotFound`.
    pub fn open(ctx: Arc<DbfsContext<S>>, name: &str, mode: OpenMode) -> DbfsResult<Self> {
        if name.is_empty() {
            return Err(DbfsError::InvalidArgument("empty file name".to_string()));
        }
        if !mode.intersects(OpenMode::READ_WRITE) {
            return Err(DbfsError::InvalidArgument(format!(
                "open mode {:?} neither reads nor writes",
                mode
            )));
        }
        let registry = DescriptorRegistry::new(ctx.clone());
        let mapper = BlockMapper::new(ctx.clone());
        let descriptor = if mode.writable() {
            registry.get_or_create_descriptor(name)?
        } else {
            registry
                .get_descriptor(name)?
                .ok_or_else(|| DbfsError::NotFound(name.to_string()))?
        };
        let persisted = block::serialize(&descriptor)?;
        let mut file = Self {
            ctx,
            registry,
            mapper,
            mode,
            descriptor,
            cursor: Cursor::default(),
            persisted,
            closed: false,
        };
        if mode.writable() && mode.contains(OpenMode::TRUNCATE) {
            file.truncate_to_zero()?;
        }
        debug!(
            "opened {} ({:?}, {} bytes, {} blocks)",
            name,
            mode,
            file.descriptor.length,
            file.descriptor.blocks.len()
        );
        Ok(file)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn length(&self) -> u64 {
        self.descriptor.length
    }

    pub fn position(&self) -> u64 {
        self.cursor.offset()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn at_eof(&self) -> bool {
        self.cursor.index >= self.descriptor.blocks.len()
    }

    /// Move the cursor to `pos`. `pos == length` is end of file; anything
    /// beyond is rejected since gaps are never materialized.
    pub fn seek(&mut self, pos: u64) -> DbfsResult<()> {
        self.ensure_open()?;
        if pos > self.descriptor.length {
            return Err(DbfsError::InvalidArgument(format!(
                "seek to {} past end of {} ({} bytes)",
                pos, self.descriptor.name, self.descriptor.length
            )));
        }
        let mut blocks_size = 0u64;
        for (index, block) in self.descriptor.blocks.iter().enumerate() {
            blocks_size += block.data_length as u64;
            if pos < blocks_size {
                let block_offset = blocks_size - block.data_length as u64;
                self.cursor = Cursor {
                    index,
                    position: (pos - block_offset) as usize,
                    block_offset,
                };
                return Ok(());
            }
        }
        self.cursor = Cursor {
            index: self.descriptor.blocks.len(),
            position: 0,
            block_offset: blocks_size,
        };
        Ok(())
    }

    /// Read up to `len` bytes into `buf[off..]`. Returns 0 at end of file and
    /// fewer than `len` only when end of file is reached.
    pub fn read(&mut self, buf: &mut [u8], off: usize, len: usize) -> DbfsResult<usize> {
        self.ensure_open()?;
        check_bounds(buf.len(), off, len)?;
        if len == 0 || self.at_eof() {
            return Ok(0);
        }

        let start = self.cursor.index;
        let blocks = &self.descriptor.blocks;
        let mut end = start;
        let mut available = 0;
        while end < blocks.len() && available < len {
            let skip = if end == start { self.cursor.position } else { 0 };
            available += blocks[end].data_length - skip;
            end += 1;
        }
        let names: BTreeSet<String> = blocks[start..end].iter().map(|b| b.name.clone()).collect();
        let values = self.mapper.read_blocks(&self.descriptor, &names)?;

        let mut total = 0;
        let mut skip = self.cursor.position;
        for block in &self.descriptor.blocks[start..end] {
            let n = (block.data_length - skip).min(len - total);
            let value = values.get(&block.name).ok_or_else(|| {
                DbfsError::Corruption(format!(
                    "{}: block {} is missing from the store",
                    self.descriptor.name, block.name
                ))
            })?;
            let from = block.data_offset + skip;
            let bytes = value.get(from..from + n).ok_or_else(|| {
                DbfsError::Corruption(format!(
                    "{}: block {} holds {} bytes, chain expects {}",
                    self.descriptor.name,
                    block.name,
                    value.len(),
                    block.data_end()
                ))
            })?;
            buf[off + total..off + total + n].copy_from_slice(bytes);
            total += n;
            skip = 0;
        }

        self.advance(total);
        if total < len && !self.at_eof() {
            return Err(DbfsError::ShortRead {
                name: self.descriptor.name.clone(),
                expected: len,
                actual: total,
            });
        }
        Ok(total)
    }

    /// Overwrite `len` bytes at the cursor with `buf[off..off + len]`,
    /// extending the file when the write runs past its end.
    pub fn write(&mut self, buf: &[u8], off: usize, len: usize) -> DbfsResult<()> {
        self.ensure_open()?;
        check_bounds(buf.len(), off, len)?;
        self.ensure_writable()?;
        if len == 0 {
            return Ok(());
        }

        let saved = (self.descriptor.clone(), self.cursor);
        let (pending, added) = self.splice(&buf[off..off + len]);
        self.descriptor.length += added;
        self.descriptor.touch(self.ctx.now());

        match self.persist(&self.descriptor, pending) {
            Ok(bytes) => {
                self.persisted = bytes;
                Ok(())
            }
            Err(err) => {
                error!(
                    "write of {} bytes to {} failed, rolling back: {}",
                    len, self.descriptor.name, err
                );
                self.descriptor = saved.0;
                self.cursor = saved.1;
                Err(err)
            }
        }
    }

    /// Only truncation to zero and the current length are supported; other
    /// lengths need semantics for dropped or zero-filled ranges.
    pub fn set_length(&mut self, new_length: u64) -> DbfsResult<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        if new_length == self.descriptor.length {
            return Ok(());
        }
        if new_length == 0 {
            return self.truncate_to_zero();
        }
        Err(DbfsError::Unsupported(format!(
            "set length of {} from {} to {}",
            self.descriptor.name, self.descriptor.length, new_length
        )))
    }

    /// Mark the file deleted, sweep its block columns and close the handle.
    /// The handle stays usable if the deleted flag could not be stored.
    pub fn delete(&mut self) -> DbfsResult<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        self.descriptor = self.registry.mark_deleted(&self.descriptor)?;
        self.closed = true;
        self.mapper.delete_blocks(&self.descriptor, true)?;
        Ok(())
    }

    /// Every write is already persisted; closing only retires the handle.
    pub fn close(&mut self) -> DbfsResult<()> {
        if !self.closed {
            debug!("closed {}", self.descriptor.name);
            self.closed = true;
        }
        Ok(())
    }

    /// Tombstones and the emptied descriptor land in one row mutation; the
    /// handle changes only after it succeeds.
    fn truncate_to_zero(&mut self) -> DbfsResult<()> {
        let emptied = self.registry.emptied(&self.descriptor);
        let tombstones = self.mapper.sweep_batch(&self.descriptor, false)?;
        let swept = tombstones.len();
        self.persisted = self.persist(&emptied, tombstones)?;
        self.descriptor = emptied;
        self.cursor = Cursor::default();
        info!(
            "truncated {} to zero, {} block columns swept",
            self.descriptor.name, swept
        );
        Ok(())
    }

    fn persist(&self, descriptor: &FileDescriptor, pending: ColumnBatch) -> DbfsResult<Vec<u8>> {
        if self.ctx.config().conditional_writes {
            self.mapper
                .write_blocks_guarded(descriptor, pending, &self.persisted)
        } else {
            self.mapper.write_blocks(descriptor, pending)
        }
    }

    /// Lay `data` over the chain starting at the cursor. Returns the columns
    /// to store and how many bytes landed past the previous end of file.
    fn splice(&mut self, data: &[u8]) -> (ColumnBatch, u64) {
        let block_size = self.descriptor.block_size.max(1);
        let mut pending = ColumnBatch::new();
        let mut dropped = Vec::new();
        let mut added = 0u64;

        self.split_at_cursor();
        let mut index = self.cursor.index;
        let mut file_offset = self.cursor.block_offset;
        let mut written = 0;
        while written < data.len() {
            // stop at the next block-size boundary of the file
            let room = block_size - (file_offset % block_size as u64) as usize;
            let chunk = room.min(data.len() - written);

            let block = if self.can_grow_in_place(index, chunk) {
                let mut grown = self.descriptor.blocks[index].clone();
                grown.data_length = chunk;
                grown
            } else {
                self.descriptor.allocate_block(chunk)
            };
            added += self.supersede(index, chunk, &mut dropped) as u64;
            pending.insert(
                block.name.clone(),
                Some(data[written..written + chunk].to_vec()),
            );
            self.descriptor.blocks.insert(index, block);

            index += 1;
            file_offset += chunk as u64;
            written += chunk;
        }

        for name in dropped {
            if !self.descriptor.references(&name) && !pending.contains_key(&name) {
                pending.insert(name, None);
            }
        }
        self.cursor = Cursor {
            index,
            position: 0,
            block_offset: file_offset,
        };
        (pending, added)
    }

    /// Cut the current block at the cursor so the write starts on an entry
    /// boundary. The prefix keeps the bytes already in front of the cursor.
    fn split_at_cursor(&mut self) {
        let Cursor {
            index,
            position,
            block_offset,
        } = self.cursor;
        if position == 0 {
            return;
        }
        let tail = self.descriptor.blocks[index].split_off(position);
        self.descriptor.blocks.insert(index + 1, tail);
        self.cursor = Cursor {
            index: index + 1,
            position: 0,
            block_offset: block_offset + position as u64,
        };
    }

    /// A block may be rewritten under its own column when the write covers
    /// all of its data and more, fits its capacity, and no fragment shares
    /// the column.
    fn can_grow_in_place(&self, index: usize, chunk: usize) -> bool {
        match self.descriptor.blocks.get(index) {
            Some(b) => {
                b.data_offset == 0
                    && chunk > b.data_length
                    && chunk <= b.capacity
                    && self.descriptor.column_users(b.number) == 1
            }
            None => false,
        }
    }

    /// Drop or trim entries from `index` on until `len` bytes are covered.
    /// Returns the bytes that had nothing to cover, i.e. were appended.
    fn supersede(&mut self, index: usize, len: usize, dropped: &mut Vec<String>) -> usize {
        let mut remaining = len;
        while remaining > 0 && index < self.descriptor.blocks.len() {
            let block = &mut self.descriptor.blocks[index];
            if block.data_length <= remaining {
                remaining -= block.data_length;
                let removed = self.descriptor.blocks.remove(index);
                dropped.push(removed.name);
            } else {
                block.data_offset += remaining;
                block.data_length -= remaining;
                remaining = 0;
            }
        }
        remaining
    }

    fn advance(&mut self, mut n: usize) {
        let blocks = &self.descriptor.blocks;
        let cursor = &mut self.cursor;
        while n > 0 && cursor.index < blocks.len() {
            let data_length = blocks[cursor.index].data_length;
            let left = data_length - cursor.position;
            if n < left {
                cursor.position += n;
                return;
            }
            n -= left;
            cursor.block_offset += data_length as u64;
            cursor.index += 1;
            cursor.position = 0;
        }
    }

    fn ensure_open(&self) -> DbfsResult<()> {
        if self.closed {
            return Err(DbfsError::Closed(self.descriptor.name.clone()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> DbfsResult<()> {
        if !self.mode.writable() {
            return Err(DbfsError::ReadOnly(self.descriptor.name.clone()));
        }
        Ok(())
    }
}

fn check_bounds(buf_len: usize, off: usize, len: usize) -> DbfsResult<()> {
    match off.checked_add(len) {
        Some(end) if end <= buf_len => Ok(()),
        _ => Err(DbfsError::InvalidArgument(format!(
            "range {}+{} outside buffer of {} bytes",
            off, len, buf_len
        ))),
    }
}

/// File interface handed to index-integration layers.
pub trait RandomAccessFile: Send + Sync {
    fn name(&self) -> String;
    fn length(&self) -> u64;
    fn position(&self) -> u64;
    fn seek(&self, pos: u64) -> DbfsResult<()>;
    fn read(&self, buf: &mut [u8], off: usize, len: usize) -> DbfsResult<usize>;
    fn write(&self, buf: &[u8], off: usize, len: usize) -> DbfsResult<()>;
    fn set_length(&self, len: u64) -> DbfsResult<()>;
    fn close(&self) -> DbfsResult<()>;
}

/// A `BlockFile` behind a per-handle lock.
pub struct SharedBlockFile<S: ColumnStore> {
    inner: Mutex<BlockFile<S>>,
}

impl<S: ColumnStore> SharedBlockFile<S> {
    pub fn new(file: BlockFile<S>) -> Self {
        Self {
            inner: Mutex::new(file),
        }
    }

    pub fn into_inner(self) -> BlockFile<S> {
        self.inner.into_inner()
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut BlockFile<S>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<S: ColumnStore> RandomAccessFile for SharedBlockFile<S> {
    fn name(&self) -> String {
        self.inner.lock().name().to_string()
    }

    fn length(&self) -> u64 {
        self.inner.lock().length()
    }

    fn position(&self) -> u64 {
        self.inner.lock().position()
    }

    fn seek(&self, pos: u64) -> DbfsResult<()> {
        self.inner.lock().seek(pos)
    }

    fn read(&self, buf: &mut [u8], off: usize, len: usize) -> DbfsResult<usize> {
        self.inner.lock().read(buf, off, len)
    }

    fn write(&self, buf: &[u8], off: usize, len: usize) -> DbfsResult<()> {
        self.inner.lock().write(buf, off, len)
    }

    fn set_length(&self, len: u64) -> DbfsResult<()> {
        self.inner.lock().set_length(len)
    }

    fn close(&self) -> DbfsResult<()> {
        self.inner.lock().close()
    }
}
