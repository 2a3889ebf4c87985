//! Block chain model and the descriptor record stored in each file's row.

use alloc::{format, string::String, vec::Vec};

use serde::{Deserialize, Serialize};

use crate::common::{DbfsError, DbfsResult};

/// Column holding the serialized descriptor. Never a block name.
pub const DESCRIPTOR_COLUMN: &str = "FILE-DESCRIPTOR";

pub const BLOCK_PREFIX: &str = "BLOCK-";

pub fn block_name(number: u64) -> String {
    format!("{}{}", BLOCK_PREFIX, number)
}

/// One chain entry: a byte range inside one block column.
///
/// Several entries may share a column after a block is split into
/// fragments; they then carry the same `number` and `name`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    #[serde(rename = "columnName")]
    pub name: String,
    #[serde(rename = "blockNumber")]
    pub number: u64,
    #[serde(rename = "blockSize")]
    pub capacity: usize,
    /// Offset of the first valid byte inside the column value.
    pub data_offset: usize,
    pub data_length: usize,
}

impl BlockMeta {
    pub fn new(number: u64, capacity: usize, data_length: usize) -> Self {
        Self {
            name: block_name(number),
            number,
            capacity,
            data_offset: 0,
            data_length,
        }
    }

    /// Column offset one past the last valid byte.
    pub fn data_end(&self) -> usize {
        self.data_offset + self.data_length
    }

    /// Cut this entry at `at` bytes: `self` keeps the prefix, the suffix is returned.
    pub fn split_off(&mut self, at: usize) -> BlockMeta {
        debug_assert!(at > 0 && at < self.data_length);
        let mut tail = self.clone();
        tail.data_offset += at;
        tail.data_length -= at;
        self.data_length = at;
        tail
    }
}

/// Persisted metadata of one file (one row).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub length: u64,
    /// Capacity for new blocks; comes from configuration, not from the record.
    #[serde(skip)]
    pub block_size: usize,
    pub last_modified: u64,
    pub last_accessed: u64,
    pub deleted: bool,
    /// Bumped on every persisted mutation.
    #[serde(default)]
    pub generation: u64,
    /// High-water mark so block numbers are never handed out twice.
    #[serde(default)]
    pub next_block_number: u64,
    /// Chain order is byte order.
    pub blocks: Vec<BlockMeta>,
}

impl FileDescriptor {
    pub fn new(name: &str, block_size: usize, now: u64) -> Self {
        Self {
            name: String::from(name),
            length: 0,
            block_size,
            last_modified: now,
            last_accessed: now,
            deleted: false,
            generation: 0,
            next_block_number: 0,
            blocks: Vec::new(),
        }
    }

    pub fn allocate_block(&mut self, data_length: usize) -> BlockMeta {
        let after_existing = self
            .blocks
            .iter()
            .map(|b| b.number + 1)
            .max()
            .unwrap_or(0);
        let number = self.next_block_number.max(after_existing);
        self.next_block_number = number + 1;
        BlockMeta::new(number, self.block_size, data_length)
    }

    /// Number of chain entries backed by `number`'s column.
    pub fn column_users(&self, number: u64) -> usize {
        self.blocks.iter().filter(|b| b.number == number).count()
    }

    pub fn references(&self, name: &str) -> bool {
        self.blocks.iter().any(|b| b.name == name)
    }

    pub fn chain_length(&self) -> u64 {
        self.blocks.iter().map(|b| b.data_length as u64).sum()
    }

    pub fn touch(&mut self, now: u64) {
        self.last_modified = now;
        self.last_accessed = now;
        self.generation += 1;
    }
}

pub fn serialize(descriptor: &FileDescriptor) -> DbfsResult<Vec<u8>> {
    serde_json::to_vec(descriptor).map_err(DbfsError::from)
}

/// Decode a descriptor column. Absent bytes and deleted files both decode to
/// `None`; undecodable bytes are an error.
pub fn deserialize(bytes: Option<&[u8]>, block_size: usize) -> DbfsResult<Option<FileDescriptor>> {
    Ok(decode_record(bytes, block_size)?.filter(|d| !d.deleted))
}

/// Like `deserialize`, but deleted records are returned as stored.
pub fn decode_record(
    bytes: Option<&[u8]>,
    block_size: usize,
) -> DbfsResult<Option<FileDescriptor>> {
    let bytes = match bytes {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    let mut descriptor: FileDescriptor = serde_json::from_slice(bytes)
        .map_err(|e| DbfsError::Corruption(format!("descriptor: {}", e)))?;
    if descriptor.blocks.iter().any(|b| b.name == DESCRIPTOR_COLUMN) {
        return Err(DbfsError::Corruption(format!(
            "{}: block uses the reserved descriptor column",
            descriptor.name
        )));
    }
    descriptor.block_size = block_size;
    Ok(Some(descriptor))
}
