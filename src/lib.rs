//! Block-oriented files stored in a row/column key-value store.
//!
//! Each file is one row. Its bytes live in block columns (`BLOCK-<n>`) and
//! its metadata, including the ordered block chain, lives as a JSON record
//! in the reserved descriptor column. `BlockFile` maps seek/read/write onto
//! that chain; `BlockDirectory` adds the name-level operations an index
//! integration layer needs.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod block;
pub mod common;
pub mod config;
pub mod directory;
pub mod file;
pub mod lock;
pub mod mapper;
pub mod registry;
pub mod store;


pub use block::{block_name, BlockMeta, FileDescriptor, DESCRIPTOR_COLUMN};
#[cfg(feature = "std")]
pub use common::SystemClock;
pub use common::{Clock, DbfsError, DbfsResult, IoStatsSnapshot, ManualClock, OpenMode};
pub use config::{DbfsConfig, DEFAULT_BLOCK_SIZE};
pub use directory::{BlockDirectory, DbfsContext};
pub use file::{BlockFile, Cursor, RandomAccessFile, SharedBlockFile};
pub use lock::MarkerLock;
pub use mapper::BlockMapper;
pub use registry::DescriptorRegistry;
pub use store::{ColumnBatch, ColumnStore, MemStore};
