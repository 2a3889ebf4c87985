use alloc::string::ToString;

use crate::common::{DbfsError, DbfsResult};

/// Capacity of freshly allocated blocks unless the config says otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = if cfg!(feature = "sli512") {
    512
} else if cfg!(feature = "sli1k") {
    1024
} else if cfg!(feature = "sli4k") {
    4096
} else if cfg!(feature = "sli8k") {
    8192
} else {
    8192 * 2 * 2
};

pub const DEFAULT_LIST_LIMIT: usize = 10_000;

/// Configuration for a column-backed filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfsConfig {
    /// Capacity of new blocks (default: `DEFAULT_BLOCK_SIZE`)
    pub block_size: usize,

    /// Maximum row keys requested when listing files (default: 10 000)
    pub list_limit: usize,

    /// Guard every block batch with the last persisted descriptor (default: false)
    pub conditional_writes: bool,
}

impl Default for DbfsConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            list_limit: DEFAULT_LIST_LIMIT,
            conditional_writes: false,
        }
    }
}

impl DbfsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity of new blocks
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the listing scan limit
    pub fn list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }

    /// Enable guarded block writes
    pub fn conditional_writes(mut self, enabled: bool) -> Self {
        self.conditional_writes = enabled;
        self
    }

    pub fn validate(&self) -> DbfsResult<()> {
        if self.block_size == 0 {
            return Err(DbfsError::InvalidArgument(
                "block size must be positive".to_string(),
            ));
        }
        if self.list_limit == 0 {
            return Err(DbfsError::InvalidArgument(
                "list limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
