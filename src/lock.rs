//! Advisory lock backed by a marker file.
//!
//! `obtain` is create-if-absent without an atomic check-and-create, so two
//! obtainers racing on the same name may both succeed.

use alloc::string::String;

use log::debug;

use crate::{common::DbfsResult, directory::BlockDirectory, store::ColumnStore};

pub struct MarkerLock<S: ColumnStore> {
    directory: BlockDirectory<S>,
    name: String,
}

impl<S: ColumnStore> MarkerLock<S> {
    pub fn new(directory: BlockDirectory<S>, name: &str) -> Self {
        Self {
            directory,
            name: String::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this call created the marker.
    pub fn obtain(&self) -> DbfsResult<bool> {
        let obtained = self.directory.create_new_file(&self.name)?;
        debug!("lock {} obtained: {}", self.name, obtained);
        Ok(obtained)
    }

    pub fn release(&self) -> DbfsResult<()> {
        self.directory.delete(&self.name)?;
        debug!("lock {} released", self.name);
        Ok(())
    }

    pub fn is_locked(&self) -> DbfsResult<bool> {
        self.directory.exists(&self.name)
    }
}
