//! Directory-level glue for index integration layers.
//!
//! There are no real directories: a "directory" is a name prefix, so
//! `is_directory` is always true and listing filters on the prefix.

use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use log::info;

use crate::{
    block::FileDescriptor,
    common::{Clock, DbfsError, DbfsResult, IoStats, IoStatsSnapshot, OpenMode},
    config::DbfsConfig,
    file::{BlockFile, SharedBlockFile},
    lock::MarkerLock,
    mapper::BlockMapper,
    registry::DescriptorRegistry,
    store::ColumnStore,
};

/// Everything one filesystem instance shares between its registry, its
/// mapper and its open handles.
pub struct DbfsContext<S: ColumnStore> {
    store: S,
    config: DbfsConfig,
    clock: Arc<dyn Clock>,
    stats: IoStats,
}

impl<S: ColumnStore> DbfsContext<S> {
    pub fn new(store: S, config: DbfsConfig, clock: Arc<dyn Clock>) -> DbfsResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            store,
            config,
            clock,
            stats: IoStats::default(),
        }))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DbfsConfig {
        &self.config
    }

    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }
}

pub struct BlockDirectory<S: ColumnStore> {
    ctx: Arc<DbfsContext<S>>,
    registry: DescriptorRegistry<S>,
    mapper: BlockMapper<S>,
}

impl<S: ColumnStore> Clone for BlockDirectory<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            registry: self.registry.clone(),
            mapper: self.mapper.clone(),
        }
    }
}

impl<S: ColumnStore> BlockDirectory<S> {
    /// Directory stamped with wall-clock time.
    #[cfg(feature = "std")]
    pub fn new(store: S, config: DbfsConfig) -> DbfsResult<Self> {
        Self::with_clock(store, config, Arc::new(crate::common::SystemClock))
    }

    pub fn with_clock(store: S, config: DbfsConfig, clock: Arc<dyn Clock>) -> DbfsResult<Self> {
        let ctx = DbfsContext::new(store, config, clock)?;
        Ok(Self {
            registry: DescriptorRegistry::new(ctx.clone()),
            mapper: BlockMapper::new(ctx.clone()),
            ctx,
        })
    }

    pub fn context(&self) -> &Arc<DbfsContext<S>> {
        &self.ctx
    }

    pub fn registry(&self) -> &DescriptorRegistry<S> {
        &self.registry
    }

    pub fn stats(&self) -> IoStatsSnapshot {
        self.ctx.stats().snapshot()
    }

    pub fn open(&self, name: &str, mode: OpenMode) -> DbfsResult<BlockFile<S>> {
        BlockFile::open(self.ctx.clone(), name, mode)
    }

    pub fn open_shared(&self, name: &str, mode: OpenMode) -> DbfsResult<SharedBlockFile<S>> {
        self.open(name, mode).map(SharedBlockFile::new)
    }

    pub fn exists(&self, name: &str) -> DbfsResult<bool> {
        Ok(self.registry.get_descriptor(name)?.is_some())
    }

    pub fn is_directory(&self, _name: &str) -> bool {
        true
    }

    pub fn list_all(&self) -> DbfsResult<Vec<String>> {
        self.registry.list_file_names()
    }

    /// Files whose name starts with `prefix`.
    pub fn list(&self, prefix: &str) -> DbfsResult<Vec<String>> {
        Ok(self
            .registry
            .list_file_names()?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    /// Create an empty file. Returns false if it already existed. Two callers
    /// racing on the same name can both see `true`.
    pub fn create_new_file(&self, name: &str) -> DbfsResult<bool> {
        if name.is_empty() {
            return Err(DbfsError::InvalidArgument("empty file name".to_string()));
        }
        if self.exists(name)? {
            return Ok(false);
        }
        self.registry.get_or_create_descriptor(name)?;
        Ok(true)
    }

    /// Delete a file and sweep its blocks. Returns false if it did not exist.
    pub fn delete(&self, name: &str) -> DbfsResult<bool> {
        let descriptor = match self.registry.get_descriptor(name)? {
            Some(descriptor) => self.registry.mark_deleted(&descriptor)?,
            None => return Ok(false),
        };
        let swept = self.mapper.delete_blocks(&descriptor, true)?;
        info!("swept {} block columns of {}", swept, name);
        Ok(true)
    }

    pub fn length(&self, name: &str) -> DbfsResult<u64> {
        self.descriptor(name).map(|d| d.length)
    }

    pub fn last_modified(&self, name: &str) -> DbfsResult<u64> {
        self.descriptor(name).map(|d| d.last_modified)
    }

    pub fn make_lock(&self, name: &str) -> MarkerLock<S> {
        MarkerLock::new(self.clone(), name)
    }

    fn descriptor(&self, name: &str) -> DbfsResult<FileDescriptor> {
        self.registry
            .get_descriptor(name)?
            .ok_or_else(|| DbfsError::NotFound(name.to_string()))
    }
}
