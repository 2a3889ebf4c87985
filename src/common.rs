//! Types shared by every layer of the column-backed filesystem: the error
//! enum, open flags, the time source and the I/O counters.

use alloc::string::String;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use onlyerror::Error;

pub type DbfsResult<T> = Result<T, DbfsError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbfsError {
    /// Descriptor row or column is absent, or the file is marked deleted.
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The backing store rejected or failed a call.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// Descriptor or block bytes are present but unusable.
    #[error("corrupted data: {0}")]
    Corruption(String),
    #[error("short read on {name}: expected {expected} bytes, got {actual}")]
    ShortRead {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// A guarded write found a descriptor other than the one it was based on.
    #[error("concurrent update of {0}")]
    Conflict(String),
    #[error("file not opened for writing: {0}")]
    ReadOnly(String),
    #[error("file handle is closed: {0}")]
    Closed(String),
}

impl From<serde_json::Error> for DbfsError {
    fn from(err: serde_json::Error) -> Self {
        DbfsError::Corruption(alloc::format!("{}", err))
    }
}

bitflags! {
    /// How a file is opened.
    pub struct OpenMode: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        /// Drop all content at open time. Only honoured together with WRITE.
        const TRUNCATE = 0b100;
        const READ_WRITE = Self::READ.bits | Self::WRITE.bits;
    }
}

impl OpenMode {
    /// Parse a `RandomAccessFile`-style mode string: `r`, `rw` or `rwt`.
    pub fn parse(mode: &str) -> DbfsResult<Self> {
        match mode {
            "r" => Ok(OpenMode::READ),
            "rw" => Ok(OpenMode::READ_WRITE),
            "rwt" => Ok(OpenMode::READ_WRITE | OpenMode::TRUNCATE),
            other => Err(DbfsError::InvalidArgument(alloc::format!(
                "unknown open mode {:?}",
                other
            ))),
        }
    }

    pub fn writable(&self) -> bool {
        self.contains(OpenMode::WRITE)
    }
}

/// Source of the millisecond timestamps stored in descriptors.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Wall clock, milliseconds since the Unix epoch.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Store traffic counters owned by one filesystem context.
#[derive(Debug, Default)]
pub struct IoStats {
    store_reads: AtomicU64,
    store_writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub store_reads: u64,
    pub store_writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl IoStats {
    pub fn record_read(&self, bytes: usize) {
        self.store_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.store_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            store_reads: self.store_reads.load(Ordering::Relaxed),
            store_writes: self.store_writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_parse() {
        assert_eq!(OpenMode::parse("r").unwrap(), OpenMode::READ);
        assert!(OpenMode::parse("rw").unwrap().writable());
        assert!(OpenMode::parse("rwt").unwrap().contains(OpenMode::TRUNCATE));
        assert!(matches!(
            OpenMode::parse("w+"),
            Err(DbfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now_millis(), 15);
        clock.set(3);
        assert_eq!(clock.now_millis(), 3);
    }

    #[test]
    fn test_io_stats_snapshot() {
        let stats = IoStats::default();
        stats.record_read(10);
        stats.record_read(0);
        stats.record_write(7);
        let snap = stats.snapshot();
        assert_eq!(snap.store_reads, 2);
        assert_eq!(snap.bytes_read, 10);
        assert_eq!(snap.store_writes, 1);
        assert_eq!(snap.bytes_written, 7);
    }
}
