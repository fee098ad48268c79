//! Disk manager: the component that owns a `.hare` file's bytes on disk,
//! its free-page bookkeeping, and (for the WAL variant) the staging of
//! writes into a sibling log file.
//!
//! Grounded on `storage::disk::DiskManager`
//! (`open`/`read_page`/`write_page`/`allocate_page`) but split into a
//! trait with two implementations — [`direct::DirectDiskManager`] and
//! [`wal_backed::WalDiskManager`] — the direct and WAL-staged variants
//! are a case of polymorphism rather than one manager with a runtime
//! flag.

mod core;
mod direct;
mod wal_backed;

use std::path::Path;
use std::time::Duration;

use common::PageId;
use thiserror::Error;

pub use direct::DirectDiskManager;
pub use wal_backed::WalDiskManager;

/// Number of trailing pages a fresh allocation beyond the current
/// `maximumPageId` preallocates in one go, as a configurable count
/// (e.g. 32).
pub const DEFAULT_PREALLOCATE_COUNT: u64 = 32;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("disk manager io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("header error: {0}")]
    Header(#[from] crate::header::HeaderError),
    #[error("wal error: {0}")]
    Wal(#[from] wal::WalError),
    #[error("page {0} is out of range")]
    PageOutOfBounds(PageId),
    #[error("page {0} is already free")]
    DoubleFree(PageId),
    #[error("data corruption: {0}")]
    DataCorruption(String),
    #[error("disk manager is closed")]
    Closed,
    #[error("buffer length {actual} does not match page size {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("failed to acquire exclusive file lock on {0}")]
    Locked(String),
}

pub type DiskResult<T> = Result<T, DiskError>;

/// Construction-time knobs shared by both disk-manager variants.
#[derive(Debug, Clone, Copy)]
pub struct DiskManagerConfig {
    pub page_shift: u32,
    pub preallocate_count: u64,
    /// Whether PageId 1 is reserved for the free-page `LongStack`.
    /// `FixedColumnFile` creates its disk manager with this set to
    /// `false` so PageId 1 is free for its own header page instead —
    /// see DESIGN.md's "PageId 1 contradiction" entry.
    pub reserve_free_stack: bool,
    /// How long to retry the exclusive OS file lock on `create`/`open`
    /// before giving up with [`DiskError::Locked`].
    pub lock_timeout: Duration,
}

impl DiskManagerConfig {
    pub fn new(page_shift: u32) -> Self {
        Self {
            page_shift,
            preallocate_count: DEFAULT_PREALLOCATE_COUNT,
            reserve_free_stack: true,
            lock_timeout: core::DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn without_free_stack(mut self) -> Self {
        self.reserve_free_stack = false;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self::new(12)
    }
}

/// Abstract operations every page-file owner needs, regardless of
/// whether writes land in the main file immediately or stage through a
/// write-ahead log first.
pub trait DiskManager: Send {
    fn page_size(&self) -> usize;
    fn allocated_pages(&self) -> u64;
    fn maximum_page_id(&self) -> u64;
    fn path(&self) -> &Path;

    /// Reads `page_id`'s current bytes into `buf`, which must be exactly
    /// `page_size()` long.
    fn read(&mut self, page_id: PageId, buf: &mut [u8]) -> DiskResult<()>;

    /// Reads `page_count` consecutive pages starting at `start_id` into
    /// `buf` (`page_count * page_size()` bytes). The default
    /// implementation reads one page at a time; implementations that can
    /// do one positional read across the whole region should override
    /// this.
    fn read_range(&mut self, start_id: PageId, page_count: usize, buf: &mut [u8]) -> DiskResult<()> {
        let page_size = self.page_size();
        for i in 0..page_count {
            let offset = i * page_size;
            self.read(start_id + i as PageId, &mut buf[offset..offset + page_size])?;
        }
        Ok(())
    }

    /// Writes `buf` as `page_id`'s new content. Direct managers apply
    /// this immediately; WAL managers stage it as an UPDATE entry.
    fn update(&mut self, page_id: PageId, buf: &[u8]) -> DiskResult<()>;

    /// Hands out a fresh page id, either reused from the free stack or
    /// minted past the current `maximumPageId`.
    fn allocate(&mut self) -> DiskResult<PageId>;

    /// Returns `page_id` to the free stack, or truncates the file if
    /// `page_id` is the terminal page.
    fn free(&mut self, page_id: PageId) -> DiskResult<()>;

    /// Makes staged writes durable. A no-op for the direct variant.
    fn commit(&mut self) -> DiskResult<()>;

    /// Discards staged writes without touching the main file. A no-op
    /// for the direct variant, since it has nothing staged to discard.
    fn rollback(&mut self) -> DiskResult<()>;

    /// Releases the file handle and any held lock. Further operations
    /// return [`DiskError::Closed`].
    fn close(&mut self) -> DiskResult<()>;

    /// Closes and removes the backing file(s) from disk entirely.
    fn delete(&mut self) -> DiskResult<()>;
}
