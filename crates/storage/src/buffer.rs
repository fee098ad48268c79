//! Buffer pool: caches a bounded number of pages in memory between disk
//! and callers, evicting by a pluggable [`EvictionPolicy`] when full.
//!
//! Grounded on `storage::buffer::BufferPoolManager` (frame table, free
//! list, page table, `Replacer`) but reworked so that the pool's own
//! bookkeeping (`page_table`, `free_list`, the replacer) sits behind one
//! short-lived lock while each frame's [`Page`] has its own `RwLock`, so
//! the pool permits fine-grained concurrent reads of different pages —
//! which a single whole-pool-mutex `PageGuard` does not satisfy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use common::PageId;
use thiserror::Error;

use crate::disk::{DiskError, DiskManager};
use crate::page::Page;
use crate::replacer::{EvictionPolicy, FrameId, Replacer};

#[derive(Debug, Error)]
pub enum BufferPoolError {
    #[error("disk manager error: {0}")]
    Disk(#[from] DiskError),
    #[error("buffer pool is full: every frame is pinned")]
    PoolExhausted,
    #[error("page {0} is not resident in the buffer pool")]
    NotResident(PageId),
    #[error("buffer pool is closed")]
    Closed,
    #[error("buffer pool lock was poisoned by a panicked thread")]
    LockPoisoned,
}

pub type BufferPoolResult<T> = Result<T, BufferPoolError>;

/// Observability hook invoked on pool hits/misses/evictions, injected
/// at construction time rather than read from a process-global.
pub trait MetricsSink: Send + Sync {
    fn on_hit(&self, _page_id: PageId) {}
    fn on_miss(&self, _page_id: PageId) {}
    fn on_eviction(&self, _page_id: PageId) {}
}

#[derive(Debug, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {}

/// In-process counters, useful in tests and for exposing pool health.
#[derive(Debug, Default)]
pub struct CountingMetricsSink {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub evictions: AtomicUsize,
}

impl MetricsSink for CountingMetricsSink {
    fn on_hit(&self, _page_id: PageId) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_miss(&self, _page_id: PageId) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn on_eviction(&self, _page_id: PageId) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

struct Frame {
    page: RwLock<Page>,
    pin_count: AtomicUsize,
}

impl Frame {
    fn new(page_shift: u32) -> Self {
        Self {
            page: RwLock::new(Page::new(page_shift)),
            pin_count: AtomicUsize::new(0),
        }
    }
}

/// Directory and free-list bookkeeping, guarded by one short-held lock.
/// Frame content itself lives outside this lock, in each [`Frame`]'s own
/// `RwLock`, so two callers reading different resident pages never wait
/// on each other.
struct Directory {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
}

struct Inner {
    frames: Vec<Frame>,
    directory: Mutex<Directory>,
    disk: Mutex<Box<dyn DiskManager>>,
    metrics: Arc<dyn MetricsSink>,
    prefetch: PrefetchHandle,
    closed: std::sync::atomic::AtomicBool,
}

impl Inner {
    fn unpin(&self, frame_id: FrameId, mark_dirty: bool) {
        if mark_dirty {
            self.frames[frame_id].page.write().unwrap().mark_dirty();
        }
        let remaining = self.frames[frame_id].pin_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.directory.lock().unwrap().replacer.unpin(frame_id);
        }
    }
}

/// Buffer pool manager: a fixed set of frames caching pages from one
/// [`DiskManager`].
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new(
        disk: Box<dyn DiskManager>,
        pool_size: usize,
        eviction_policy: &dyn EvictionPolicy,
    ) -> Self {
        Self::with_metrics(disk, pool_size, eviction_policy, Arc::new(NoopMetricsSink))
    }

    pub fn with_metrics(
        disk: Box<dyn DiskManager>,
        pool_size: usize,
        eviction_policy: &dyn EvictionPolicy,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let page_shift = disk.page_size().trailing_zeros();
        let frames = (0..pool_size).map(|_| Frame::new(page_shift)).collect();
        let directory = Directory {
            page_table: HashMap::new(),
            free_list: (0..pool_size).rev().collect(),
            replacer: eviction_policy.build(pool_size),
        };
        let disk = Mutex::new(disk);
        let inner = Arc::new(Inner {
            frames,
            directory: Mutex::new(directory),
            disk,
            metrics,
            prefetch: PrefetchHandle::spawn(),
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        Self { inner }
    }

    fn ensure_open(&self) -> BufferPoolResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BufferPoolError::Closed);
        }
        Ok(())
    }

    fn lock_directory(&self) -> BufferPoolResult<std::sync::MutexGuard<'_, Directory>> {
        self.inner
            .directory
            .lock()
            .map_err(|_| BufferPoolError::LockPoisoned)
    }

    fn lock_disk(&self) -> BufferPoolResult<std::sync::MutexGuard<'_, Box<dyn DiskManager>>> {
        self.inner
            .disk
            .lock()
            .map_err(|_| BufferPoolError::LockPoisoned)
    }

    fn choose_frame(&self, directory: &mut Directory) -> BufferPoolResult<FrameId> {
        if let Some(frame_id) = directory.free_list.pop() {
            return Ok(frame_id);
        }
        directory
            .replacer
            .victim()
            .ok_or(BufferPoolError::PoolExhausted)
    }

    fn evict_frame(&self, directory: &mut Directory, frame_id: FrameId) -> BufferPoolResult<()> {
        let mut page = self.inner.frames[frame_id].page.write().unwrap();
        if let Some(old_page_id) = page.page_id() {
            if page.is_dirty() {
                self.lock_disk()?.update(old_page_id, page.data())?;
            }
            directory.page_table.remove(&old_page_id);
            self.inner.metrics.on_eviction(old_page_id);
        }
        page.reset();
        Ok(())
    }

    /// Allocates a fresh page on disk and pins it into a frame.
    pub fn new_page(&self) -> BufferPoolResult<(PageId, PageRef)> {
        self.ensure_open()?;
        let page_id = self.lock_disk()?.allocate()?;
        let mut directory = self.lock_directory()?;
        let frame_id = self.choose_frame(&mut directory)?;
        self.evict_frame(&mut directory, frame_id)?;

        {
            let mut page = self.inner.frames[frame_id].page.write().unwrap();
            page.set_page_id(Some(page_id));
            page.clear_dirty();
        }
        self.inner.frames[frame_id].pin_count.store(1, Ordering::SeqCst);
        directory.page_table.insert(page_id, frame_id);
        directory.replacer.pin(frame_id);
        drop(directory);

        Ok((page_id, PageRef { pool: self.inner.clone(), frame_id }))
    }

    /// Fetches `page_id`, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> BufferPoolResult<PageRef> {
        self.ensure_open()?;
        {
            let mut directory = self.lock_directory()?;
            if let Some(&frame_id) = directory.page_table.get(&page_id) {
                self.inner.frames[frame_id]
                    .pin_count
                    .fetch_add(1, Ordering::SeqCst);
                directory.replacer.pin(frame_id);
                self.inner.metrics.on_hit(page_id);
                return Ok(PageRef { pool: self.inner.clone(), frame_id });
            }
        }

        self.inner.metrics.on_miss(page_id);
        let mut directory = self.lock_directory()?;
        // Re-check: another thread may have resolved this miss already.
        if let Some(&frame_id) = directory.page_table.get(&page_id) {
            self.inner.frames[frame_id]
                .pin_count
                .fetch_add(1, Ordering::SeqCst);
            directory.replacer.pin(frame_id);
            self.inner.metrics.on_hit(page_id);
            return Ok(PageRef { pool: self.inner.clone(), frame_id });
        }

        let frame_id = self.choose_frame(&mut directory)?;
        self.evict_frame(&mut directory, frame_id)?;

        {
            let mut page = self.inner.frames[frame_id].page.write().unwrap();
            let mut buf = vec![0u8; page.page_size()];
            self.lock_disk()?.read(page_id, &mut buf)?;
            page.load(&buf);
            page.set_page_id(Some(page_id));
        }
        self.inner.frames[frame_id].pin_count.store(1, Ordering::SeqCst);
        directory.page_table.insert(page_id, frame_id);
        directory.replacer.pin(frame_id);
        drop(directory);

        Ok(PageRef { pool: self.inner.clone(), frame_id })
    }

    /// Number of pages currently resident in the directory. Exposed for
    /// tests asserting the pool never grows its directory past its
    /// configured frame count.
    pub fn resident_count(&self) -> usize {
        self.inner.directory.lock().unwrap().page_table.len()
    }

    /// Hints that the contiguous range `[start_id, start_id + count)`
    /// will likely be needed soon. Handed off to the background prefetch
    /// worker, which runs [`Self::prefetch_now`]; non-blocking — a full
    /// queue silently drops the hint rather than stalling the caller.
    pub fn prefetch(&self, start_id: PageId, count: usize) {
        self.inner.prefetch.submit(self.clone(), start_id, count);
    }

    /// Evicts enough frames to hold `[start_id, start_id + count)` and
    /// reads the whole range in one positional I/O when none of it is
    /// already resident. Falls back to fetching each page individually
    /// if any page in the range is
    /// already cached (so a dirty resident page is never clobbered).
    /// Registers every page in the directory but does not retain it —
    /// a genuine `fetch_page` afterward just hits cache.
    fn prefetch_now(&self, start_id: PageId, count: usize) -> BufferPoolResult<()> {
        self.ensure_open()?;
        if count == 0 {
            return Ok(());
        }

        let any_resident = {
            let directory = self.lock_directory()?;
            (0..count).any(|i| directory.page_table.contains_key(&(start_id + i as PageId)))
        };
        if any_resident {
            for i in 0..count {
                let page_id = start_id + i as PageId;
                if let Ok(page_ref) = self.fetch_page(page_id) {
                    page_ref.unpin(false);
                }
            }
            return Ok(());
        }

        let count = count.min(self.inner.frames.len());
        let page_size = self.inner.frames[0].page.read().unwrap().page_size();
        let mut directory = self.lock_directory()?;
        let mut frame_ids = Vec::with_capacity(count);
        for _ in 0..count {
            let frame_id = self.choose_frame(&mut directory)?;
            self.evict_frame(&mut directory, frame_id)?;
            frame_ids.push(frame_id);
        }

        let mut buf = vec![0u8; page_size * count];
        self.lock_disk()?.read_range(start_id, count, &mut buf)?;

        for (i, &frame_id) in frame_ids.iter().enumerate() {
            let page_id = start_id + i as PageId;
            {
                let mut page = self.inner.frames[frame_id].page.write().unwrap();
                page.load(&buf[i * page_size..(i + 1) * page_size]);
                page.set_page_id(Some(page_id));
            }
            directory.page_table.insert(page_id, frame_id);
            directory.replacer.unpin(frame_id);
        }
        Ok(())
    }

    /// Flushes a resident dirty page to disk without unpinning it.
    pub fn flush_page(&self, page_id: PageId) -> BufferPoolResult<()> {
        let frame_id = {
            let directory = self.lock_directory()?;
            *directory
                .page_table
                .get(&page_id)
                .ok_or(BufferPoolError::NotResident(page_id))?
        };
        let mut page = self.inner.frames[frame_id].page.write().unwrap();
        if page.is_dirty() {
            self.lock_disk()?.update(page_id, page.data())?;
            page.clear_dirty();
        }
        Ok(())
    }

    /// Flushes every resident dirty page.
    pub fn flush_all(&self) -> BufferPoolResult<()> {
        self.ensure_open()?;
        let page_ids: Vec<PageId> = {
            let directory = self.lock_directory()?;
            directory.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Re-reads every resident dirty page from disk, discarding its
    /// in-memory mutations.
    pub fn synchronize(&self) -> BufferPoolResult<()> {
        self.ensure_open()?;
        let entries: Vec<(PageId, FrameId)> = {
            let directory = self.lock_directory()?;
            directory
                .page_table
                .iter()
                .map(|(&page_id, &frame_id)| (page_id, frame_id))
                .collect()
        };
        for (page_id, frame_id) in entries {
            let mut page = self.inner.frames[frame_id].page.write().unwrap();
            if page.is_dirty() {
                let mut buf = vec![0u8; page.page_size()];
                self.lock_disk()?.read(page_id, &mut buf)?;
                page.load(&buf);
                page.set_page_id(Some(page_id));
            }
        }
        Ok(())
    }

    /// Flushes every dirty page, then durably commits the underlying
    /// disk manager's staged writes (a no-op for [`crate::DirectDiskManager`]).
    pub fn commit(&self) -> BufferPoolResult<()> {
        self.flush_all()?;
        self.lock_disk()?.commit()?;
        Ok(())
    }

    /// Discards any dirty in-memory pages and rolls back the underlying
    /// disk manager's staged writes.
    pub fn rollback(&self) -> BufferPoolResult<()> {
        self.synchronize()?;
        self.lock_disk()?.rollback()?;
        Ok(())
    }

    /// Disposes every reference (flushing dirty ones first) and marks the
    /// pool closed; further operations return [`BufferPoolError::Closed`].
    /// Idempotent.
    pub fn close(&self) -> BufferPoolResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_all()?;
        self.lock_disk()?.close()?;
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A pinned reference to a resident page. Exposes closures over the
/// frame's own `RwLock` rather than a `Deref` tied to the whole pool's
/// lock, so two `PageRef`s over different frames never contend.
pub struct PageRef {
    pool: Arc<Inner>,
    frame_id: FrameId,
}

impl PageRef {
    pub fn read<R>(&self, f: impl FnOnce(&Page) -> R) -> R {
        let page = self.pool.frames[self.frame_id].page.read().unwrap();
        f(&page)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Page) -> R) -> R {
        let mut page = self.pool.frames[self.frame_id].page.write().unwrap();
        f(&mut page)
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.pool.frames[self.frame_id].page.read().unwrap().page_id()
    }

    /// Takes out a second independent reference to the same resident
    /// frame, bumping its pin count, for a page held by more than one
    /// caller at once. The frame is only eligible for eviction once
    /// every `PageRef` it was
    /// handed out to (the original plus every `retain()`) has been
    /// unpinned.
    pub fn retain(&self) -> PageRef {
        self.pool.frames[self.frame_id]
            .pin_count
            .fetch_add(1, Ordering::SeqCst);
        self.pool.directory.lock().unwrap().replacer.pin(self.frame_id);
        PageRef {
            pool: self.pool.clone(),
            frame_id: self.frame_id,
        }
    }

    /// Unpins this reference. `mark_dirty` should be `true` if the
    /// caller mutated the page through [`PageRef::write`].
    pub fn unpin(self, mark_dirty: bool) {
        self.pool.unpin(self.frame_id, mark_dirty);
    }
}

struct PrefetchRequest {
    pool: BufferPool,
    start_id: PageId,
    count: usize,
}

/// Background worker draining a queue of prefetch requests, modeled on
/// `LogManager`'s background flush thread in spirit (`mpsc::channel`
/// handoff, joined on drop) but carrying page-range fetch hints instead
/// of log-flush signals.
struct PrefetchHandle {
    sender: mpsc::Sender<PrefetchRequest>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PrefetchHandle {
    fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel::<PrefetchRequest>();
        let handle = std::thread::spawn(move || {
            for request in receiver {
                let _ = request.pool.prefetch_now(request.start_id, request.count);
            }
        });
        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn submit(&self, pool: BufferPool, start_id: PageId, count: usize) {
        let _ = self.sender.send(PrefetchRequest { pool, start_id, count });
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DirectDiskManager, DiskManagerConfig};
    use crate::replacer::{Fifo, Lru};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    fn temp_path(name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        std::env::temp_dir().join(format!("hare_buffer_test_{name}_{n}.hare"))
    }

    fn setup(name: &str, pool_size: usize) -> (PathBuf, BufferPool) {
        let path = temp_path(name);
        let _ = std::fs::remove_file(&path);
        let disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
        let pool = BufferPool::new(Box::new(disk), pool_size, &Lru);
        (path, pool)
    }

    #[test]
    fn new_page_then_fetch_sees_same_content() {
        let (path, pool) = setup("new_then_fetch", 4);
        let (page_id, page_ref) = pool.new_page().unwrap();
        page_ref.write(|page| page.put_u64(0, 0xFEED).unwrap());
        page_ref.unpin(true);
        pool.flush_page(page_id).unwrap();

        let page_ref = pool.fetch_page(page_id).unwrap();
        let value = page_ref.read(|page| page.get_u64(0).unwrap());
        assert_eq!(value, 0xFEED);
        page_ref.unpin(false);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn eviction_reclaims_frames_under_pressure() {
        let (path, pool) = setup("eviction", 2);
        let mut page_ids = Vec::new();
        for i in 0u64..5 {
            let (page_id, page_ref) = pool.new_page().unwrap();
            page_ref.write(|page| page.put_u64(0, i).unwrap());
            page_ref.unpin(true);
            page_ids.push(page_id);
        }
        for (i, page_id) in page_ids.iter().enumerate() {
            let page_ref = pool.fetch_page(*page_id).unwrap();
            assert_eq!(page_ref.read(|page| page.get_u64(0).unwrap()), i as u64);
            page_ref.unpin(false);
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn scenario_small_pool_over_many_pages_bounds_directory_and_counts_misses() {
        let path = temp_path("small_pool_many_pages");
        let _ = std::fs::remove_file(&path);
        let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
        let mut page_ids = Vec::with_capacity(100);
        for _ in 0u64..100 {
            page_ids.push(disk.allocate().unwrap());
        }

        let metrics = Arc::new(CountingMetricsSink::default());
        let pool = BufferPool::with_metrics(Box::new(disk), 4, &Lru, metrics.clone());

        for page_id in &page_ids {
            let page_ref = pool.fetch_page(*page_id).unwrap();
            page_ref.unpin(false);
            assert!(pool.resident_count() <= 4);
        }

        assert!(metrics.misses.load(AtomicOrdering::Relaxed) >= 96);
        assert_eq!(
            metrics.hits.load(AtomicOrdering::Relaxed)
                + metrics.misses.load(AtomicOrdering::Relaxed),
            100
        );
        pool.flush_all().unwrap();

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn prefetch_loads_a_contiguous_range_without_pinning() {
        let path = temp_path("prefetch_range");
        let _ = std::fs::remove_file(&path);
        let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
        let mut page_ids = Vec::with_capacity(8);
        for i in 0u64..8 {
            let page_id = disk.allocate().unwrap();
            let mut buf = vec![0u8; disk.page_size()];
            buf[0..8].copy_from_slice(&i.to_be_bytes());
            disk.update(page_id, &buf).unwrap();
            page_ids.push(page_id);
        }
        disk.commit().unwrap();
        let start = page_ids[0];

        let metrics = Arc::new(CountingMetricsSink::default());
        let pool = BufferPool::with_metrics(Box::new(disk), 8, &Lru, metrics.clone());
        pool.prefetch_now(start, page_ids.len()).unwrap();

        assert_eq!(pool.resident_count(), page_ids.len());
        // prefetch bypasses the hit/miss counters entirely.
        assert_eq!(metrics.hits.load(AtomicOrdering::Relaxed), 0);
        assert_eq!(metrics.misses.load(AtomicOrdering::Relaxed), 0);

        for (i, page_id) in page_ids.iter().enumerate() {
            let page_ref = pool.fetch_page(*page_id).unwrap();
            let value = page_ref.read(|page| page.get_u64(0).unwrap());
            assert_eq!(value, i as u64);
            page_ref.unpin(false);
        }
        assert_eq!(metrics.hits.load(AtomicOrdering::Relaxed), page_ids.len());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn retain_keeps_a_frame_pinned_until_every_handle_is_released() {
        let (path, pool) = setup("retain", 1);
        let (page_id, first) = pool.new_page().unwrap();
        let second = first.retain();

        first.unpin(false);
        // The second handle still holds the frame pinned, so a fresh
        // allocation with only one frame available must fail.
        assert!(pool.new_page().is_err());

        second.unpin(false);
        let (other_id, other_ref) = pool.new_page().unwrap();
        assert_ne!(page_id, other_id);
        other_ref.unpin(false);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn fifo_policy_constructs_and_evicts() {
        let path = temp_path("fifo_pool");
        let _ = std::fs::remove_file(&path);
        let disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
        let pool = BufferPool::new(Box::new(disk), 1, &Fifo);
        let (a, a_ref) = pool.new_page().unwrap();
        a_ref.unpin(false);
        let (b, b_ref) = pool.new_page().unwrap();
        b_ref.unpin(false);
        assert_ne!(a, b);
        let _ = std::fs::remove_file(&path);
    }
}
