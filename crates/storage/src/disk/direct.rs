//! Direct disk manager: every `update`/`allocate`/`free` call is applied
//! to the main file immediately, `commit`/`rollback` are no-ops. Grounded
//! directly on `storage::disk::DiskManager`, whose
//! `write_page`/`allocate_page` already work this way.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use common::PageId;

use crate::header::FileHeader;
use crate::long_stack::LongStack;
use crate::page::Page;

use super::core;
use super::{DiskError, DiskManager, DiskManagerConfig, DiskResult};

pub struct DirectDiskManager {
    path: PathBuf,
    file: File,
    header: FileHeader,
    config: DiskManagerConfig,
    closed: bool,
}

impl DirectDiskManager {
    pub fn create(path: impl AsRef<Path>, config: DiskManagerConfig) -> DiskResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = core::create_locked_file(&path, config.lock_timeout)?;
        let page_size = 1usize << config.page_shift;

        let mut header = FileHeader::new_default(config.page_shift);
        header.set_consistent(true);
        header.set_has_free_stack(config.reserve_free_stack);
        header.maximum_page_id = if config.reserve_free_stack { 1 } else { 0 };

        core::write_page(&file, 0, page_size, &header.to_bytes(page_size))?;
        if config.reserve_free_stack {
            let stack_page = Page::new(config.page_shift);
            core::write_page(&file, 1, page_size, stack_page.data())?;
        }
        file.sync_data()?;
        log::debug!("direct disk manager created at {}", path.display());

        Ok(Self {
            path,
            file,
            header,
            config,
            closed: false,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> DiskResult<Self> {
        Self::open_with_timeout(path, core::DEFAULT_LOCK_TIMEOUT)
    }

    /// Opens an existing file, retrying the exclusive OS file lock for up
    /// to `lock_timeout` before giving up with [`DiskError::Locked`].
    pub fn open_with_timeout(path: impl AsRef<Path>, lock_timeout: std::time::Duration) -> DiskResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = core::open_locked_file(&path, lock_timeout)?;
        let mut buf = [0u8; crate::header::HEADER_LAYOUT_SIZE];
        file.read_at(&mut buf, 0)?;
        let header = FileHeader::from_bytes(&buf)?;
        let config = DiskManagerConfig {
            page_shift: header.page_shift,
            preallocate_count: super::DEFAULT_PREALLOCATE_COUNT,
            reserve_free_stack: header.has_free_stack(),
            lock_timeout,
        };

        // If the consistency bit is 0 and no WAL exists, the checksum is
        // recomputed and compared; mismatch aborts open. The direct
        // variant never leaves this bit clear on a clean close, so this
        // only fires after an unclean shutdown.
        if !header.is_consistent() {
            let page_size = 1usize << header.page_shift;
            let recomputed = core::compute_checksum(&file, page_size, header.maximum_page_id)?;
            if recomputed != header.checksum {
                return Err(DiskError::DataCorruption(format!(
                    "checksum mismatch on open: stored={} recomputed={}",
                    header.checksum, recomputed
                )));
            }
        }

        log::debug!("direct disk manager opened at {}", path.display());
        Ok(Self {
            path,
            file,
            header,
            config,
            closed: false,
        })
    }

    fn ensure_open(&self) -> DiskResult<()> {
        if self.closed {
            return Err(DiskError::Closed);
        }
        Ok(())
    }

    fn check_bounds(&self, page_id: PageId) -> DiskResult<()> {
        if page_id == 0 || page_id > self.header.maximum_page_id {
            return Err(DiskError::PageOutOfBounds(page_id));
        }
        Ok(())
    }

    fn write_header(&mut self) -> DiskResult<()> {
        let page_size = self.page_size();
        core::write_page(&self.file, 0, page_size, &self.header.to_bytes(page_size))?;
        self.file.sync_data()?;
        Ok(())
    }

    fn with_free_stack_page<R>(
        &mut self,
        f: impl FnOnce(&mut LongStack) -> R,
    ) -> DiskResult<R> {
        let page_size = self.page_size();
        let mut raw = vec![0u8; page_size];
        core::read_page(&self.file, 1, page_size, &mut raw)?;
        let mut page = Page::new(self.config.page_shift);
        page.load(&raw);
        let mut stack = LongStack::new(&mut page);
        let result = f(&mut stack);
        core::write_page(&self.file, 1, page_size, page.data())?;
        Ok(result)
    }
}

impl DiskManager for DirectDiskManager {
    fn page_size(&self) -> usize {
        1usize << self.config.page_shift
    }

    fn allocated_pages(&self) -> u64 {
        self.header.allocated_pages
    }

    fn maximum_page_id(&self) -> u64 {
        self.header.maximum_page_id
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn read(&mut self, page_id: PageId, buf: &mut [u8]) -> DiskResult<()> {
        self.ensure_open()?;
        self.check_bounds(page_id)?;
        let page_size = self.page_size();
        core::read_page(&self.file, page_id, page_size, buf)
    }

    fn read_range(&mut self, start_id: PageId, page_count: usize, buf: &mut [u8]) -> DiskResult<()> {
        self.ensure_open()?;
        if page_count > 0 {
            self.check_bounds(start_id)?;
            self.check_bounds(start_id + page_count as PageId - 1)?;
        }
        let page_size = self.page_size();
        core::read_range(&self.file, start_id, page_size, page_count, buf)
    }

    fn update(&mut self, page_id: PageId, buf: &[u8]) -> DiskResult<()> {
        self.ensure_open()?;
        self.check_bounds(page_id)?;
        let page_size = self.page_size();
        core::write_page(&self.file, page_id, page_size, buf)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn allocate(&mut self) -> DiskResult<PageId> {
        self.ensure_open()?;
        let reused = if self.config.reserve_free_stack {
            self.with_free_stack_page(|stack| stack.pop())?
        } else {
            None
        };

        let page_id = match reused {
            Some(page_id) => page_id,
            None => {
                let first = self.header.maximum_page_id + 1;
                // Batch-preallocating trailing pages only pays off when the
                // extras can be handed back out via the free stack; without
                // one, only `first` itself is grown so allocation stays
                // sequential (1, 2, 3, ...).
                let last = if self.config.reserve_free_stack {
                    first + self.config.preallocate_count - 1
                } else {
                    first
                };
                core::extend_to_include(&self.file, last, self.page_size())?;
                if self.config.reserve_free_stack {
                    self.with_free_stack_page(|stack| {
                        for extra in (first + 1)..=last {
                            stack.offer(extra);
                        }
                    })?;
                }
                self.header.maximum_page_id = last;
                first
            }
        };

        self.header.allocated_pages += 1;
        self.write_header()?;
        log::trace!("direct disk manager allocated page {page_id}");
        Ok(page_id)
    }

    fn free(&mut self, page_id: PageId) -> DiskResult<()> {
        self.ensure_open()?;
        self.check_bounds(page_id)?;

        if page_id == self.header.maximum_page_id {
            core::truncate_to(&self.file, page_id - 1, self.page_size())?;
            self.header.maximum_page_id -= 1;
            self.header.allocated_pages -= 1;
        } else if self.config.reserve_free_stack {
            let already_free = self.with_free_stack_page(|stack| stack.contains(page_id))?;
            if already_free {
                return Err(DiskError::DoubleFree(page_id));
            }
            let offered = self.with_free_stack_page(|stack| stack.offer(page_id))?;
            if offered {
                self.header.allocated_pages -= 1;
            } else {
                self.header.dangling_pages += 1;
            }
        } else {
            self.header.dangling_pages += 1;
        }

        self.write_header()?;
        log::trace!("direct disk manager freed page {page_id}");
        Ok(())
    }

    fn commit(&mut self) -> DiskResult<()> {
        self.ensure_open()
    }

    fn rollback(&mut self) -> DiskResult<()> {
        self.ensure_open()
    }

    fn close(&mut self) -> DiskResult<()> {
        if !self.closed {
            let page_size = self.page_size();
            self.header.checksum =
                core::compute_checksum(&self.file, page_size, self.header.maximum_page_id)?;
            self.header.set_consistent(true);
            self.write_header()?;
        }
        self.closed = true;
        Ok(())
    }

    fn delete(&mut self) -> DiskResult<()> {
        self.close()?;
        core::remove_file(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_path(name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("hare_direct_test_{name}_{n}.hare"))
    }

    #[test]
    fn allocate_update_read_roundtrip() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();

        let page_id = disk.allocate().unwrap();
        assert_eq!(page_id, 2);

        let image = vec![9u8; disk.page_size()];
        disk.update(page_id, &image).unwrap();

        let mut buf = vec![0u8; disk.page_size()];
        disk.read(page_id, &mut buf).unwrap();
        assert_eq!(buf, image);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn free_then_allocate_reuses_page() {
        let path = temp_path("reuse");
        let _ = std::fs::remove_file(&path);
        let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();

        let a = disk.allocate().unwrap();
        let b = disk.allocate().unwrap();
        disk.free(a).unwrap();
        let c = disk.allocate().unwrap();
        assert_eq!(c, a);
        assert_ne!(b, c);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn freeing_terminal_page_truncates() {
        let path = temp_path("truncate");
        let _ = std::fs::remove_file(&path);
        let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();

        disk.allocate().unwrap();
        let terminal = disk.maximum_page_id();
        disk.free(terminal).unwrap();
        assert_eq!(disk.maximum_page_id(), terminal - 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn double_free_rejected() {
        let path = temp_path("double_free");
        let _ = std::fs::remove_file(&path);
        let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();

        let a = disk.allocate().unwrap();
        let _b = disk.allocate().unwrap();
        disk.free(a).unwrap();
        assert!(matches!(disk.free(a), Err(DiskError::DoubleFree(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn without_free_stack_first_allocation_is_page_one() {
        let path = temp_path("no_stack");
        let _ = std::fs::remove_file(&path);
        let mut disk = DirectDiskManager::create(
            &path,
            DiskManagerConfig::new(12).without_free_stack(),
        )
        .unwrap();

        assert_eq!(disk.allocate().unwrap(), 1);
        assert_eq!(disk.allocate().unwrap(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn clean_close_writes_consistent_checksum_that_reopen_accepts() {
        let path = temp_path("checksum");
        let _ = std::fs::remove_file(&path);
        {
            let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
            let page_id = disk.allocate().unwrap();
            disk.update(page_id, &vec![42u8; disk.page_size()]).unwrap();
            disk.close().unwrap();
        }

        let mut disk = DirectDiskManager::open(&path).unwrap();
        assert!(disk.header.is_consistent());
        assert_ne!(disk.header.checksum, 0);
        let mut buf = vec![0u8; disk.page_size()];
        disk.read(2, &mut buf).unwrap();
        assert_eq!(buf[0], 42);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reopen_preserves_state() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);
        {
            let mut disk = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
            let page_id = disk.allocate().unwrap();
            disk.update(page_id, &vec![5u8; disk.page_size()]).unwrap();
        }
        let mut disk = DirectDiskManager::open(&path).unwrap();
        assert_eq!(disk.allocated_pages(), 1);
        let mut buf = vec![0u8; disk.page_size()];
        disk.read(2, &mut buf).unwrap();
        assert_eq!(buf[0], 5);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn second_open_times_out_while_first_holds_the_lock() {
        let path = temp_path("lock_timeout");
        let _ = std::fs::remove_file(&path);
        let _first = DirectDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();

        let start = std::time::Instant::now();
        let second = DirectDiskManager::open_with_timeout(&path, std::time::Duration::from_millis(100));
        assert!(matches!(second, Err(DiskError::Locked(_))));
        assert!(start.elapsed() >= std::time::Duration::from_millis(100));
        let _ = std::fs::remove_file(&path);
    }
}
