//! WAL-staged disk manager: `update`/`allocate`/`free` append entries to
//! a sibling `.wal` file instead of touching the main file; `commit`
//! applies the staged entries and seals the log, `rollback` discards
//! them. Grounded on `storage::disk::DiskManager`'s file-handling shape,
//! paired with [`wal::Wal`] as the disk-manager variant that stages
//! writes instead of applying them directly.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use common::PageId;
use wal::{Wal, WalAction, WalEntry};

use crate::header::FileHeader;
use crate::long_stack::LongStack;
use crate::page::Page;

use super::core;
use super::{DiskError, DiskManager, DiskManagerConfig, DiskResult};

pub struct WalDiskManager {
    path: PathBuf,
    file: File,
    config: DiskManagerConfig,
    /// The header as it would read if every staged entry since the last
    /// commit were applied right now — what `commit()` will persist.
    working_header: FileHeader,
    /// Last header known to be durable on disk (as of the previous
    /// commit/rollback/open). Used to flip the on-disk consistency bit
    /// to 0 on the first write of a batch without clobbering it with
    /// `working_header`'s in-memory-only staged fields.
    committed_header: FileHeader,
    /// Working copy of the free-page stack (page 1), mutated in lockstep
    /// with `working_header` by [`apply_allocate`]/[`apply_free`].
    free_stack_page: Page,
    wal: Wal,
    closed: bool,
}

fn wal_sibling_path(path: &Path) -> PathBuf {
    let mut wal_path = path.as_os_str().to_owned();
    wal_path.push(".wal");
    PathBuf::from(wal_path)
}

/// Pops a reused page id if the stack has one, otherwise mints one past
/// `header.maximum_page_id` — shared by both live staging and
/// crash-recovery replay so the two always agree on the outcome, given
/// the same starting state and the same sequence of calls.
fn apply_allocate(
    header: &mut FileHeader,
    free_stack_page: &mut Page,
    reserve_free_stack: bool,
) -> PageId {
    let reused = if reserve_free_stack {
        LongStack::new(free_stack_page).pop()
    } else {
        None
    };
    let page_id = match reused {
        Some(page_id) => page_id,
        None => header.maximum_page_id + 1,
    };
    if reused.is_none() {
        header.maximum_page_id = page_id;
    }
    header.allocated_pages += 1;
    page_id
}

fn apply_free(
    header: &mut FileHeader,
    free_stack_page: &mut Page,
    reserve_free_stack: bool,
    page_id: PageId,
) -> DiskResult<()> {
    if page_id == header.maximum_page_id {
        header.maximum_page_id -= 1;
        header.allocated_pages -= 1;
        return Ok(());
    }
    if reserve_free_stack {
        let mut stack = LongStack::new(free_stack_page);
        if stack.contains(page_id) {
            return Err(DiskError::DoubleFree(page_id));
        }
        if stack.offer(page_id) {
            header.allocated_pages -= 1;
            return Ok(());
        }
    }
    header.dangling_pages += 1;
    Ok(())
}

impl WalDiskManager {
    pub fn create(path: impl AsRef<Path>, config: DiskManagerConfig) -> DiskResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = core::create_locked_file(&path, config.lock_timeout)?;
        let page_size = 1usize << config.page_shift;

        let mut header = FileHeader::new_default(config.page_shift);
        header.file_type = crate::header::FILE_TYPE_WAL;
        header.set_consistent(true);
        header.set_has_free_stack(config.reserve_free_stack);
        header.maximum_page_id = if config.reserve_free_stack { 1 } else { 0 };

        core::write_page(&file, 0, page_size, &header.to_bytes(page_size))?;
        let free_stack_page = Page::new(config.page_shift);
        if config.reserve_free_stack {
            core::write_page(&file, 1, page_size, free_stack_page.data())?;
        }
        file.sync_data()?;

        let wal = Wal::create(wal_sibling_path(&path))?;
        log::debug!("wal-backed disk manager created at {}", path.display());

        Ok(Self {
            path,
            file,
            config,
            working_header: header,
            committed_header: header,
            free_stack_page,
            wal,
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
        let mut header = FileHeader::from_bytes(&buf)?;
        let config = DiskManagerConfig {
            page_shift: header.page_shift,
            preallocate_count: super::DEFAULT_PREALLOCATE_COUNT,
            reserve_free_stack: header.has_free_stack(),
            lock_timeout,
        };
        let page_size = 1usize << config.page_shift;

        let mut free_stack_page = Page::new(config.page_shift);
        if config.reserve_free_stack {
            let mut raw = vec![0u8; page_size];
            core::read_page(&file, 1, page_size, &mut raw)?;
            free_stack_page.load(&raw);
        }

        let wal_path = wal_sibling_path(&path);
        let wal = if Wal::exists(&wal_path) {
            Self::recover(
                &file,
                &wal_path,
                &mut header,
                &mut free_stack_page,
                config.reserve_free_stack,
                page_size,
            )?
        } else {
            // A dirty main header with no WAL present triggers the
            // checksum self-check. The only way the header can be dirty
            // with no WAL present is a crash between the first staged
            // write's flag flip and this file's own `Wal::create` call
            // racing a previous session's `delete()` — recompute and
            // compare to be sure nothing was lost.
            if !header.is_consistent() {
                let recomputed = core::compute_checksum(&file, page_size, header.maximum_page_id)?;
                if recomputed != header.checksum {
                    return Err(DiskError::DataCorruption(format!(
                        "checksum mismatch on open: stored={} recomputed={}",
                        header.checksum, recomputed
                    )));
                }
                header.set_consistent(true);
                core::write_page(&file, 0, page_size, &header.to_bytes(page_size))?;
                file.sync_data()?;
            }
            Wal::create(&wal_path)?
        };

        log::debug!("wal-backed disk manager opened at {}", path.display());
        Ok(Self {
            path,
            file,
            config,
            working_header: header,
            committed_header: header,
            free_stack_page,
            wal,
            closed: false,
        })
    }

    /// Reconciles a leftover `.wal` file found at `open()` time. A
    /// `Committed` log may not have finished applying to the main file
    /// before a crash, so its entries are redone here; an `Open` or
    /// `Aborted` log never reached durability and is simply discarded —
    /// equivalent to an implicit rollback.
    fn recover(
        file: &File,
        wal_path: &Path,
        header: &mut FileHeader,
        free_stack_page: &mut Page,
        reserve_free_stack: bool,
        page_size: usize,
    ) -> DiskResult<Wal> {
        let mut wal = Wal::open(wal_path)?;
        if wal.state() == wal::WalState::Committed {
            log::info!(
                "replaying committed wal at {} after unclean shutdown",
                wal_path.display()
            );
            wal.replay(|entry: &WalEntry| {
                match entry.action {
                    WalAction::Update => {
                        core::write_page(file, entry.page_id, page_size, &entry.payload)
                            .map_err(|e| wal::WalError::Corrupt(e.to_string()))?;
                    }
                    WalAction::AllocateAppend => {
                        apply_allocate(header, free_stack_page, reserve_free_stack);
                        core::extend_to_include(file, entry.page_id, page_size)
                            .map_err(|e| wal::WalError::Corrupt(e.to_string()))?;
                    }
                    WalAction::AllocateReuse => {
                        apply_allocate(header, free_stack_page, reserve_free_stack);
                    }
                    WalAction::Free => {
                        apply_free(header, free_stack_page, reserve_free_stack, entry.page_id)
                            .map_err(|e| wal::WalError::Corrupt(e.to_string()))?;
                    }
                }
                Ok(())
            })?;
        } else {
            log::warn!(
                "discarding unsealed or aborted wal at {}",
                wal_path.display()
            );
        }
        // Either branch leaves the main file's data pages in their final
        // state (replayed, or untouched because nothing had been
        // applied yet) — seal the header as consistent again either way.
        header.set_consistent(true);
        header.checksum = core::compute_checksum(file, page_size, header.maximum_page_id)?;
        core::write_page(file, 0, page_size, &header.to_bytes(page_size))?;
        if reserve_free_stack {
            core::write_page(file, 1, page_size, free_stack_page.data())?;
        }
        file.sync_data()?;
        wal.delete()?;
        Wal::create(wal_path)
    }

    fn ensure_open(&self) -> DiskResult<()> {
        if self.closed {
            return Err(DiskError::Closed);
        }
        Ok(())
    }

    /// Flips the main file's on-disk consistency bit to 0 the first time
    /// this batch stages a write. Writes `committed_header` (the last
    /// known-durable state) rather than
    /// `working_header`, since the latter may already carry staged
    /// allocate/free effects that haven't been replayed into the data
    /// pages yet.
    fn mark_main_dirty_if_first_write(&mut self) -> DiskResult<()> {
        if self.wal.entry_count() == 0 && self.committed_header.is_consistent() {
            let page_size = self.page_size();
            let mut on_disk = self.committed_header;
            on_disk.set_consistent(false);
            core::write_page(&self.file, 0, page_size, &on_disk.to_bytes(page_size))?;
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn check_bounds(&self, page_id: PageId) -> DiskResult<()> {
        if page_id == 0 || page_id > self.working_header.maximum_page_id {
            return Err(DiskError::PageOutOfBounds(page_id));
        }
        Ok(())
    }

    fn reload_from_disk(&mut self) -> DiskResult<()> {
        let page_size = self.page_size();
        let mut buf = [0u8; crate::header::HEADER_LAYOUT_SIZE];
        self.file.read_at(&mut buf, 0)?;
        self.working_header = FileHeader::from_bytes(&buf)?;
        if self.config.reserve_free_stack {
            let mut raw = vec![0u8; page_size];
            core::read_page(&self.file, 1, page_size, &mut raw)?;
            self.free_stack_page.load(&raw);
        }
        Ok(())
    }
}

impl DiskManager for WalDiskManager {
    fn page_size(&self) -> usize {
        1usize << self.config.page_shift
    }

    fn allocated_pages(&self) -> u64 {
        self.working_header.allocated_pages
    }

    fn maximum_page_id(&self) -> u64 {
        self.working_header.maximum_page_id
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
        self.mark_main_dirty_if_first_write()?;
        self.wal.log_update(page_id, buf)?;
        Ok(())
    }

    fn allocate(&mut self) -> DiskResult<PageId> {
        self.ensure_open()?;
        self.mark_main_dirty_if_first_write()?;
        let reused = self.config.reserve_free_stack
            && !LongStack::new(&mut self.free_stack_page).is_empty();
        let page_id = apply_allocate(
            &mut self.working_header,
            &mut self.free_stack_page,
            self.config.reserve_free_stack,
        );
        if reused {
            self.wal.log_allocate_reuse(page_id)?;
        } else {
            self.wal.log_allocate_append(page_id)?;
        }
        log::trace!("wal-backed disk manager staged allocate of page {page_id}");
        Ok(page_id)
    }

    fn free(&mut self, page_id: PageId) -> DiskResult<()> {
        self.ensure_open()?;
        self.check_bounds(page_id)?;
        self.mark_main_dirty_if_first_write()?;
        apply_free(
            &mut self.working_header,
            &mut self.free_stack_page,
            self.config.reserve_free_stack,
            page_id,
        )?;
        self.wal.log_free(page_id)?;
        log::trace!("wal-backed disk manager staged free of page {page_id}");
        Ok(())
    }

    fn commit(&mut self) -> DiskResult<()> {
        self.ensure_open()?;
        if self.wal.entry_count() == 0 {
            return Ok(());
        }
        let page_size = self.page_size();
        let file = &self.file;
        self.wal.replay(|entry: &WalEntry| {
            match entry.action {
                WalAction::Update => {
                    core::write_page(file, entry.page_id, page_size, &entry.payload)
                        .map_err(|e| wal::WalError::Corrupt(e.to_string()))?;
                }
                WalAction::AllocateAppend => {
                    core::extend_to_include(file, entry.page_id, page_size)
                        .map_err(|e| wal::WalError::Corrupt(e.to_string()))?;
                }
                WalAction::AllocateReuse | WalAction::Free => {}
            }
            Ok(())
        })?;
        self.wal.log_commit()?;
        self.working_header.set_consistent(true);
        self.working_header.checksum =
            core::compute_checksum(&self.file, page_size, self.working_header.maximum_page_id)?;
        core::write_page(
            &self.file,
            0,
            page_size,
            &self.working_header.to_bytes(page_size),
        )?;
        if self.config.reserve_free_stack {
            core::write_page(&self.file, 1, page_size, self.free_stack_page.data())?;
        }
        self.file.sync_data()?;
        self.committed_header = self.working_header;

        let wal_path = wal_sibling_path(&self.path);
        let sealed = std::mem::replace(&mut self.wal, Wal::create(&wal_path)?);
        sealed.delete()?;
        log::debug!("wal-backed disk manager committed at {}", self.path.display());
        Ok(())
    }

    fn rollback(&mut self) -> DiskResult<()> {
        self.ensure_open()?;
        let had_staged_writes = self.wal.entry_count() > 0;
        if had_staged_writes {
            self.wal.log_abort()?;
        }
        let wal_path = wal_sibling_path(&self.path);
        let sealed = std::mem::replace(&mut self.wal, Wal::create(&wal_path)?);
        sealed.delete()?;

        // Nothing in the main file's data pages ever changed during
        // staging; only the consistency bit may have been flipped off by
        // `mark_main_dirty_if_first_write`. Restore `committed_header`
        // verbatim rather than `reload_from_disk`'s raw read, so the
        // header's checksum/consistency fields end up exactly as they
        // were before this batch rather than carrying the dirty flag.
        self.working_header = self.committed_header;
        if had_staged_writes {
            let page_size = self.page_size();
            core::write_page(
                &self.file,
                0,
                page_size,
                &self.working_header.to_bytes(page_size),
            )?;
            self.file.sync_data()?;
        }
        self.reload_from_disk()?;
        log::debug!("wal-backed disk manager rolled back at {}", self.path.display());
        Ok(())
    }

    fn close(&mut self) -> DiskResult<()> {
        if !self.closed && self.wal.entry_count() > 0 {
            // Neither committed nor rolled back: discard rather than
            // leave the main header's consistency bit clear with no
            // caller left to finish the transaction.
            DiskManager::rollback(self)?;
        }
        self.closed = true;
        Ok(())
    }

    fn delete(&mut self) -> DiskResult<()> {
        self.close()?;
        let wal_path = wal_sibling_path(&self.path);
        if wal_path.exists() {
            core::remove_file(&wal_path)?;
        }
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
        std::env::temp_dir().join(format!("hare_wal_disk_test_{name}_{n}.hare"))
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(wal_sibling_path(path));
    }

    #[test]
    fn uncommitted_update_is_not_visible_until_commit() {
        let path = temp_path("staged_update");
        cleanup(&path);
        let mut disk = WalDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
        let page_id = disk.allocate().unwrap();

        let image = vec![3u8; disk.page_size()];
        disk.update(page_id, &image).unwrap();

        let mut buf = vec![0u8; disk.page_size()];
        disk.read(page_id, &mut buf).unwrap();
        assert_ne!(buf, image, "read before commit must not see staged bytes");

        disk.commit().unwrap();
        disk.read(page_id, &mut buf).unwrap();
        assert_eq!(buf, image);
        cleanup(&path);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let path = temp_path("rollback");
        cleanup(&path);
        let mut disk = WalDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
        disk.allocate().unwrap();
        disk.rollback().unwrap();

        assert_eq!(disk.allocated_pages(), 0);
        assert_eq!(disk.maximum_page_id(), 1);
        cleanup(&path);
    }

    #[test]
    fn recovers_committed_wal_after_reopen_without_explicit_commit_call() {
        let path = temp_path("crash_commit");
        cleanup(&path);
        let page_id;
        {
            let mut disk = WalDiskManager::create(&path, DiskManagerConfig::new(12)).unwrap();
            page_id = disk.allocate().unwrap();
            disk.update(page_id, &vec![7u8; disk.page_size()]).unwrap();
            disk.wal.log_commit().unwrap();
            // Simulate a crash: header/free-stack page were never flushed,
            // only the wal's own commit seal was durable.
        }

        let mut disk = WalDiskManager::open(&path).unwrap();
        let mut buf = vec![0u8; disk.page_size()];
        disk.read(page_id, &mut buf).unwrap();
        assert_eq!(buf[0], 7);
        assert_eq!(disk.allocated_pages(), 1);
        cleanup(&path);
    }
}
