//! Shared file-level plumbing used by both [`super::DirectDiskManager`]
//! and [`super::WalDiskManager`]: opening and locking the backing file,
//! positional page reads/writes, and the whole-file CRC32C checksum.
//! Grounded on `storage::disk::DiskManager`'s use of
//! `std::os::unix::fs::FileExt::{read_at, write_at}`
//! (`crates/storage/src/disk.rs:11,70-115`).

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::{Duration, Instant};

use common::PageId;
use fs2::FileExt as _;

use super::{DiskError, DiskResult};

/// Default timeout for acquiring the exclusive OS file lock on open
/// (configurable; defaults to 5 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Spacing between retries while polling for the exclusive lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Retries `try_lock_exclusive` until it succeeds or `timeout` elapses.
/// `fs2` has no blocking-with-timeout primitive, only an unbounded
/// blocking lock and a non-blocking try-lock, so the timeout is built by
/// polling the non-blocking variant.
fn lock_exclusive_with_timeout(file: &File, path: &Path, timeout: Duration) -> DiskResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(_) => return Err(DiskError::Locked(path.display().to_string())),
        }
    }
}

pub(super) fn create_locked_file(path: &Path, lock_timeout: Duration) -> DiskResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)?;
    lock_exclusive_with_timeout(&file, path, lock_timeout)?;
    Ok(file)
}

pub(super) fn open_locked_file(path: &Path, lock_timeout: Duration) -> DiskResult<File> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    lock_exclusive_with_timeout(&file, path, lock_timeout)?;
    Ok(file)
}

pub(super) fn page_offset(page_id: PageId, page_size: usize) -> u64 {
    page_id * page_size as u64
}

pub(super) fn read_page(
    file: &File,
    page_id: PageId,
    page_size: usize,
    buf: &mut [u8],
) -> DiskResult<()> {
    if buf.len() != page_size {
        return Err(DiskError::BufferSize {
            expected: page_size,
            actual: buf.len(),
        });
    }
    file.read_at(buf, page_offset(page_id, page_size))?;
    Ok(())
}

/// Reads `page_count` consecutive pages starting at `start_id` in one
/// positional read, rather than one syscall per page.
pub(super) fn read_range(
    file: &File,
    start_id: PageId,
    page_size: usize,
    page_count: usize,
    buf: &mut [u8],
) -> DiskResult<()> {
    let expected = page_size * page_count;
    if buf.len() != expected {
        return Err(DiskError::BufferSize {
            expected,
            actual: buf.len(),
        });
    }
    file.read_at(buf, page_offset(start_id, page_size))?;
    Ok(())
}

pub(super) fn write_page(
    file: &File,
    page_id: PageId,
    page_size: usize,
    buf: &[u8],
) -> DiskResult<()> {
    if buf.len() != page_size {
        return Err(DiskError::BufferSize {
            expected: page_size,
            actual: buf.len(),
        });
    }
    file.write_at(buf, page_offset(page_id, page_size))?;
    Ok(())
}

/// Grows the file so that `page_id` exists, by writing a single
/// trailing zero byte at its last offset — a sparse-extend trick for
/// preallocating a batch of trailing pages in one syscall instead of
/// zero-filling each page explicitly.
pub(super) fn extend_to_include(file: &File, page_id: PageId, page_size: usize) -> DiskResult<()> {
    let last_byte = page_offset(page_id, page_size) + page_size as u64 - 1;
    file.write_at(&[0u8], last_byte)?;
    Ok(())
}

pub(super) fn truncate_to(file: &File, maximum_page_id: PageId, page_size: usize) -> DiskResult<()> {
    let new_len = page_offset(maximum_page_id, page_size) + page_size as u64;
    file.set_len(new_len)?;
    Ok(())
}

/// CRC32C over every page from PageId 1 through `maximum_page_id`
/// inclusive — the header page itself (PageId 0) is excluded.
pub(super) fn compute_checksum(file: &File, page_size: usize, maximum_page_id: u64) -> DiskResult<u64> {
    let mut running = 0u32;
    let mut buf = vec![0u8; page_size];
    let file_len = file.metadata()?.len();
    for page_id in 1..=maximum_page_id {
        let offset = page_offset(page_id, page_size);
        if offset + page_size as u64 > file_len {
            buf.fill(0);
        } else {
            file.read_at(&mut buf, offset)?;
        }
        running = crc32c::crc32c_append(running, &buf);
    }
    Ok(running as u64)
}

pub(super) fn remove_file(path: &Path) -> DiskResult<()> {
    fs::remove_file(path)?;
    Ok(())
}
