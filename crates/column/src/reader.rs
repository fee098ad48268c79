//! Per-transaction read handle over a [`FixedColumnFile`]. Grounded on
//! the same buffer-pool-handle idiom as `storage::buffer::PageRef`;
//! every access takes the column's file lock in shared mode (so readers
//! never block each other) and the relevant page's own latch in shared
//! mode via [`storage::PageRef::read`].

use std::sync::Arc;

use common::TupleId;

use crate::error::{ColumnError, ColumnResult};
use crate::file::FixedColumnFile;
use crate::lock::{LockHandle, LockMode};
use crate::types::ColumnValue;

/// Bit layout of the 4-byte entry-flags word: bit NULL = 2, bit
/// DELETED = 4. Standardized on the 4-byte variant per DESIGN.md's
/// Open Question resolution.
pub(crate) const FLAG_NULL: u32 = 2;
pub(crate) const FLAG_DELETED: u32 = 4;

pub struct ColumnReader {
    file: Arc<FixedColumnFile>,
    lock: Option<LockHandle>,
}

impl ColumnReader {
    /// Opens a reader against `file`, taking the file lock in shared
    /// mode for the reader's whole lifetime.
    pub fn open(file: Arc<FixedColumnFile>) -> Self {
        let lock = file.obtain_lock(LockMode::Shared);
        Self {
            file,
            lock: Some(lock),
        }
    }

    fn ensure_open(&self) -> ColumnResult<()> {
        if self.lock.is_none() {
            return Err(ColumnError::ResourceClosed);
        }
        Ok(())
    }

    fn check_bounds(&self, tuple_id: TupleId) -> ColumnResult<()> {
        match self.file.read_header()?.max_tuple_id() {
            Some(max) if tuple_id <= max => Ok(()),
            _ => Err(ColumnError::TupleIdOutOfBounds(tuple_id)),
        }
    }

    fn read_flags(&self, tuple_id: TupleId) -> ColumnResult<u32> {
        let (page_id, slot_id) = self.file.to_address(tuple_id);
        let offset = slot_id as usize * self.file.entry_size();
        let page_ref = self.file.pool().fetch_page(page_id)?;
        let flags = page_ref.read(|page| page.get_u32(offset))?;
        page_ref.unpin(false);
        Ok(flags)
    }

    /// Returns the deserialized value, `None` if null. Raises
    /// `EntryDeleted` if the tuple's DELETED flag is set.
    pub fn get(&self, tuple_id: TupleId) -> ColumnResult<Option<ColumnValue>> {
        self.ensure_open()?;
        self.check_bounds(tuple_id)?;
        let (page_id, slot_id) = self.file.to_address(tuple_id);
        let offset = slot_id as usize * self.file.entry_size();
        let page_ref = self.file.pool().fetch_page(page_id)?;
        let result = page_ref.read(|page| -> ColumnResult<Option<ColumnValue>> {
            let flags = page.get_u32(offset)?;
            if flags & FLAG_DELETED != 0 {
                return Err(ColumnError::EntryDeleted(tuple_id));
            }
            if flags & FLAG_NULL != 0 {
                return Ok(None);
            }
            Ok(Some(self.file.serializer().deserialize(page, offset + 4)?))
        });
        page_ref.unpin(false);
        result
    }

    pub fn count(&self) -> ColumnResult<u64> {
        self.ensure_open()?;
        Ok(self.file.read_header()?.count)
    }

    pub fn max_tuple_id(&self) -> ColumnResult<Option<TupleId>> {
        self.ensure_open()?;
        Ok(self.file.read_header()?.max_tuple_id())
    }

    pub fn is_null(&self, tuple_id: TupleId) -> ColumnResult<bool> {
        self.ensure_open()?;
        self.check_bounds(tuple_id)?;
        Ok(self.read_flags(tuple_id)? & FLAG_NULL != 0)
    }

    pub fn is_deleted(&self, tuple_id: TupleId) -> ColumnResult<bool> {
        self.ensure_open()?;
        self.check_bounds(tuple_id)?;
        Ok(self.read_flags(tuple_id)? & FLAG_DELETED != 0)
    }

    /// Releases the column-file lock handle. Idempotent.
    pub fn close(&mut self) {
        self.lock = None;
    }
}
