//! Per-transaction write handle over a [`FixedColumnFile`]: `update`,
//! `compareAndUpdate`, `delete`, `append`, plus `commit`/`rollback`
//! pass-through to the underlying buffer pool and disk manager. Exactly
//! one writer coexists with any number of readers, enforced by the
//! exclusive file lock taken at `open()`.

use std::sync::Arc;

use common::TupleId;

use crate::error::{ColumnError, ColumnResult};
use crate::file::FixedColumnFile;
use crate::lock::{LockHandle, LockMode};
use crate::reader::{FLAG_DELETED, FLAG_NULL};
use crate::types::ColumnValue;

pub struct ColumnWriter {
    file: Arc<FixedColumnFile>,
    lock: Option<LockHandle>,
}

impl ColumnWriter {
    /// Opens a writer against `file`, taking the file lock in exclusive
    /// mode for the writer's whole lifetime — blocking until every
    /// existing reader (and any other writer) has released it.
    pub fn open(file: Arc<FixedColumnFile>) -> Self {
        let lock = file.obtain_lock(LockMode::Exclusive);
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

    fn check_value_type(&self, value: &ColumnValue) -> ColumnResult<()> {
        if value.column_type() != self.file.column_type() {
            return Err(ColumnError::TypeMismatch);
        }
        Ok(())
    }

    fn check_bounds(&self, tuple_id: TupleId) -> ColumnResult<()> {
        match self.file.read_header()?.max_tuple_id() {
            Some(max) if tuple_id <= max => Ok(()),
            _ => Err(ColumnError::TupleIdOutOfBounds(tuple_id)),
        }
    }

    /// Writes `value` at `tuple_id`'s slot: `None` sets the NULL flag and
    /// zeroes the payload (raising `NullValueNotAllowed` on a
    /// non-nullable column); `Some` clears NULL and serializes.
    pub fn update(&mut self, tuple_id: TupleId, value: Option<ColumnValue>) -> ColumnResult<()> {
        self.ensure_open()?;
        self.check_bounds(tuple_id)?;
        if value.is_none() && !self.file.nullable() {
            return Err(ColumnError::NullValueNotAllowed);
        }
        if let Some(v) = &value {
            self.check_value_type(v)?;
        }

        let (page_id, slot_id) = self.file.to_address(tuple_id);
        let offset = slot_id as usize * self.file.entry_size();
        let page_ref = self.file.pool().fetch_page(page_id)?;
        let result = page_ref.write(|page| -> ColumnResult<()> {
            let flags = page.get_u32(offset)?;
            if flags & FLAG_DELETED != 0 {
                return Err(ColumnError::EntryDeleted(tuple_id));
            }
            match &value {
                None => {
                    page.put_u32(offset, FLAG_NULL)?;
                    page.put_bytes(offset + 4, &vec![0u8; self.file.entry_size() - 4])?;
                }
                Some(v) => {
                    page.put_u32(offset, 0)?;
                    self.file.serializer().serialize(page, offset + 4, v)?;
                }
            }
            Ok(())
        });
        page_ref.unpin(result.is_ok());
        result
    }

    /// Reads the current value honouring flags; if it doesn't equal
    /// `expected`, returns `false` without mutating. Otherwise performs
    /// the same update as [`Self::update`], atomically with respect to
    /// other writers (there is only ever one, per the exclusive file
    /// lock) by holding the page write latch across the whole
    /// compare-then-write.
    pub fn compare_and_update(
        &mut self,
        tuple_id: TupleId,
        expected: Option<ColumnValue>,
        new: Option<ColumnValue>,
    ) -> ColumnResult<bool> {
        self.ensure_open()?;
        self.check_bounds(tuple_id)?;
        if new.is_none() && !self.file.nullable() {
            return Err(ColumnError::NullValueNotAllowed);
        }
        if let Some(v) = &new {
            self.check_value_type(v)?;
        }

        let (page_id, slot_id) = self.file.to_address(tuple_id);
        let offset = slot_id as usize * self.file.entry_size();
        let page_ref = self.file.pool().fetch_page(page_id)?;
        let result = page_ref.write(|page| -> ColumnResult<bool> {
            let flags = page.get_u32(offset)?;
            if flags & FLAG_DELETED != 0 {
                return Err(ColumnError::EntryDeleted(tuple_id));
            }
            let current = if flags & FLAG_NULL != 0 {
                None
            } else {
                Some(self.file.serializer().deserialize(page, offset + 4)?)
            };
            if current != expected {
                return Ok(false);
            }
            match &new {
                None => {
                    page.put_u32(offset, FLAG_NULL)?;
                    page.put_bytes(offset + 4, &vec![0u8; self.file.entry_size() - 4])?;
                }
                Some(v) => {
                    page.put_u32(offset, 0)?;
                    self.file.serializer().serialize(page, offset + 4, v)?;
                }
            }
            Ok(true)
        });
        match &result {
            Ok(changed) => page_ref.unpin(*changed),
            Err(_) => page_ref.unpin(false),
        }
        result
    }

    /// Sets the DELETED flag and zeroes the payload, adjusting the
    /// header's `count`/`deleted` counters. Returns the value the tuple
    /// held immediately before deletion.
    pub fn delete(&mut self, tuple_id: TupleId) -> ColumnResult<Option<ColumnValue>> {
        self.ensure_open()?;
        self.check_bounds(tuple_id)?;

        let (page_id, slot_id) = self.file.to_address(tuple_id);
        let offset = slot_id as usize * self.file.entry_size();
        let page_ref = self.file.pool().fetch_page(page_id)?;
        let result = page_ref.write(|page| -> ColumnResult<Option<ColumnValue>> {
            let flags = page.get_u32(offset)?;
            if flags & FLAG_DELETED != 0 {
                return Err(ColumnError::EntryDeleted(tuple_id));
            }
            let previous = if flags & FLAG_NULL != 0 {
                None
            } else {
                Some(self.file.serializer().deserialize(page, offset + 4)?)
            };
            page.put_u32(offset, FLAG_DELETED)?;
            page.put_bytes(offset + 4, &vec![0u8; self.file.entry_size() - 4])?;
            Ok(previous)
        });
        page_ref.unpin(result.is_ok());
        let previous = result?;

        let mut header = self.file.read_header()?;
        header.count -= 1;
        header.deleted += 1;
        self.file.write_header(&header)?;

        log::trace!("column writer deleted tuple {tuple_id}");
        Ok(previous)
    }

    /// Appends `value` as a brand-new tuple, returning its freshly
    /// minted id. Grows the file with a new data page first if the
    /// computed address falls past every page allocated so far.
    pub fn append(&mut self, value: Option<ColumnValue>) -> ColumnResult<TupleId> {
        self.ensure_open()?;
        if value.is_none() && !self.file.nullable() {
            return Err(ColumnError::NullValueNotAllowed);
        }
        if let Some(v) = &value {
            self.check_value_type(v)?;
        }

        let mut header = self.file.read_header()?;
        let tuple_id = match header.max_tuple_id() {
            Some(max) => max + 1,
            None => 0,
        };
        let (page_id, slot_id) = self.file.to_address(tuple_id);
        self.file.ensure_data_page(page_id)?;

        let offset = slot_id as usize * self.file.entry_size();
        let page_ref = self.file.pool().fetch_page(page_id)?;
        page_ref.write(|page| -> ColumnResult<()> {
            match &value {
                None => {
                    page.put_u32(offset, FLAG_NULL)?;
                }
                Some(v) => {
                    page.put_u32(offset, 0)?;
                    self.file.serializer().serialize(page, offset + 4, v)?;
                }
            }
            Ok(())
        })?;
        page_ref.unpin(true);

        header.set_max_tuple_id(tuple_id);
        header.count += 1;
        self.file.write_header(&header)?;

        log::trace!("column writer appended tuple {tuple_id}");
        Ok(tuple_id)
    }

    /// Flushes the buffer pool and durably commits the disk manager.
    pub fn commit(&mut self) -> ColumnResult<()> {
        self.ensure_open()?;
        self.file.commit()
    }

    /// Discards in-memory mutations and rolls back the disk manager.
    pub fn rollback(&mut self) -> ColumnResult<()> {
        self.ensure_open()?;
        self.file.rollback()
    }

    /// Releases the column-file lock handle. Idempotent.
    pub fn close(&mut self) {
        self.lock = None;
    }
}
