//! Forward-only iteration over a window of tuple ids, skipping deleted
//! entries. The cursor does not read payloads; it is intended to drive
//! a reader — it inspects only each slot's 4-byte flags word, never
//! calls into a [`crate::Serializer`]. Takes the file lock in shared
//! mode, same as [`crate::ColumnReader`], so any number of cursors and
//! readers coexist but a writer excludes all of them.

use std::sync::Arc;

use common::TupleId;

use crate::error::{ColumnError, ColumnResult};
use crate::file::FixedColumnFile;
use crate::lock::{LockHandle, LockMode};
use crate::reader::FLAG_DELETED;

pub struct ColumnCursor {
    file: Arc<FixedColumnFile>,
    lock: Option<LockHandle>,
    end: Option<TupleId>,
    pending: TupleId,
}

impl ColumnCursor {
    /// Opens a cursor over `[0, maxTupleId]` as it stands at open time —
    /// the range defaults to `[0, maxTupleId]` captured at construction
    /// time, so later appends are not observed.
    pub fn open(file: Arc<FixedColumnFile>) -> ColumnResult<Self> {
        Self::open_range_inner(file, 0, None)
    }

    /// Opens a cursor restricted to `[start, end]`, clamped to the
    /// column's actual tuple range at open time.
    pub fn open_range(
        file: Arc<FixedColumnFile>,
        start: TupleId,
        end: TupleId,
    ) -> ColumnResult<Self> {
        Self::open_range_inner(file, start, Some(end))
    }

    fn open_range_inner(
        file: Arc<FixedColumnFile>,
        start: TupleId,
        end: Option<TupleId>,
    ) -> ColumnResult<Self> {
        let lock = file.obtain_lock(LockMode::Shared);
        let max = file.read_header()?.max_tuple_id();
        let end = match (end, max) {
            (Some(end), Some(max)) => Some(end.min(max)),
            (None, max) => max,
            (Some(_), None) => None,
        };
        Ok(Self {
            file,
            lock: Some(lock),
            end,
            pending: start,
        })
    }

    fn ensure_open(&self) -> ColumnResult<()> {
        if self.lock.is_none() {
            return Err(ColumnError::ResourceClosed);
        }
        Ok(())
    }

    fn flags_at(&self, tuple_id: TupleId) -> ColumnResult<u32> {
        let (page_id, slot_id) = self.file.to_address(tuple_id);
        let offset = slot_id as usize * self.file.entry_size();
        let page_ref = self.file.pool().fetch_page(page_id)?;
        let flags = page_ref.read(|page| page.get_u32(offset))?;
        page_ref.unpin(false);
        Ok(flags)
    }

    /// Advances `pending` past any run of deleted tuples, then reports
    /// whether a live or null tuple remains before `end`.
    pub fn has_next(&mut self) -> ColumnResult<bool> {
        self.ensure_open()?;
        let Some(end) = self.end else {
            return Ok(false);
        };
        while self.pending <= end {
            if self.flags_at(self.pending)? & FLAG_DELETED == 0 {
                return Ok(true);
            }
            self.pending += 1;
        }
        Ok(false)
    }

    /// Returns the current tuple id and advances past it. Callers pair
    /// this with a [`crate::ColumnReader`] to fetch the value; the
    /// cursor itself never deserializes a payload.
    pub fn next(&mut self) -> ColumnResult<Option<TupleId>> {
        if !self.has_next()? {
            return Ok(None);
        }
        let tuple_id = self.pending;
        self.pending += 1;
        Ok(Some(tuple_id))
    }

    /// Releases the column-file lock handle. Idempotent.
    pub fn close(&mut self) {
        self.lock = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FixedColumnFile;
    use crate::reader::ColumnReader;
    use crate::types::{ColumnType, ColumnValue};
    use crate::writer::ColumnWriter;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_path(name: &str) -> std::path::PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("hare_column_cursor_test_{name}_{n}.hare"))
    }

    #[test]
    fn cursor_skips_deleted_tuples() {
        let path = temp_path("skip_deleted");
        let _ = std::fs::remove_file(&path);
        let file =
            Arc::new(FixedColumnFile::create_direct(&path, ColumnType::Integer, false).unwrap());

        {
            let mut writer = ColumnWriter::open(file.clone());
            for i in 0..5 {
                writer.append(Some(ColumnValue::Integer(i))).unwrap();
            }
            writer.delete(2).unwrap();
            writer.commit().unwrap();
        }

        let reader = ColumnReader::open(file.clone());
        let mut cursor = ColumnCursor::open(file.clone()).unwrap();
        let mut seen = Vec::new();
        while let Some(tuple_id) = cursor.next().unwrap() {
            seen.push((tuple_id, reader.get(tuple_id).unwrap()));
        }
        assert_eq!(
            seen,
            vec![
                (0, Some(ColumnValue::Integer(0))),
                (1, Some(ColumnValue::Integer(1))),
                (3, Some(ColumnValue::Integer(3))),
                (4, Some(ColumnValue::Integer(4))),
            ]
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_column_cursor_has_no_next() {
        let path = temp_path("empty");
        let _ = std::fs::remove_file(&path);
        let file = Arc::new(FixedColumnFile::create_direct(&path, ColumnType::Boolean, false).unwrap());
        let mut cursor = ColumnCursor::open(file).unwrap();
        assert!(!cursor.has_next().unwrap());
        assert_eq!(cursor.next().unwrap(), None);
        let _ = std::fs::remove_file(&path);
    }
}
