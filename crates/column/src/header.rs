//! View over the column header page (PageId 1 of a `.hare` column file).
//! Layout: page-type tag(4) type-ordinal(4) logical-size(4)
//! physical-entry-size(4) flags(8) count(8) deleted(8) max-tuple-id(8).
//! Grounded on `storage::header::FileHeader`'s "`to_bytes`/`from_bytes`
//! over a page buffer" style.

use common::TupleId;

use crate::error::{ColumnError, ColumnResult};
use crate::types::ColumnType;

/// Page-type tag stored in the first 4 bytes of the header page,
/// distinguishing it from a plain data page if ever inspected out of
/// context.
pub const HEADER_FIXED_COLUMN: u32 = 0xC0_1A_0001;
const NULLABLE_BIT: u64 = 1;

pub const HEADER_LAYOUT_SIZE: usize = 4 + 4 + 4 + 4 + 8 + 8 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnHeader {
    pub column_type_ordinal: u32,
    pub logical_size: i32,
    pub physical_entry_size: u32,
    pub flags: u64,
    pub count: u64,
    pub deleted: u64,
    /// `-1` when the column is empty (no tuple has ever been appended).
    max_tuple_id_raw: i64,
}

impl ColumnHeader {
    pub fn new(column_type: ColumnType, entry_size: u32, nullable: bool) -> Self {
        let mut flags = 0u64;
        if nullable {
            flags |= NULLABLE_BIT;
        }
        Self {
            column_type_ordinal: column_type.ordinal(),
            logical_size: column_type.logical_size(),
            physical_entry_size: entry_size,
            flags,
            count: 0,
            deleted: 0,
            max_tuple_id_raw: -1,
        }
    }

    pub fn nullable(&self) -> bool {
        self.flags & NULLABLE_BIT != 0
    }

    pub fn max_tuple_id(&self) -> Option<TupleId> {
        if self.max_tuple_id_raw < 0 {
            None
        } else {
            Some(self.max_tuple_id_raw as TupleId)
        }
    }

    pub fn set_max_tuple_id(&mut self, tuple_id: TupleId) {
        self.max_tuple_id_raw = tuple_id as i64;
    }

    pub fn column_type(&self) -> ColumnResult<ColumnType> {
        ColumnType::from_ordinal(self.column_type_ordinal, self.logical_size)
    }

    pub fn to_bytes(self) -> [u8; HEADER_LAYOUT_SIZE] {
        let mut buf = [0u8; HEADER_LAYOUT_SIZE];
        buf[0..4].copy_from_slice(&HEADER_FIXED_COLUMN.to_be_bytes());
        buf[4..8].copy_from_slice(&self.column_type_ordinal.to_be_bytes());
        buf[8..12].copy_from_slice(&self.logical_size.to_be_bytes());
        buf[12..16].copy_from_slice(&self.physical_entry_size.to_be_bytes());
        buf[16..24].copy_from_slice(&self.flags.to_be_bytes());
        buf[24..32].copy_from_slice(&self.count.to_be_bytes());
        buf[32..40].copy_from_slice(&self.deleted.to_be_bytes());
        buf[40..48].copy_from_slice(&self.max_tuple_id_raw.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> ColumnResult<Self> {
        if buf.len() < HEADER_LAYOUT_SIZE {
            return Err(ColumnError::PageAccess(
                storage::PageAccessError::OutOfRange {
                    offset: 0,
                    len: HEADER_LAYOUT_SIZE,
                    page_size: buf.len(),
                },
            ));
        }
        let column_type_ordinal = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let logical_size = i32::from_be_bytes(buf[8..12].try_into().unwrap());
        let physical_entry_size = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let flags = u64::from_be_bytes(buf[16..24].try_into().unwrap());
        let count = u64::from_be_bytes(buf[24..32].try_into().unwrap());
        let deleted = u64::from_be_bytes(buf[32..40].try_into().unwrap());
        let max_tuple_id_raw = i64::from_be_bytes(buf[40..48].try_into().unwrap());
        Ok(Self {
            column_type_ordinal,
            logical_size,
            physical_entry_size,
            flags,
            count,
            deleted,
            max_tuple_id_raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut header = ColumnHeader::new(ColumnType::Double, 12, true);
        header.count = 5;
        header.deleted = 1;
        header.set_max_tuple_id(4);
        let bytes = header.to_bytes();
        let restored = ColumnHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, restored);
        assert!(restored.nullable());
        assert_eq!(restored.max_tuple_id(), Some(4));
    }

    #[test]
    fn empty_column_has_no_max_tuple_id() {
        let header = ColumnHeader::new(ColumnType::Integer, 8, false);
        assert_eq!(header.max_tuple_id(), None);
        assert!(!header.nullable());
    }
}
