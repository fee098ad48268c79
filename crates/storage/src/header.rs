use thiserror::Error;

/// File-header magic, "HARE" as 8 bytes of big-endian UTF-16 — chosen
/// over a plainer 4-byte ASCII encoding to match the WAL header's own
/// magic in `crates/wal`.
pub const MAGIC: [u8; 8] = *b"\x00H\x00A\x00R\x00E";
pub const FILE_TYPE_DEFAULT: u32 = 0;
pub const FILE_TYPE_WAL: u32 = 1;
pub const CURRENT_VERSION: u32 = 1;
pub const CONSISTENCY_OK_BIT: u64 = 1;
/// Set when PageId 1 is reserved for the free-page `LongStack`. Cleared
/// for column files, whose disk manager hands PageId 1 to the column
/// header instead — see DESIGN.md's "PageId 1 contradiction" entry.
pub const FREE_STACK_RESERVED_BIT: u64 = 2;

/// Byte layout: magic(8) type(4) version(4) page_shift(4) flags(8)
/// allocated_pages(8) maximum_page_id(8) dangling_pages(8) checksum(8),
/// the remainder of the page reserved.
pub const HEADER_LAYOUT_SIZE: usize = 8 + 4 + 4 + 4 + 8 + 8 + 8 + 8 + 8;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("bad magic in file header")]
    BadMagic,
    #[error("unsupported file version {0}")]
    UnsupportedVersion(u32),
    #[error("page shift {0} out of range")]
    BadPageShift(u32),
    #[error("header buffer too small: {0} bytes")]
    BufferTooSmall(usize),
}

/// The first page of every `.hare` file: magic, format version, the
/// file's `pageShift`, consistency/flags, and the allocation/checksum
/// bookkeeping the disk manager mutates on every allocate/free.
///
/// Grounded on `storage::disk::Header` (`to_bytes`/`from_bytes` over a
/// page-sized buffer), generalized from its one `next_page_id: u64`
/// field to the full allocation/checksum field set here, plus the
/// CRC32C checksum (new dependency: `crc32c`, see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub file_type: u32,
    pub version: u32,
    pub page_shift: u32,
    pub flags: u64,
    pub allocated_pages: u64,
    pub maximum_page_id: u64,
    pub dangling_pages: u64,
    pub checksum: u64,
}

impl FileHeader {
    pub fn new_default(page_shift: u32) -> Self {
        Self {
            file_type: FILE_TYPE_DEFAULT,
            version: CURRENT_VERSION,
            page_shift,
            flags: 0,
            allocated_pages: 0,
            maximum_page_id: 1,
            dangling_pages: 0,
            checksum: 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.flags & CONSISTENCY_OK_BIT != 0
    }

    pub fn set_consistent(&mut self, consistent: bool) {
        if consistent {
            self.flags |= CONSISTENCY_OK_BIT;
        } else {
            self.flags &= !CONSISTENCY_OK_BIT;
        }
    }

    pub fn has_free_stack(&self) -> bool {
        self.flags & FREE_STACK_RESERVED_BIT != 0
    }

    pub fn set_has_free_stack(&mut self, reserved: bool) {
        if reserved {
            self.flags |= FREE_STACK_RESERVED_BIT;
        } else {
            self.flags &= !FREE_STACK_RESERVED_BIT;
        }
    }

    pub fn to_bytes(&self, page_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.file_type.to_be_bytes());
        buf[12..16].copy_from_slice(&self.version.to_be_bytes());
        buf[16..20].copy_from_slice(&self.page_shift.to_be_bytes());
        buf[20..28].copy_from_slice(&self.flags.to_be_bytes());
        buf[28..36].copy_from_slice(&self.allocated_pages.to_be_bytes());
        buf[36..44].copy_from_slice(&self.maximum_page_id.to_be_bytes());
        buf[44..52].copy_from_slice(&self.dangling_pages.to_be_bytes());
        buf[52..60].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_LAYOUT_SIZE {
            return Err(HeaderError::BufferTooSmall(buf.len()));
        }
        if buf[0..8] != MAGIC {
            return Err(HeaderError::BadMagic);
        }
        let file_type = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let version = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        if version != CURRENT_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let page_shift = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        if !(10..=22).contains(&page_shift) {
            return Err(HeaderError::BadPageShift(page_shift));
        }
        let flags = u64::from_be_bytes(buf[20..28].try_into().unwrap());
        let allocated_pages = u64::from_be_bytes(buf[28..36].try_into().unwrap());
        let maximum_page_id = u64::from_be_bytes(buf[36..44].try_into().unwrap());
        let dangling_pages = u64::from_be_bytes(buf[44..52].try_into().unwrap());
        let checksum = u64::from_be_bytes(buf[52..60].try_into().unwrap());
        Ok(Self {
            file_type,
            version,
            page_shift,
            flags,
            allocated_pages,
            maximum_page_id,
            dangling_pages,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut header = FileHeader::new_default(12);
        header.set_consistent(true);
        header.allocated_pages = 7;
        header.maximum_page_id = 8;
        header.checksum = 0xABCD;
        let bytes = header.to_bytes(4096);
        let restored = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, restored);
        assert!(restored.is_consistent());
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 4096];
        assert!(matches!(FileHeader::from_bytes(&buf), Err(HeaderError::BadMagic)));
    }
}
