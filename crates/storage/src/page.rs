use common::PageId;

/// Smallest and largest page shifts the file format allows (`pageShift
/// ∈ [10, 22]`). `column::FixedColumnFile::create_direct`/`create_wal`
/// reuse this same range when picking the page shift that minimizes
/// wasted bytes for a given entry size.
pub const MIN_PAGE_SHIFT: u32 = 10;
pub const MAX_PAGE_SHIFT: u32 = 22;

/// In-memory page container: a runtime-sized byte buffer plus the dirty
/// bit the buffer pool uses to decide whether to flush on eviction.
///
/// Generalized from `storage::page::Page`, which backs every page with
/// a compile-time `[u8; PAGE_SIZE]` array — here `pageShift` can vary
/// per file, so the buffer is sized at construction instead.
#[derive(Debug, Clone)]
pub struct Page {
    data: Box<[u8]>,
    page_id: Option<PageId>,
    is_dirty: bool,
}

impl Page {
    /// Creates a zeroed page of `2^page_shift` bytes with no identity.
    pub fn new(page_shift: u32) -> Self {
        assert!(
            (MIN_PAGE_SHIFT..=MAX_PAGE_SHIFT).contains(&page_shift),
            "page_shift {page_shift} out of range"
        );
        Self {
            data: vec![0u8; 1usize << page_shift].into_boxed_slice(),
            page_id: None,
            is_dirty: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: Option<PageId>) {
        self.page_id = page_id;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn clear_dirty(&mut self) {
        self.is_dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reloads the page's content from `bytes`, without marking dirty —
    /// used by the buffer pool right after reading from disk.
    pub fn load(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.data.len());
        self.data.copy_from_slice(bytes);
        self.is_dirty = false;
    }

    /// Resets to an all-zero, unidentified page, ready for frame reuse.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = None;
        self.is_dirty = false;
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), PageAccessError> {
        if offset.checked_add(len).is_none_or(|end| end > self.data.len()) {
            return Err(PageAccessError::OutOfRange {
                offset,
                len,
                page_size: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn get_bytes(&self, offset: usize, len: usize) -> Result<&[u8], PageAccessError> {
        self.check_range(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), PageAccessError> {
        self.check_range(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.is_dirty = true;
        Ok(())
    }

    pub fn get_byte(&self, offset: usize) -> Result<u8, PageAccessError> {
        self.check_range(offset, 1)?;
        Ok(self.data[offset])
    }

    pub fn put_byte(&mut self, offset: usize, value: u8) -> Result<(), PageAccessError> {
        self.check_range(offset, 1)?;
        self.data[offset] = value;
        self.is_dirty = true;
        Ok(())
    }
}

macro_rules! typed_accessor {
    ($get:ident, $put:ident, $ty:ty) => {
        impl Page {
            pub fn $get(&self, offset: usize) -> Result<$ty, PageAccessError> {
                let bytes = self.get_bytes(offset, std::mem::size_of::<$ty>())?;
                Ok(<$ty>::from_be_bytes(bytes.try_into().unwrap()))
            }

            pub fn $put(&mut self, offset: usize, value: $ty) -> Result<(), PageAccessError> {
                self.put_bytes(offset, &value.to_be_bytes())
            }
        }
    };
}

typed_accessor!(get_i16, put_i16, i16);
typed_accessor!(get_u16, put_u16, u16);
typed_accessor!(get_i32, put_i32, i32);
typed_accessor!(get_u32, put_u32, u32);
typed_accessor!(get_i64, put_i64, i64);
typed_accessor!(get_u64, put_u64, u64);
typed_accessor!(get_f32, put_f32, f32);
typed_accessor!(get_f64, put_f64, f64);

#[derive(Debug, thiserror::Error)]
pub enum PageAccessError {
    #[error("page access out of range: offset={offset} len={len} page_size={page_size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        page_size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip() {
        let mut page = Page::new(12);
        page.put_u64(0, 0xDEAD_BEEF_CAFE_F00D).unwrap();
        assert_eq!(page.get_u64(0).unwrap(), 0xDEAD_BEEF_CAFE_F00D);
        assert!(page.is_dirty());
    }

    #[test]
    fn out_of_range_rejected() {
        let page = Page::new(10);
        assert!(page.get_bytes(page.page_size() - 2, 4).is_err());
    }

    #[test]
    fn reset_clears_identity_and_dirty() {
        let mut page = Page::new(12);
        page.set_page_id(Some(5));
        page.put_byte(0, 9).unwrap();
        page.reset();
        assert_eq!(page.page_id(), None);
        assert!(!page.is_dirty());
        assert_eq!(page.get_byte(0).unwrap(), 0);
    }
}
