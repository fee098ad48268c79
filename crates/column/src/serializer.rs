//! Serializer registry: one [`Serializer`] per [`ColumnType`], each
//! knowing its own on-disk byte width and how to read/write a value at an
//! arbitrary page offset. Grounded on `storage::page::Page`'s typed
//! accessors (`get_f64`/`put_f64`, etc. in `crates/storage/src/page.rs`)
//! — a serializer is a thin, type-specific wrapper over those. A closed
//! enumeration of known column types maps to trait objects rather than
//! an open plugin registry.

use storage::Page;

use crate::error::ColumnResult;
use crate::types::{ColumnType, ColumnValue};

/// `logical_size`/`physical_size`/`serialize`/`deserialize` contract.
/// `deserialize(serialize(x)) == x` for every in-domain value.
pub trait Serializer: Send + Sync {
    /// Structural element count; `-1` for scalars.
    fn logical_size(&self) -> i32;
    /// Bytes on disk, excluding the 4-byte entry-flags header.
    fn physical_size(&self) -> usize;
    fn serialize(&self, page: &mut Page, offset: usize, value: &ColumnValue) -> ColumnResult<()>;
    fn deserialize(&self, page: &Page, offset: usize) -> ColumnResult<ColumnValue>;
}

struct BooleanSerializer;

impl Serializer for BooleanSerializer {
    fn logical_size(&self) -> i32 {
        -1
    }

    fn physical_size(&self) -> usize {
        1
    }

    fn serialize(&self, page: &mut Page, offset: usize, value: &ColumnValue) -> ColumnResult<()> {
        let ColumnValue::Boolean(b) = value else {
            unreachable!("type-checked by caller")
        };
        page.put_byte(offset, if *b { 1 } else { 0 })?;
        Ok(())
    }

    fn deserialize(&self, page: &Page, offset: usize) -> ColumnResult<ColumnValue> {
        Ok(ColumnValue::Boolean(page.get_byte(offset)? != 0))
    }
}

struct IntegerSerializer;

impl Serializer for IntegerSerializer {
    fn logical_size(&self) -> i32 {
        -1
    }

    fn physical_size(&self) -> usize {
        4
    }

    fn serialize(&self, page: &mut Page, offset: usize, value: &ColumnValue) -> ColumnResult<()> {
        let ColumnValue::Integer(v) = value else {
            unreachable!("type-checked by caller")
        };
        page.put_i32(offset, *v)?;
        Ok(())
    }

    fn deserialize(&self, page: &Page, offset: usize) -> ColumnResult<ColumnValue> {
        Ok(ColumnValue::Integer(page.get_i32(offset)?))
    }
}

struct BigIntSerializer;

impl Serializer for BigIntSerializer {
    fn logical_size(&self) -> i32 {
        -1
    }

    fn physical_size(&self) -> usize {
        8
    }

    fn serialize(&self, page: &mut Page, offset: usize, value: &ColumnValue) -> ColumnResult<()> {
        let ColumnValue::BigInt(v) = value else {
            unreachable!("type-checked by caller")
        };
        page.put_i64(offset, *v)?;
        Ok(())
    }

    fn deserialize(&self, page: &Page, offset: usize) -> ColumnResult<ColumnValue> {
        Ok(ColumnValue::BigInt(page.get_i64(offset)?))
    }
}

struct FloatSerializer;

impl Serializer for FloatSerializer {
    fn logical_size(&self) -> i32 {
        -1
    }

    fn physical_size(&self) -> usize {
        4
    }

    fn serialize(&self, page: &mut Page, offset: usize, value: &ColumnValue) -> ColumnResult<()> {
        let ColumnValue::Float(v) = value else {
            unreachable!("type-checked by caller")
        };
        page.put_f32(offset, *v)?;
        Ok(())
    }

    fn deserialize(&self, page: &Page, offset: usize) -> ColumnResult<ColumnValue> {
        Ok(ColumnValue::Float(page.get_f32(offset)?))
    }
}

struct DoubleSerializer;

impl Serializer for DoubleSerializer {
    fn logical_size(&self) -> i32 {
        -1
    }

    fn physical_size(&self) -> usize {
        8
    }

    fn serialize(&self, page: &mut Page, offset: usize, value: &ColumnValue) -> ColumnResult<()> {
        let ColumnValue::Double(v) = value else {
            unreachable!("type-checked by caller")
        };
        page.put_f64(offset, *v)?;
        Ok(())
    }

    fn deserialize(&self, page: &Page, offset: usize) -> ColumnResult<ColumnValue> {
        Ok(ColumnValue::Double(page.get_f64(offset)?))
    }
}

/// Fixed-length vector of `f32`s. Registration fails (at [`for_type`])
/// when `size` is not positive.
struct VectorSerializer {
    size: u32,
}

impl Serializer for VectorSerializer {
    fn logical_size(&self) -> i32 {
        self.size as i32
    }

    fn physical_size(&self) -> usize {
        self.size as usize * 4
    }

    fn serialize(&self, page: &mut Page, offset: usize, value: &ColumnValue) -> ColumnResult<()> {
        let ColumnValue::Vector(values) = value else {
            unreachable!("type-checked by caller")
        };
        for (i, v) in values.iter().enumerate() {
            page.put_f32(offset + i * 4, *v)?;
        }
        Ok(())
    }

    fn deserialize(&self, page: &Page, offset: usize) -> ColumnResult<ColumnValue> {
        let mut values = Vec::with_capacity(self.size as usize);
        for i in 0..self.size as usize {
            values.push(page.get_f32(offset + i * 4)?);
        }
        Ok(ColumnValue::Vector(values))
    }
}

/// Resolves a [`ColumnType`] to the [`Serializer`] that reads and writes
/// it. A closed enumeration, not an open plugin registry: every column
/// type this crate knows about is listed here.
pub fn for_type(column_type: ColumnType) -> ColumnResult<Box<dyn Serializer>> {
    match column_type {
        ColumnType::Boolean => Ok(Box::new(BooleanSerializer)),
        ColumnType::Integer => Ok(Box::new(IntegerSerializer)),
        ColumnType::BigInt => Ok(Box::new(BigIntSerializer)),
        ColumnType::Float => Ok(Box::new(FloatSerializer)),
        ColumnType::Double => Ok(Box::new(DoubleSerializer)),
        ColumnType::Vector(size) => {
            if size == 0 {
                return Err(crate::error::ColumnError::InvalidLogicalSize(0));
            }
            Ok(Box::new(VectorSerializer { size }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_round_trips() {
        let serializer = for_type(ColumnType::Double).unwrap();
        let mut page = Page::new(12);
        let value = ColumnValue::Double(std::f64::consts::PI);
        serializer.serialize(&mut page, 0, &value).unwrap();
        assert_eq!(serializer.deserialize(&page, 0).unwrap(), value);
    }

    #[test]
    fn vector_round_trips() {
        let serializer = for_type(ColumnType::Vector(4)).unwrap();
        assert_eq!(serializer.physical_size(), 16);
        let mut page = Page::new(12);
        let value = ColumnValue::Vector(vec![1.0, 2.0, 3.0, 4.0]);
        serializer.serialize(&mut page, 8, &value).unwrap();
        assert_eq!(serializer.deserialize(&page, 8).unwrap(), value);
    }

    #[test]
    fn zero_size_vector_rejected() {
        assert!(matches!(
            for_type(ColumnType::Vector(0)),
            Err(crate::error::ColumnError::InvalidLogicalSize(0))
        ));
    }
}
