use crate::error::{ColumnError, ColumnResult};

/// A supported column type, keyed by the ordinal stored in the column
/// header page (bytes 4-7: type ordinal, an index into the type
/// registry). Scalar types have no associated data; [`ColumnType::Vector`]
/// carries its fixed element count — vector-family serializers are
/// parameterized by a positive logical size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Float,
    Double,
    Vector(u32),
}

impl ColumnType {
    /// The stable ordinal persisted in the column header.
    pub fn ordinal(self) -> u32 {
        match self {
            ColumnType::Boolean => 0,
            ColumnType::Integer => 1,
            ColumnType::BigInt => 2,
            ColumnType::Float => 3,
            ColumnType::Double => 4,
            ColumnType::Vector(_) => 5,
        }
    }

    /// Reconstructs a column type from its ordinal and the logical size
    /// stored alongside it (meaningful only for [`ColumnType::Vector`];
    /// scalars persist `-1` there).
    pub fn from_ordinal(ordinal: u32, logical_size: i32) -> ColumnResult<Self> {
        match ordinal {
            0 => Ok(ColumnType::Boolean),
            1 => Ok(ColumnType::Integer),
            2 => Ok(ColumnType::BigInt),
            3 => Ok(ColumnType::Float),
            4 => Ok(ColumnType::Double),
            5 => {
                if logical_size <= 0 {
                    return Err(ColumnError::InvalidLogicalSize(logical_size));
                }
                Ok(ColumnType::Vector(logical_size as u32))
            }
            other => Err(ColumnError::UnknownColumnType(other)),
        }
    }

    /// Structural element count for vector types, `-1` for scalars — the
    /// column header's "logical size" field.
    pub fn logical_size(self) -> i32 {
        match self {
            ColumnType::Vector(n) => n as i32,
            _ => -1,
        }
    }
}

/// A deserialized column entry value. `Vector` values always have the
/// length their [`ColumnType::Vector`] declares; the serializer enforces
/// this on both `serialize` and `deserialize`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Vector(Vec<f32>),
}

impl ColumnValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValue::Boolean(_) => ColumnType::Boolean,
            ColumnValue::Integer(_) => ColumnType::Integer,
            ColumnValue::BigInt(_) => ColumnType::BigInt,
            ColumnValue::Float(_) => ColumnType::Float,
            ColumnValue::Double(_) => ColumnType::Double,
            ColumnValue::Vector(values) => ColumnType::Vector(values.len() as u32),
        }
    }
}
