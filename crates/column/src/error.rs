use common::TupleId;
use storage::{BufferPoolError, DiskError, PageAccessError};
use thiserror::Error;

/// Errors surfaced by the fixed-column file format and its reader,
/// writer, and cursor handles.
#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
    #[error("disk manager error: {0}")]
    Disk(#[from] DiskError),
    #[error("page access error: {0}")]
    PageAccess(#[from] PageAccessError),
    #[error("column type ordinal {0} is not registered")]
    UnknownColumnType(u32),
    #[error("vector column type needs a positive logical size, got {0}")]
    InvalidLogicalSize(i32),
    #[error("column reader/writer/cursor is closed")]
    ResourceClosed,
    #[error("tuple id {0} is out of bounds")]
    TupleIdOutOfBounds(TupleId),
    #[error("tuple id {0} is deleted")]
    EntryDeleted(TupleId),
    #[error("null value is not allowed on a non-nullable column")]
    NullValueNotAllowed,
    #[error("value type does not match the column's declared type")]
    TypeMismatch,
}

pub type ColumnResult<T> = Result<T, ColumnError>;
