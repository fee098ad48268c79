//! Fixed-size-record column storage: one file per column, addressed by a
//! dense `TupleId` space, with independent reader/writer/cursor handles
//! layered over `storage::BufferPool`.

mod cursor;
mod error;
mod file;
mod header;
mod lock;
mod reader;
mod serializer;
mod types;
mod writer;

pub use cursor::ColumnCursor;
pub use error::{ColumnError, ColumnResult};
pub use file::FixedColumnFile;
pub use header::{ColumnHeader, HEADER_FIXED_COLUMN, HEADER_LAYOUT_SIZE};
pub use lock::{ColumnLock, LockHandle, LockMode};
pub use reader::ColumnReader;
pub use serializer::{for_type as serializer_for_type, Serializer};
pub use types::{ColumnType, ColumnValue};
pub use writer::ColumnWriter;
