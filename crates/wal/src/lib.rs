//! Write-ahead log for page-level disk manager mutations.
//!
//! Binary framing and the append/flush discipline are grounded on
//! `wal::LogManager`/`LogRecord` (length-prefixed records, a header
//! rewritten at offset 0) but reworked from per-transaction ARIES
//! records to a simpler page-level log: a single writer appends
//! UPDATE/ALLOCATE_APPEND/ALLOCATE_REUSE/FREE entries, and the whole
//! file transitions OPEN -> COMMITTED|ABORTED exactly once. The
//! original shared-state locking (`parking_lot::Mutex`+`Condvar`) has no
//! analogue here: a `Wal` is owned by exactly one `WalDiskManager`,
//! itself behind the buffer pool's single disk-manager mutex, so
//! nothing inside this crate is ever accessed from more than one thread
//! at a time.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use common::PageId;
use thiserror::Error;

/// WAL header occupies the first 128 bytes of the `.wal` file.
pub const WAL_HEADER_SIZE: usize = 128;
const MAGIC: [u8; 8] = *b"\x00H\x00A\x00R\x00E";
const FILE_TYPE_WAL: u32 = 1;
const WAL_VERSION: u32 = 1;
/// Byte size of one `WalEntry`'s fixed-size header, excluding payload.
pub const WAL_ENTRY_HEADER_SIZE: usize = 8 + 4 + 8 + 4;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal corruption: {0}")]
    Corrupt(String),
    #[error("wal already sealed (committed or aborted)")]
    Sealed,
}

pub type WalResult<T> = Result<T, WalError>;

/// Lifecycle state of a WAL file. `Open` is the only non-terminal state;
/// once `Committed` or `Aborted`, no further entries may be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalState {
    Open,
    Committed,
    Aborted,
}

impl WalState {
    fn to_u32(self) -> u32 {
        match self {
            WalState::Open => 0,
            WalState::Committed => 1,
            WalState::Aborted => 2,
        }
    }

    fn from_u32(value: u32) -> WalResult<Self> {
        match value {
            0 => Ok(WalState::Open),
            1 => Ok(WalState::Committed),
            2 => Ok(WalState::Aborted),
            other => Err(WalError::Corrupt(format!("invalid wal state {other}"))),
        }
    }
}

/// The page-level operation a [`WalEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalAction {
    /// Full new page image for `page_id`; payload is the page bytes.
    Update,
    /// `page_id` is the new `maximumPageId` minted by this allocation.
    AllocateAppend,
    /// `page_id` is the id popped off the free-page stack.
    AllocateReuse,
    /// `page_id` was returned to the free-page stack (or went dangling).
    Free,
}

impl WalAction {
    fn to_u32(self) -> u32 {
        match self {
            WalAction::Update => 0,
            WalAction::AllocateAppend => 1,
            WalAction::AllocateReuse => 2,
            WalAction::Free => 3,
        }
    }

    fn from_u32(value: u32) -> WalResult<Self> {
        match value {
            0 => Ok(WalAction::Update),
            1 => Ok(WalAction::AllocateAppend),
            2 => Ok(WalAction::AllocateReuse),
            3 => Ok(WalAction::Free),
            other => Err(WalError::Corrupt(format!("invalid wal action {other}"))),
        }
    }
}

/// One page-level mutation recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub sequence_number: u64,
    pub action: WalAction,
    pub page_id: PageId,
    pub payload: Vec<u8>,
}

impl WalEntry {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WAL_ENTRY_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.action.to_u32().to_be_bytes());
        buf.extend_from_slice(&self.page_id.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    fn from_reader(reader: &mut impl Read) -> WalResult<Option<Self>> {
        let mut header = [0u8; WAL_ENTRY_HEADER_SIZE];
        let mut read_total = 0;
        while read_total < header.len() {
            let n = reader.read(&mut header[read_total..])?;
            if n == 0 {
                if read_total == 0 {
                    return Ok(None);
                }
                return Err(WalError::Corrupt("truncated wal entry header".into()));
            }
            read_total += n;
        }
        let sequence_number = u64::from_be_bytes(header[0..8].try_into().unwrap());
        let action = WalAction::from_u32(u32::from_be_bytes(header[8..12].try_into().unwrap()))?;
        let page_id = u64::from_be_bytes(header[12..20].try_into().unwrap());
        let payload_size = u32::from_be_bytes(header[20..24].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; payload_size];
        reader.read_exact(&mut payload)?;
        Ok(Some(WalEntry {
            sequence_number,
            action,
            page_id,
            payload,
        }))
    }
}

/// The 128-byte header at offset 0 of a `.wal` file.
#[derive(Debug, Clone, Copy)]
struct WalHeader {
    state: WalState,
    entries: u64,
    transferred: u64,
    checksum: u32,
}

impl WalHeader {
    fn new() -> Self {
        Self {
            state: WalState::Open,
            entries: 0,
            transferred: 0,
            checksum: 0,
        }
    }

    fn to_bytes(self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&FILE_TYPE_WAL.to_be_bytes());
        buf[12..16].copy_from_slice(&WAL_VERSION.to_be_bytes());
        buf[16..20].copy_from_slice(&self.state.to_u32().to_be_bytes());
        buf[20..28].copy_from_slice(&self.entries.to_be_bytes());
        buf[28..36].copy_from_slice(&self.transferred.to_be_bytes());
        buf[36..40].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> WalResult<Self> {
        if buf.len() < WAL_HEADER_SIZE {
            return Err(WalError::Corrupt("wal header truncated".into()));
        }
        if buf[0..8] != MAGIC {
            return Err(WalError::Corrupt("bad wal magic".into()));
        }
        let file_type = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        if file_type != FILE_TYPE_WAL {
            return Err(WalError::Corrupt("not a wal file".into()));
        }
        let version = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        if version != WAL_VERSION {
            return Err(WalError::Corrupt(format!(
                "unsupported wal version {version}"
            )));
        }
        let state = WalState::from_u32(u32::from_be_bytes(buf[16..20].try_into().unwrap()))?;
        let entries = u64::from_be_bytes(buf[20..28].try_into().unwrap());
        let transferred = u64::from_be_bytes(buf[28..36].try_into().unwrap());
        let checksum = u32::from_be_bytes(buf[36..40].try_into().unwrap());
        Ok(Self {
            state,
            entries,
            transferred,
            checksum,
        })
    }
}

/// An append-only, single-writer log of page-level operations.
///
/// Every append is synchronous: the entry is written, the file is
/// `fsync`'d, and the header is rewritten with the new entry count and
/// running checksum before the call returns — the file is opened with
/// synchronous write flags throughout.
pub struct Wal {
    path: PathBuf,
    file: File,
    header: WalHeader,
}

impl Wal {
    /// Creates a brand-new WAL file at `path`, failing if one exists.
    pub fn create(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let header = WalHeader::new();
        file.write_all(&header.to_bytes())?;
        file.sync_data()?;
        log::debug!("wal created at {}", path.display());
        Ok(Self { path, file, header })
    }

    /// Opens an existing WAL file for replay or continued appends.
    pub fn open(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut buf = [0u8; WAL_HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let header = WalHeader::from_bytes(&buf)?;
        Ok(Self { path, file, header })
    }

    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().exists()
    }

    pub fn state(&self) -> WalState {
        self.header.state
    }

    pub fn entry_count(&self) -> u64 {
        self.header.entries
    }

    pub fn transferred_count(&self) -> u64 {
        self.header.transferred
    }

    fn rewrite_header(&mut self) -> WalResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }

    fn append(&mut self, action: WalAction, page_id: PageId, payload: Vec<u8>) -> WalResult<()> {
        if self.header.state != WalState::Open {
            return Err(WalError::Sealed);
        }
        let entry = WalEntry {
            sequence_number: self.header.entries,
            action,
            page_id,
            payload,
        };
        let bytes = entry.to_bytes();
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&bytes)?;
        self.file.sync_data()?;
        self.header.checksum = crc32c::crc32c_append(self.header.checksum, &bytes);
        self.header.entries += 1;
        self.rewrite_header()?;
        log::trace!(
            "wal append seq={} action={:?} page_id={}",
            entry.sequence_number,
            entry.action,
            entry.page_id
        );
        Ok(())
    }

    pub fn log_update(&mut self, page_id: PageId, page_image: &[u8]) -> WalResult<()> {
        self.append(WalAction::Update, page_id, page_image.to_vec())
    }

    pub fn log_allocate_append(&mut self, page_id: PageId) -> WalResult<()> {
        self.append(WalAction::AllocateAppend, page_id, Vec::new())
    }

    pub fn log_allocate_reuse(&mut self, page_id: PageId) -> WalResult<()> {
        self.append(WalAction::AllocateReuse, page_id, Vec::new())
    }

    pub fn log_free(&mut self, page_id: PageId) -> WalResult<()> {
        self.append(WalAction::Free, page_id, Vec::new())
    }

    /// Seals the WAL as committed. No further appends are accepted.
    pub fn log_commit(&mut self) -> WalResult<()> {
        if self.header.state != WalState::Open {
            return Err(WalError::Sealed);
        }
        self.header.state = WalState::Committed;
        self.rewrite_header()?;
        log::debug!("wal {} committed", self.path.display());
        Ok(())
    }

    /// Seals the WAL as aborted. No further appends are accepted.
    pub fn log_abort(&mut self) -> WalResult<()> {
        if self.header.state != WalState::Open {
            return Err(WalError::Sealed);
        }
        self.header.state = WalState::Aborted;
        self.rewrite_header()?;
        log::debug!("wal {} aborted", self.path.display());
        Ok(())
    }

    fn read_all_entries(&mut self) -> WalResult<Vec<WalEntry>> {
        self.file.seek(SeekFrom::Start(WAL_HEADER_SIZE as u64))?;
        let mut entries = Vec::with_capacity(self.header.entries as usize);
        while let Some(entry) = WalEntry::from_reader(&mut self.file)? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Verifies the on-disk checksum against a fresh scan of all entries.
    pub fn verify_checksum(&mut self) -> WalResult<bool> {
        let entries = self.read_all_entries()?;
        let mut running = 0u32;
        for entry in &entries {
            running = crc32c::crc32c_append(running, &entry.to_bytes());
        }
        Ok(running == self.header.checksum)
    }

    /// Replays entries in sequence-number order starting at
    /// `transferred_count()`, calling `consumer` for each. The header's
    /// `transferred` counter is persisted after every successful call so
    /// replay is idempotent across crashes: a crash mid-replay resumes
    /// exactly where it left off.
    pub fn replay<F>(&mut self, mut consumer: F) -> WalResult<()>
    where
        F: FnMut(&WalEntry) -> WalResult<()>,
    {
        let entries = self.read_all_entries()?;
        let mut expected_seq = self.header.transferred;
        for entry in entries.into_iter().skip(self.header.transferred as usize) {
            if entry.sequence_number != expected_seq {
                return Err(WalError::Corrupt(format!(
                    "wal sequence gap: expected {expected_seq}, got {}",
                    entry.sequence_number
                )));
            }
            consumer(&entry)?;
            expected_seq += 1;
            self.header.transferred = expected_seq;
            self.rewrite_header()?;
        }
        Ok(())
    }

    /// Deletes the WAL file. Consumes the handle since the backing file
    /// is gone afterward.
    pub fn delete(self) -> WalResult<()> {
        let path = self.path.clone();
        drop(self.file);
        fs::remove_file(&path)?;
        log::debug!("wal {} deleted", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_path(name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("hare_wal_test_{name}_{n}.wal"))
    }

    #[test]
    fn append_and_replay_roundtrip() {
        let path = temp_path("append_replay");
        let _ = fs::remove_file(&path);
        {
            let mut wal = Wal::create(&path).unwrap();
            wal.log_allocate_append(2).unwrap();
            wal.log_update(2, &[7u8; 16]).unwrap();
            wal.log_free(2).unwrap();
            wal.log_commit().unwrap();
        }

        let mut wal = Wal::open(&path).unwrap();
        assert_eq!(wal.state(), WalState::Committed);
        assert!(wal.verify_checksum().unwrap());

        let mut seen = Vec::new();
        wal.replay(|entry| {
            seen.push(entry.action);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                WalAction::AllocateAppend,
                WalAction::Update,
                WalAction::Free
            ]
        );
        assert_eq!(wal.transferred_count(), 3);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_is_idempotent_after_partial_crash() {
        let path = temp_path("partial_replay");
        let _ = fs::remove_file(&path);
        {
            let mut wal = Wal::create(&path).unwrap();
            wal.log_update(5, &[1u8; 8]).unwrap();
            wal.log_update(6, &[2u8; 8]).unwrap();
            wal.log_commit().unwrap();
        }

        // First replay only transfers the first entry, simulating a crash.
        {
            let mut wal = Wal::open(&path).unwrap();
            let mut count = 0;
            let _ = wal.replay(|_| {
                count += 1;
                if count == 1 {
                    Ok(())
                } else {
                    Err(WalError::Corrupt("simulated crash".into()))
                }
            });
            assert_eq!(wal.transferred_count(), 1);
        }

        // Resuming replay only sees the remaining entry.
        let mut wal = Wal::open(&path).unwrap();
        let mut replayed = Vec::new();
        wal.replay(|entry| {
            replayed.push(entry.page_id);
            Ok(())
        })
        .unwrap();
        assert_eq!(replayed, vec![6]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn cannot_append_after_commit() {
        let path = temp_path("sealed");
        let _ = fs::remove_file(&path);
        let mut wal = Wal::create(&path).unwrap();
        wal.log_commit().unwrap();
        assert!(matches!(wal.log_update(1, &[0]), Err(WalError::Sealed)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn abort_then_delete_removes_file() {
        let path = temp_path("abort_delete");
        let _ = fs::remove_file(&path);
        let mut wal = Wal::create(&path).unwrap();
        wal.log_update(9, &[3u8; 4]).unwrap();
        wal.log_abort().unwrap();
        assert_eq!(wal.state(), WalState::Aborted);
        wal.delete().unwrap();
        assert!(!path.exists());
    }
}
