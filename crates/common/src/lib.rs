//! Shared identifiers for the HARE storage engine.
//!
//! These types cross every crate boundary in the workspace, the way
//! `storage::disk::PageId` and `wal::{Lsn, TxnId, PageId}` are shared
//! type aliases in the crates this workspace grew out of.

use uuid::Uuid;

/// 64-bit page identifier. PageId 0 never stores user data; PageId 1 is a
/// column file's header page; PageIds >= 2 are data pages.
pub type PageId = u64;

/// 16-bit slot identifier within a data page.
pub type SlotId = u16;

/// Stable, monotonically allocated identifier of a column entry. Never
/// reused after delete.
pub type TupleId = u64;

/// Number of bits of [`Address`] given to the [`SlotId`] half.
const SLOT_BITS: u32 = 16;

/// A packed `(PageId, SlotId)` pair, reversible by construction.
///
/// `tuple_id -> Address` packs the slot id into the low 16 bits and the
/// page id into the remaining high bits, without committing to any
/// particular bit width for `PageId` beyond "whatever doesn't overlap
/// the slot bits".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(u64);

impl Address {
    /// Packs a page id and slot id into one address.
    pub fn pack(page_id: PageId, slot_id: SlotId) -> Self {
        Self((page_id << SLOT_BITS) | slot_id as u64)
    }

    /// Recovers the page id half of this address.
    pub fn page_id(&self) -> PageId {
        self.0 >> SLOT_BITS
    }

    /// Recovers the slot id half of this address.
    pub fn slot_id(&self) -> SlotId {
        (self.0 & 0xFFFF) as SlotId
    }

    /// Returns the packed raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Universally-unique write-ownership tag attached to a buffer pool
/// session and threaded through WAL entries as the writer's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh, randomly-assigned transaction id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the id as a 128-bit integer, e.g. for on-disk encoding.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// Reconstructs a transaction id from its 128-bit representation.
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips() {
        let addr = Address::pack(12345, 67);
        assert_eq!(addr.page_id(), 12345);
        assert_eq!(addr.slot_id(), 67);
    }

    #[test]
    fn address_round_trips_large_page_id() {
        let addr = Address::pack(u64::MAX >> SLOT_BITS, u16::MAX);
        assert_eq!(addr.page_id(), u64::MAX >> SLOT_BITS);
        assert_eq!(addr.slot_id(), u16::MAX);
    }

    #[test]
    fn transaction_id_round_trips_through_u128() {
        let txn = TransactionId::new();
        let restored = TransactionId::from_u128(txn.as_u128());
        assert_eq!(txn, restored);
    }

    #[test]
    fn transaction_ids_are_distinct() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }
}
