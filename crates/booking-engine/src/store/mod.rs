//! Storage port used by the engine's services.
//!
//! The services never check constraints themselves where a race could slip
//! between the check and the write. Instead a [`Store`] adapter must offer:
//!
//! - a read-only scope ([`Store::read`]) and an all-or-nothing write scope
//!   ([`Store::begin`]); dropping a write scope without calling
//!   [`WriteTx::commit`] discards every staged write,
//! - a blocking exclusive row lock on slots ([`WriteTx::lock_slot_for_update`]),
//!   held until the scope ends,
//! - a per-user, per-status non-overlap constraint on slots, reported as
//!   [`StoreError::Overlap`] by the write that violates it (or by `commit`, if the
//!   conflicting row was committed concurrently),
//! - e-mail uniqueness on users, reported as [`StoreError::DuplicateEmail`].

pub mod memory;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{Meeting, MeetingId, SlotId, SlotStatus, TimeSlot, User, UserId};

/// Queries available in every transaction scope.
///
/// Range queries return slots whose interval intersects `[from, to)`, in no
/// particular order.
pub trait ReadTx {
    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Bulk lookup; unknown ids are skipped, so the result may be shorter than
    /// `ids`.
    fn find_users_by_id(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    fn find_slot(&self, id: SlotId) -> Result<Option<TimeSlot>, StoreError>;

    fn find_slots_in_range(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: Option<SlotStatus>,
    ) -> Result<Vec<TimeSlot>, StoreError>;

    fn find_slots_for_users_in_range(
        &self,
        user_ids: &[UserId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeSlot>, StoreError>;

    fn find_meeting(&self, id: MeetingId) -> Result<Option<Meeting>, StoreError>;
}

/// A write scope. Writes become visible to other scopes only on
/// [`commit`](WriteTx::commit).
pub trait WriteTx: ReadTx {
    /// Block until this scope holds the slot's exclusive lock, then read it.
    ///
    /// Returns `Ok(None)` (holding no lock) when the slot does not exist.
    fn lock_slot_for_update(&mut self, id: SlotId) -> Result<Option<TimeSlot>, StoreError>;

    fn insert_user(&mut self, user: User) -> Result<User, StoreError>;

    fn insert_slot(&mut self, slot: TimeSlot) -> Result<TimeSlot, StoreError>;

    /// Persist a modified slot. The returned slot carries the bumped `version`
    /// and `updated_at`.
    fn update_slot(&mut self, slot: TimeSlot) -> Result<TimeSlot, StoreError>;

    fn delete_slot(&mut self, id: SlotId) -> Result<(), StoreError>;

    fn insert_meeting(&mut self, meeting: Meeting) -> Result<Meeting, StoreError>;

    /// Apply every staged write atomically.
    fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// A transactional store of users, slots, and meetings.
pub trait Store: Send + Sync {
    type Read<'a>: ReadTx
    where
        Self: 'a;
    type Write<'a>: WriteTx
    where
        Self: 'a;

    fn read(&self) -> Result<Self::Read<'_>, StoreError>;

    fn begin(&self) -> Result<Self::Write<'_>, StoreError>;
}
