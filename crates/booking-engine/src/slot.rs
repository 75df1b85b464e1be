//! Slot lifecycle: the AVAILABLE/BUSY state machine and the slot operations
//! built on it.
//!
//! ```text
//!   create ──► AVAILABLE ──edit──► BUSY (unlinked) ──edit──► AVAILABLE
//!                  │
//!                  └──book──► BUSY (linked to a meeting)   [terminal]
//! ```
//!
//! A linked slot can never return to AVAILABLE and can never be deleted. Only the
//! booking protocol links a slot.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::{BookingError, Result, StoreError};
use crate::model::{MeetingId, SlotId, SlotStatus, TimeSlot, UserId};
use crate::store::{ReadTx, Store, WriteTx};

/// A partial update of a slot. `None` fields are left unchanged.
///
/// A new `start` alone keeps the current end; a `duration` is measured from the
/// (possibly new) start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotEdit {
    pub start: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub status: Option<SlotStatus>,
}

impl TimeSlot {
    /// Apply `edit` in place, enforcing the lifecycle rules.
    ///
    /// # Errors
    /// - `Conflict` when setting AVAILABLE on a linked slot.
    /// - `InvalidInput` when the duration is not positive or the resulting
    ///   interval would be empty.
    pub fn apply_edit(&mut self, edit: &SlotEdit) -> Result<()> {
        if edit.status == Some(SlotStatus::Available) && self.is_linked() {
            return Err(BookingError::conflict(
                "cannot set to AVAILABLE: slot is linked to a meeting",
            ));
        }
        if let Some(duration) = edit.duration {
            ensure_positive(duration)?;
        }

        let start = edit.start.unwrap_or(self.start);
        let end = match edit.duration {
            Some(duration) => end_of(start, duration)?,
            None => self.end,
        };
        if end <= start {
            return Err(BookingError::invalid(format!(
                "slot would end ({end}) before it starts ({start})"
            )));
        }

        self.start = start;
        self.end = end;
        if let Some(status) = edit.status {
            self.status = status;
        }
        Ok(())
    }

    /// # Errors
    /// `Conflict` while the slot is linked to a meeting.
    pub fn ensure_deletable(&self) -> Result<()> {
        if self.is_linked() {
            return Err(BookingError::conflict(
                "cannot delete: slot is linked to a meeting",
            ));
        }
        Ok(())
    }

    /// AVAILABLE → BUSY, linked to `meeting_id`.
    ///
    /// # Errors
    /// `Conflict` unless the slot is currently AVAILABLE.
    pub fn book(&mut self, meeting_id: MeetingId) -> Result<()> {
        if self.status != SlotStatus::Available {
            return Err(BookingError::conflict("slot is not AVAILABLE"));
        }
        self.status = SlotStatus::Busy;
        self.meeting_id = Some(meeting_id);
        Ok(())
    }
}

fn ensure_positive(duration: Duration) -> Result<()> {
    if duration <= Duration::zero() {
        return Err(BookingError::invalid("duration must be positive"));
    }
    Ok(())
}

fn end_of(start: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    start
        .checked_add_signed(duration)
        .ok_or_else(|| BookingError::invalid("slot end is out of range"))
}

fn overlap_conflict(err: StoreError, message: &str) -> BookingError {
    match err {
        StoreError::Overlap { .. } => BookingError::conflict(message),
        other => other.into(),
    }
}

/// Create, edit, delete, and list a user's slots.
pub struct SlotService<S> {
    store: Arc<S>,
}

impl<S: Store> SlotService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Publish a new slot `[start, start + duration)` for `user_id`.
    /// `status` defaults to AVAILABLE.
    pub fn create(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        duration: Duration,
        status: Option<SlotStatus>,
    ) -> Result<TimeSlot> {
        ensure_positive(duration)?;
        let end = end_of(start, duration)?;

        let mut tx = self.store.begin()?;
        if tx.find_user(user_id)?.is_none() {
            return Err(BookingError::not_found("user not found"));
        }

        let now = Utc::now();
        let slot = TimeSlot {
            id: SlotId::new(),
            user_id,
            start,
            end,
            status: status.unwrap_or_default(),
            meeting_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        const OVERLAP: &str = "slot overlaps an existing slot for this user/status";
        let slot = tx.insert_slot(slot).map_err(|e| overlap_conflict(e, OVERLAP))?;
        tx.commit().map_err(|e| overlap_conflict(e, OVERLAP))?;

        info!(slot_id = %slot.id, %user_id, status = %slot.status, "slot created");
        Ok(slot)
    }

    pub fn get(&self, slot_id: SlotId) -> Result<TimeSlot> {
        self.store
            .read()?
            .find_slot(slot_id)?
            .ok_or_else(|| BookingError::not_found("slot not found"))
    }

    /// Edit a slot under its row lock.
    pub fn update(&self, slot_id: SlotId, edit: &SlotEdit) -> Result<TimeSlot> {
        let mut tx = self.store.begin()?;
        let mut slot = tx
            .lock_slot_for_update(slot_id)?
            .ok_or_else(|| BookingError::not_found("slot not found"))?;

        slot.apply_edit(edit)?;

        const OVERLAP: &str = "update would cause an overlap for this user/status";
        let slot = tx.update_slot(slot).map_err(|e| overlap_conflict(e, OVERLAP))?;
        tx.commit().map_err(|e| overlap_conflict(e, OVERLAP))?;

        info!(%slot_id, status = %slot.status, version = slot.version, "slot updated");
        Ok(slot)
    }

    /// Delete an unlinked slot under its row lock.
    pub fn delete(&self, slot_id: SlotId) -> Result<()> {
        let mut tx = self.store.begin()?;
        let slot = tx
            .lock_slot_for_update(slot_id)?
            .ok_or_else(|| BookingError::not_found("slot not found"))?;

        slot.ensure_deletable()?;
        tx.delete_slot(slot_id)?;
        tx.commit()?;

        info!(%slot_id, "slot deleted");
        Ok(())
    }

    /// Slots of `user_id` intersecting `[from, to)`, optionally filtered by
    /// status, sorted by start.
    pub fn list(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: Option<SlotStatus>,
    ) -> Result<Vec<TimeSlot>> {
        if from >= to {
            return Err(BookingError::invalid("'from' must be before 'to'"));
        }
        let mut slots = self
            .store
            .read()?
            .find_slots_in_range(user_id, from, to, status)?;
        slots.sort_by_key(|s| (s.start, s.end));
        debug!(%user_id, count = slots.len(), "listed slots");
        Ok(slots)
    }
}
