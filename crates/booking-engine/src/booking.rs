//! Booking transaction manager.
//!
//! [`BookingService::schedule`] turns an organizer's AVAILABLE slot into a
//! meeting in one write scope:
//!
//! 1. validate the title (before touching the store),
//! 2. take the organizer slot's row lock; every other booking of the same slot
//!    blocks here until this scope ends,
//! 3. check ownership and AVAILABLE status under the lock,
//! 4. resolve the organizer and the distinct participants,
//! 5. insert the meeting, mark the slot BUSY and link it,
//! 6. insert a linked BUSY slot for each participant,
//! 7. commit.
//!
//! Any error after step 1 drops the write scope, which discards every staged
//! write. Participant double-booking is detected by the store's overlap
//! constraint (at insert or at commit) rather than by locking the participants'
//! other slots.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BookingError, Result, StoreError};
use crate::model::{Meeting, MeetingId, SlotId, SlotStatus, TimeSlot, UserId};
use crate::store::{ReadTx, Store, WriteTx};

/// Parameters of a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub organizer_id: UserId,
    pub slot_id: SlotId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// May contain duplicates and the organizer; both are ignored.
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
}

pub struct BookingService<S> {
    store: Arc<S>,
}

impl<S: Store> BookingService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Book `request.slot_id` for a new meeting.
    ///
    /// At most one call per slot can succeed; concurrent callers that lose the
    /// race observe a BUSY slot and fail with `Conflict`.
    ///
    /// # Errors
    /// - `InvalidInput`: blank title, or unknown participant ids.
    /// - `NotFound`: unknown slot or organizer.
    /// - `Conflict`: the slot belongs to someone else, is not AVAILABLE, a
    ///   participant already holds an overlapping BUSY slot, or the slot lock
    ///   could not be obtained in time.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<Meeting> {
        let slot_id = request.slot_id;
        let organizer_id = request.organizer_id;

        match self.try_schedule(request) {
            Ok(meeting) => {
                info!(
                    meeting_id = %meeting.id,
                    %slot_id,
                    %organizer_id,
                    participants = meeting.participant_ids.len(),
                    "meeting booked"
                );
                Ok(meeting)
            }
            Err(err) => {
                warn!(%slot_id, %organizer_id, error = %err, "booking rejected");
                Err(err)
            }
        }
    }

    fn try_schedule(&self, request: ScheduleRequest) -> Result<Meeting> {
        let ScheduleRequest {
            organizer_id,
            slot_id,
            title,
            description,
            participant_ids,
        } = request;

        if title.trim().is_empty() {
            return Err(BookingError::invalid("title is required"));
        }

        let mut tx = self.store.begin()?;

        let mut slot = tx
            .lock_slot_for_update(slot_id)?
            .ok_or_else(|| BookingError::not_found("slot not found"))?;
        if slot.user_id != organizer_id {
            return Err(BookingError::conflict("slot does not belong to organizer"));
        }
        if slot.status != SlotStatus::Available {
            return Err(BookingError::conflict("slot is not AVAILABLE"));
        }

        tx.find_user(organizer_id)?
            .ok_or_else(|| BookingError::not_found("organizer not found"))?;

        let wanted = distinct_participants(&participant_ids, organizer_id);
        let participants = if wanted.is_empty() {
            Vec::new()
        } else {
            tx.find_users_by_id(&wanted)?
        };
        if participants.len() < wanted.len() {
            let known: HashSet<UserId> = participants.iter().map(|u| u.id).collect();
            let missing: Vec<String> = wanted
                .iter()
                .filter(|id| !known.contains(id))
                .map(ToString::to_string)
                .collect();
            return Err(BookingError::invalid(format!(
                "one or more participants do not exist: {}",
                missing.join(", ")
            )));
        }

        let now = Utc::now();
        let meeting = tx.insert_meeting(Meeting {
            id: MeetingId::new(),
            organizer_id,
            start: slot.start,
            end: slot.end,
            title,
            description: description.filter(|d| !d.trim().is_empty()),
            participant_ids: wanted,
            created_at: now,
        })?;

        slot.book(meeting.id)?;
        tx.update_slot(slot)?;

        for &participant_id in &meeting.participant_ids {
            let busy = TimeSlot {
                id: SlotId::new(),
                user_id: participant_id,
                start: meeting.start,
                end: meeting.end,
                status: SlotStatus::Busy,
                meeting_id: Some(meeting.id),
                created_at: now,
                updated_at: now,
                version: 0,
            };
            tx.insert_slot(busy)
                .map_err(|e| participant_conflict(e, &meeting.participant_ids))?;
        }

        tx.commit()
            .map_err(|e| participant_conflict(e, &meeting.participant_ids))?;
        Ok(meeting)
    }

    /// Read a committed meeting.
    pub fn get(&self, meeting_id: MeetingId) -> Result<Meeting> {
        self.store
            .read()?
            .find_meeting(meeting_id)?
            .ok_or_else(|| BookingError::not_found("meeting not found"))
    }
}

/// Participants in first-seen order, without duplicates or the organizer.
fn distinct_participants(ids: &[UserId], organizer_id: UserId) -> Vec<UserId> {
    let mut seen = HashSet::from([organizer_id]);
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn participant_conflict(err: StoreError, participants: &[UserId]) -> BookingError {
    match err {
        StoreError::Overlap {
            user_id,
            status: SlotStatus::Busy,
        } if participants.contains(&user_id) => BookingError::conflict(format!(
            "participant {user_id} has a conflicting BUSY slot"
        )),
        other => other.into(),
    }
}
