//! Cross-user free/busy aggregation.
//!
//! For each requested user, AVAILABLE slots minus BUSY slots (both clipped to the
//! query window) give that user's free time. The intersection of every user's
//! free time is the common free time: the windows in which all of them could
//! meet.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BookingError, Result};
use crate::interval::{self, Interval};
use crate::model::{SlotStatus, TimeSlot, UserId};
use crate::store::{ReadTx, Store};

/// One user's view of the query window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAvailability {
    pub user_id: UserId,
    /// AVAILABLE slots clipped to the window.
    pub available: Vec<Interval>,
    /// BUSY slots clipped to the window.
    pub busy: Vec<Interval>,
    /// `available` minus `busy`.
    pub free: Vec<Interval>,
}

/// Availability of a group of users over `[from, to)`.
///
/// Every interval list is sorted by start and free of overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// One entry per requested user, in request order.
    pub per_user: Vec<UserAvailability>,
    /// Time free for every requested user.
    pub common_free: Vec<Interval>,
}

impl AvailabilityResult {
    fn empty(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            per_user: Vec::new(),
            common_free: Vec::new(),
        }
    }
}

pub struct AvailabilityService<S> {
    store: Arc<S>,
}

impl<S: Store> AvailabilityService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Compute per-user and common free time for `user_ids` over `[from, to)`.
    ///
    /// All slots are fetched with a single range query inside one read scope.
    ///
    /// # Errors
    /// `InvalidInput` unless `from < to`.
    pub fn availability(
        &self,
        user_ids: &[UserId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AvailabilityResult> {
        ensure_window(from, to)?;
        if user_ids.is_empty() {
            return Ok(AvailabilityResult::empty(from, to));
        }

        let slots = self
            .store
            .read()?
            .find_slots_for_users_in_range(user_ids, from, to)?;
        debug!(users = user_ids.len(), slots = slots.len(), "fetched slots for availability");

        Ok(aggregate(user_ids, &slots, from, to))
    }
}

fn ensure_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<()> {
    if from >= to {
        return Err(BookingError::invalid(format!(
            "invalid range: 'from' ({from}) must be before 'to' ({to})"
        )));
    }
    Ok(())
}

/// Build the availability result from an already-fetched slot list.
///
/// `slots` may arrive in any order and may contain slots of users not in
/// `user_ids`; those are ignored. Users with no slots get empty lists.
pub fn aggregate(
    user_ids: &[UserId],
    slots: &[TimeSlot],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> AvailabilityResult {
    let mut by_user: HashMap<UserId, Vec<&TimeSlot>> = HashMap::new();
    for slot in slots {
        by_user.entry(slot.user_id).or_default().push(slot);
    }

    let per_user: Vec<UserAvailability> = user_ids
        .iter()
        .map(|user_id| {
            let user_slots = by_user.get(user_id).map(Vec::as_slice).unwrap_or_default();
            user_availability(*user_id, user_slots, from, to)
        })
        .collect();

    let free_lists: Vec<Vec<Interval>> = per_user.iter().map(|u| u.free.clone()).collect();
    let common_free = interval::intersect_all(&free_lists);

    AvailabilityResult {
        from,
        to,
        per_user,
        common_free,
    }
}

fn user_availability(
    user_id: UserId,
    slots: &[&TimeSlot],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> UserAvailability {
    let available = clipped(slots, SlotStatus::Available, from, to);
    let busy = clipped(slots, SlotStatus::Busy, from, to);
    let free = interval::subtract(&available, &busy);
    UserAvailability {
        user_id,
        available,
        busy,
        free,
    }
}

/// Intervals of `status` slots clipped to `[from, to)`, sorted by start.
fn clipped(
    slots: &[&TimeSlot],
    status: SlotStatus,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<Interval> {
    let mut intervals: Vec<Interval> = slots
        .iter()
        .filter(|s| s.status == status)
        .filter_map(|s| s.interval().clamp(from, to))
        .collect();
    intervals.sort_by_key(|i| (i.start(), i.end()));
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_must_be_non_empty() {
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap();
        assert!(matches!(ensure_window(t, t), Err(BookingError::InvalidInput(_))));
        assert!(ensure_window(t, t + chrono::Duration::minutes(1)).is_ok());
    }
}
