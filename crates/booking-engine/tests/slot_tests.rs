//! Tests for the slot and user services.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration as StdDuration;

use booking_engine::store::WriteTx;
use booking_engine::{
    BookingError, ErrorKind, SlotEdit, SlotId, SlotStatus, Store, StoreConfig, UserId,
};
use chrono::Duration;
use common::{at, Harness};

// ── Users ───────────────────────────────────────────────────────────────────

#[test]
fn user_is_created_with_trimmed_fields() {
    let h = Harness::new();
    let user = h.users.create("  ada@example.com ", " Ada ").unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(user.name, "Ada");
    assert_eq!(h.users.get(user.id).unwrap(), user);
}

#[test]
fn malformed_user_input_is_rejected() {
    let h = Harness::new();
    for (email, name) in [("no-at-sign", "Ada"), ("ada@example.com", "   "), ("", "")] {
        let err = h.users.create(email, name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{email:?} {name:?}");
    }
}

#[test]
fn duplicate_email_is_a_conflict() {
    let h = Harness::new();
    h.users.create("ada@example.com", "Ada").unwrap();
    let err = h.users.create("ada@example.com", "Other Ada").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn unknown_user_is_not_found() {
    let h = Harness::new();
    assert_eq!(
        h.users.get(UserId::new()).unwrap_err(),
        BookingError::NotFound("user not found".to_string())
    );
}

// ── Create ──────────────────────────────────────────────────────────────────

#[test]
fn created_slot_defaults_to_available() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let slot = h
        .slots
        .create(alice.id, at(9, 0), Duration::minutes(45), None)
        .unwrap();

    assert_eq!(slot.status, SlotStatus::Available);
    assert_eq!((slot.start, slot.end), (at(9, 0), at(9, 45)));
    assert_eq!(slot.meeting_id, None);
    assert_eq!(slot.version, 0);
    assert_eq!(h.slots.get(slot.id).unwrap(), slot);
}

#[test]
fn slot_for_unknown_user_is_not_found() {
    let h = Harness::new();
    let err = h
        .slots
        .create(UserId::new(), at(9, 0), Duration::minutes(30), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn non_positive_duration_is_invalid() {
    let h = Harness::new();
    let alice = h.user("Alice");
    for minutes in [0, -15] {
        let err = h
            .slots
            .create(alice.id, at(9, 0), Duration::minutes(minutes), None)
            .unwrap_err();
        assert_eq!(err, BookingError::InvalidInput("duration must be positive".to_string()));
    }
}

#[test]
fn slot_ending_past_the_calendar_range_is_invalid() {
    let h = Harness::new();
    let alice = h.user("Alice");
    for duration in [Duration::days(100_000_000), Duration::MAX] {
        let err = h
            .slots
            .create(alice.id, at(10, 0), duration, Some(SlotStatus::Available))
            .unwrap_err();
        assert_eq!(err, BookingError::InvalidInput("slot end is out of range".to_string()));
    }
    assert!(h.store.snapshot().unwrap().slots.is_empty());
}

#[test]
fn overlapping_slot_with_same_status_is_a_conflict() {
    let h = Harness::new();
    let alice = h.user("Alice");
    h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    let err = h
        .slots
        .create(alice.id, at(9, 30), Duration::minutes(60), Some(SlotStatus::Available))
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::Conflict("slot overlaps an existing slot for this user/status".to_string())
    );
}

#[test]
fn touching_and_cross_status_slots_are_allowed() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let bob = h.user("Bob");
    h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    h.slot(&alice, 10, 0, 60, SlotStatus::Available); // touches
    h.slot(&alice, 9, 0, 60, SlotStatus::Busy); // other status
    h.slot(&bob, 9, 0, 60, SlotStatus::Available); // other user

    assert_eq!(h.store.snapshot().unwrap().slots.len(), 4);
}

// ── Update ──────────────────────────────────────────────────────────────────

#[test]
fn update_moves_and_resizes_slot() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    let moved = h
        .slots
        .update(
            slot.id,
            &SlotEdit {
                start: Some(at(14, 0)),
                duration: Some(Duration::minutes(90)),
                status: Some(SlotStatus::Busy),
            },
        )
        .unwrap();

    assert_eq!((moved.start, moved.end), (at(14, 0), at(15, 30)));
    assert_eq!(moved.status, SlotStatus::Busy);
    assert_eq!(moved.version, 1);
    assert!(moved.updated_at >= slot.updated_at);
    assert_eq!(h.slots.get(slot.id).unwrap(), moved);
}

#[test]
fn update_with_new_start_only_keeps_the_end() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    let edited = h
        .slots
        .update(
            slot.id,
            &SlotEdit {
                start: Some(at(9, 15)),
                ..SlotEdit::default()
            },
        )
        .unwrap();
    assert_eq!((edited.start, edited.end), (at(9, 15), at(10, 0)));
}

#[test]
fn update_into_an_overlap_is_a_conflict_and_changes_nothing() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let first = h.slot(&alice, 9, 0, 60, SlotStatus::Available);
    let second = h.slot(&alice, 11, 0, 60, SlotStatus::Available);

    let err = h
        .slots
        .update(
            second.id,
            &SlotEdit {
                start: Some(at(9, 30)),
                ..SlotEdit::default()
            },
        )
        .unwrap_err();

    assert_eq!(
        err,
        BookingError::Conflict("update would cause an overlap for this user/status".to_string())
    );
    assert_eq!(h.slots.get(second.id).unwrap(), second);
    assert_eq!(h.slots.get(first.id).unwrap(), first);
}

#[test]
fn update_ending_past_the_calendar_range_is_invalid_and_changes_nothing() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    let err = h
        .slots
        .update(
            slot.id,
            &SlotEdit {
                duration: Some(Duration::days(100_000_000)),
                ..SlotEdit::default()
            },
        )
        .unwrap_err();

    assert_eq!(err, BookingError::InvalidInput("slot end is out of range".to_string()));
    assert_eq!(h.slots.get(slot.id).unwrap(), slot);
}

#[test]
fn update_of_unknown_slot_is_not_found() {
    let h = Harness::new();
    let err = h.slots.update(SlotId::new(), &SlotEdit::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn unlinked_busy_slot_can_be_released() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Busy);

    let released = h
        .slots
        .update(
            slot.id,
            &SlotEdit {
                status: Some(SlotStatus::Available),
                ..SlotEdit::default()
            },
        )
        .unwrap();
    assert_eq!(released.status, SlotStatus::Available);
}

// ── Delete ──────────────────────────────────────────────────────────────────

#[test]
fn delete_removes_the_slot() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    h.slots.delete(slot.id).unwrap();
    assert_eq!(h.slots.get(slot.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(h.slots.delete(slot.id).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn deleted_slot_frees_its_interval() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Available);
    h.slots.delete(slot.id).unwrap();

    h.slot(&alice, 9, 0, 60, SlotStatus::Available);
}

// ── List ────────────────────────────────────────────────────────────────────

#[test]
fn list_returns_intersecting_slots_sorted_by_start() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let late = h.slot(&alice, 15, 0, 60, SlotStatus::Available);
    let early = h.slot(&alice, 8, 0, 120, SlotStatus::Available);
    let busy = h.slot(&alice, 12, 0, 30, SlotStatus::Busy);
    h.slot(&alice, 18, 0, 60, SlotStatus::Available); // outside

    let listed = h.slots.list(alice.id, at(9, 0), at(16, 0), None).unwrap();
    let ids: Vec<SlotId> = listed.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![early.id, busy.id, late.id]);

    let only_busy = h
        .slots
        .list(alice.id, at(9, 0), at(16, 0), Some(SlotStatus::Busy))
        .unwrap();
    assert_eq!(only_busy, vec![busy]);
}

#[test]
fn list_requires_a_forward_window() {
    let h = Harness::new();
    let alice = h.user("Alice");
    let err = h.slots.list(alice.id, at(10, 0), at(10, 0), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

// ── Locking ─────────────────────────────────────────────────────────────────

#[test]
fn update_waits_for_the_row_lock_then_times_out() {
    let h = Harness::with_config(
        StoreConfig::default().with_lock_timeout(StdDuration::from_millis(30)),
    );
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    let mut holder = h.store.begin().unwrap();
    holder.lock_slot_for_update(slot.id).unwrap();

    let err = h
        .slots
        .update(
            slot.id,
            &SlotEdit {
                status: Some(SlotStatus::Busy),
                ..SlotEdit::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.slots.delete(slot.id).unwrap_err().kind(), ErrorKind::Conflict);

    drop(holder);
    h.slots.delete(slot.id).unwrap();
}

#[test]
fn concurrent_edits_of_one_slot_are_serialized() {
    let h = Arc::new(Harness::new());
    let alice = h.user("Alice");
    let slot = h.slot(&alice, 9, 0, 60, SlotStatus::Available);

    const WRITERS: usize = 8;
    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let h = Arc::clone(&h);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let edit = SlotEdit {
                    duration: Some(Duration::minutes(10 + i as i64)),
                    ..SlotEdit::default()
                };
                h.slots.update(slot.id, &edit)
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    // Every edit took the lock in turn, so every version bump landed.
    assert_eq!(h.slots.get(slot.id).unwrap().version, WRITERS as u64);
}
