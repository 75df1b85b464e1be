//! In-process transactional store.
//!
//! Committed rows live behind an `RwLock`. A write scope ([`MemoryTx`]) stages its
//! writes privately and applies them in one step under the write lock on commit,
//! so other scopes never observe a half-applied transaction. Row locks on slots
//! are tracked separately in a `Mutex<HashSet<SlotId>>` with a `Condvar` for
//! blocking waits, bounded by [`StoreConfig::lock_timeout`].
//!
//! Constraints (slot overlap per user and status, e-mail uniqueness, slot
//! versions) are checked when a write is staged and checked again at commit
//! against whatever other scopes committed in the meantime.

use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{ReadTx, Store, WriteTx};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::{Meeting, MeetingId, SlotId, SlotStatus, TimeSlot, User, UserId};

/// Serializable copy of every committed row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub slots: Vec<TimeSlot>,
    #[serde(default)]
    pub meetings: Vec<Meeting>,
}

impl StoreSnapshot {
    /// Reject rows that no write path could have produced.
    fn validate(&self) -> Result<(), StoreError> {
        if let Some(slot) = self.slots.iter().find(|s| s.end <= s.start) {
            return Err(StoreError::InvalidSnapshot(format!(
                "slot {} ends ({}) before it starts ({})",
                slot.id, slot.end, slot.start
            )));
        }
        if let Some(meeting) = self.meetings.iter().find(|m| m.end <= m.start) {
            return Err(StoreError::InvalidSnapshot(format!(
                "meeting {} ends ({}) before it starts ({})",
                meeting.id, meeting.end, meeting.start
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    slots: BTreeMap<SlotId, TimeSlot>,
    meetings: BTreeMap<MeetingId, Meeting>,
}

/// Thread-safe in-memory implementation of [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: StoreConfig,
    tables: RwLock<Tables>,
    row_locks: Mutex<HashSet<SlotId>>,
    lock_released: Condvar,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Build a store pre-populated with `snapshot`'s rows.
    ///
    /// # Errors
    /// `StoreError::InvalidSnapshot` when a slot or meeting does not end after
    /// it starts.
    pub fn from_snapshot(
        snapshot: StoreSnapshot,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        snapshot.validate()?;
        let tables = Tables {
            users: snapshot.users.into_iter().map(|u| (u.id, u)).collect(),
            slots: snapshot.slots.into_iter().map(|s| (s.id, s)).collect(),
            meetings: snapshot.meetings.into_iter().map(|m| (m.id, m)).collect(),
        };
        Ok(Self {
            config,
            tables: RwLock::new(tables),
            ..Self::default()
        })
    }

    /// Copy out all committed rows, ordered by id.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let tables = self.tables()?;
        Ok(StoreSnapshot {
            users: tables.users.values().cloned().collect(),
            slots: tables.slots.values().cloned().collect(),
            meetings: tables.meetings.values().cloned().collect(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn tables(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn tables_mut(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    /// Block until `slot_id` is unlocked, then take its lock.
    fn acquire(&self, slot_id: SlotId) -> Result<(), StoreError> {
        let started = Instant::now();
        let deadline = started + self.config.lock_timeout;
        let mut held = self.row_locks.lock().map_err(|_| StoreError::Poisoned)?;

        while held.contains(&slot_id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(%slot_id, "row lock wait timed out");
                return Err(StoreError::LockTimeout { slot_id });
            }
            let (guard, _) = self
                .lock_released
                .wait_timeout(held, remaining)
                .map_err(|_| StoreError::Poisoned)?;
            held = guard;
        }

        held.insert(slot_id);
        trace!(%slot_id, waited_ms = started.elapsed().as_millis() as u64, "row lock acquired");
        Ok(())
    }

    fn release<'i>(&self, slot_ids: impl IntoIterator<Item = &'i SlotId>) {
        // A poisoned lock set can only come from a panic elsewhere; recover the
        // set so waiters are not stranded.
        let mut held = match self.row_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for id in slot_ids {
            held.remove(id);
        }
        drop(held);
        self.lock_released.notify_all();
    }
}

impl Store for MemoryStore {
    type Read<'a> = MemoryRead<'a>;
    type Write<'a> = MemoryTx<'a>;

    fn read(&self) -> Result<MemoryRead<'_>, StoreError> {
        Ok(MemoryRead {
            tables: self.tables()?,
        })
    }

    fn begin(&self) -> Result<MemoryTx<'_>, StoreError> {
        Ok(MemoryTx {
            store: self,
            locked: HashSet::new(),
            users: Vec::new(),
            slots: BTreeMap::new(),
            meetings: Vec::new(),
            committed: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Read scope
// ---------------------------------------------------------------------------

/// Read-only scope. Holds a shared lock on the tables, so it observes one
/// consistent state for its whole lifetime.
pub struct MemoryRead<'a> {
    tables: RwLockReadGuard<'a, Tables>,
}

impl ReadTx for MemoryRead<'_> {
    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.users.get(&id).cloned())
    }

    fn find_users_by_id(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        Ok(users_by_id(ids, |id| self.tables.users.get(&id).cloned()))
    }

    fn find_slot(&self, id: SlotId) -> Result<Option<TimeSlot>, StoreError> {
        Ok(self.tables.slots.get(&id).cloned())
    }

    fn find_slots_in_range(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: Option<SlotStatus>,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        Ok(slots_in_range(self.tables.slots.values(), &[user_id], from, to, status))
    }

    fn find_slots_for_users_in_range(
        &self,
        user_ids: &[UserId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        Ok(slots_in_range(self.tables.slots.values(), user_ids, from, to, None))
    }

    fn find_meeting(&self, id: MeetingId) -> Result<Option<Meeting>, StoreError> {
        Ok(self.tables.meetings.get(&id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Write scope
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SlotWrite {
    Insert(TimeSlot),
    Update { slot: TimeSlot, base_version: u64 },
    Delete { base_version: u64 },
}

impl SlotWrite {
    fn current(&self) -> Option<&TimeSlot> {
        match self {
            SlotWrite::Insert(slot) | SlotWrite::Update { slot, .. } => Some(slot),
            SlotWrite::Delete { .. } => None,
        }
    }

    fn base_version(&self) -> Option<u64> {
        match self {
            SlotWrite::Insert(_) => None,
            SlotWrite::Update { base_version, .. } | SlotWrite::Delete { base_version } => {
                Some(*base_version)
            }
        }
    }
}

/// Write scope over a [`MemoryStore`].
///
/// Reads see committed rows overlaid with this scope's own staged writes.
/// Dropping the scope without committing discards the staged writes; row locks
/// are released either way.
pub struct MemoryTx<'a> {
    store: &'a MemoryStore,
    locked: HashSet<SlotId>,
    users: Vec<User>,
    slots: BTreeMap<SlotId, SlotWrite>,
    meetings: Vec<Meeting>,
    committed: bool,
}

impl MemoryTx<'_> {
    fn has_writes(&self) -> bool {
        !(self.users.is_empty() && self.slots.is_empty() && self.meetings.is_empty())
    }

    fn effective_slot(&self, tables: &Tables, id: SlotId) -> Option<TimeSlot> {
        match self.slots.get(&id) {
            Some(write) => write.current().cloned(),
            None => tables.slots.get(&id).cloned(),
        }
    }

    fn effective_slots<'t>(&'t self, tables: &'t Tables) -> impl Iterator<Item = &'t TimeSlot> {
        let staged = &self.slots;
        tables
            .slots
            .values()
            .filter(move |slot| !staged.contains_key(&slot.id))
            .chain(staged.values().filter_map(SlotWrite::current))
    }

    fn effective_user(&self, tables: &Tables, id: UserId) -> Option<User> {
        self.users
            .iter()
            .find(|u| u.id == id)
            .or_else(|| tables.users.get(&id))
            .cloned()
    }

    fn email_taken(&self, tables: &Tables, email: &str) -> bool {
        self.users
            .iter()
            .chain(tables.users.values())
            .any(|u| u.email == email)
    }
}

impl ReadTx for MemoryTx<'_> {
    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let tables = self.store.tables()?;
        Ok(self.effective_user(&tables, id))
    }

    fn find_users_by_id(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let tables = self.store.tables()?;
        Ok(users_by_id(ids, |id| self.effective_user(&tables, id)))
    }

    fn find_slot(&self, id: SlotId) -> Result<Option<TimeSlot>, StoreError> {
        let tables = self.store.tables()?;
        Ok(self.effective_slot(&tables, id))
    }

    fn find_slots_in_range(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: Option<SlotStatus>,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        let tables = self.store.tables()?;
        Ok(slots_in_range(self.effective_slots(&tables), &[user_id], from, to, status))
    }

    fn find_slots_for_users_in_range(
        &self,
        user_ids: &[UserId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        let tables = self.store.tables()?;
        Ok(slots_in_range(self.effective_slots(&tables), user_ids, from, to, None))
    }

    fn find_meeting(&self, id: MeetingId) -> Result<Option<Meeting>, StoreError> {
        if let Some(meeting) = self.meetings.iter().find(|m| m.id == id) {
            return Ok(Some(meeting.clone()));
        }
        let tables = self.store.tables()?;
        Ok(tables.meetings.get(&id).cloned())
    }
}

impl WriteTx for MemoryTx<'_> {
    fn lock_slot_for_update(&mut self, id: SlotId) -> Result<Option<TimeSlot>, StoreError> {
        let newly_locked = !self.locked.contains(&id);
        if newly_locked {
            self.store.acquire(id)?;
            self.locked.insert(id);
        }

        let store = self.store;
        let slot = {
            let tables = store.tables()?;
            self.effective_slot(&tables, id)
        };

        if slot.is_none() && newly_locked {
            self.locked.remove(&id);
            store.release([&id]);
        }
        Ok(slot)
    }

    fn insert_user(&mut self, user: User) -> Result<User, StoreError> {
        let store = self.store;
        let tables = store.tables()?;
        if self.email_taken(&tables, &user.email) {
            return Err(StoreError::DuplicateEmail(user.email));
        }
        drop(tables);
        self.users.push(user.clone());
        Ok(user)
    }

    fn insert_slot(&mut self, slot: TimeSlot) -> Result<TimeSlot, StoreError> {
        let store = self.store;
        let tables = store.tables()?;
        check_overlap(self.effective_slots(&tables), &slot)?;
        drop(tables);
        self.slots.insert(slot.id, SlotWrite::Insert(slot.clone()));
        Ok(slot)
    }

    fn update_slot(&mut self, mut slot: TimeSlot) -> Result<TimeSlot, StoreError> {
        let store = self.store;
        let tables = store.tables()?;
        let id = slot.id;

        let staged_insert = match self.slots.get(&id) {
            Some(SlotWrite::Insert(_)) => true,
            Some(SlotWrite::Update { .. }) => false,
            Some(SlotWrite::Delete { .. }) => {
                return Err(StoreError::NotFound(format!("slot {id}")));
            }
            None => match tables.slots.get(&id) {
                Some(row) if row.version == slot.version => false,
                Some(_) => return Err(StoreError::StaleVersion { slot_id: id }),
                None => return Err(StoreError::NotFound(format!("slot {id}"))),
            },
        };

        check_overlap(self.effective_slots(&tables), &slot)?;
        drop(tables);

        slot.updated_at = Utc::now();
        let write = if staged_insert {
            SlotWrite::Insert(slot.clone())
        } else {
            let base_version = self
                .slots
                .get(&id)
                .and_then(SlotWrite::base_version)
                .unwrap_or(slot.version);
            slot.version = base_version + 1;
            SlotWrite::Update {
                slot: slot.clone(),
                base_version,
            }
        };
        self.slots.insert(id, write);
        Ok(slot)
    }

    fn delete_slot(&mut self, id: SlotId) -> Result<(), StoreError> {
        let store = self.store;
        let tables = store.tables()?;

        let base_version = match self.slots.get(&id) {
            Some(SlotWrite::Insert(_)) => None,
            Some(SlotWrite::Update { base_version, .. }) => Some(*base_version),
            Some(SlotWrite::Delete { .. }) => {
                return Err(StoreError::NotFound(format!("slot {id}")));
            }
            None => match tables.slots.get(&id) {
                Some(row) => Some(row.version),
                None => return Err(StoreError::NotFound(format!("slot {id}"))),
            },
        };
        drop(tables);

        match base_version {
            Some(base_version) => {
                self.slots.insert(id, SlotWrite::Delete { base_version });
            }
            None => {
                self.slots.remove(&id);
            }
        }
        Ok(())
    }

    fn insert_meeting(&mut self, meeting: Meeting) -> Result<Meeting, StoreError> {
        self.meetings.push(meeting.clone());
        Ok(meeting)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let store = self.store;
        let mut tables = store.tables_mut()?;

        // Re-validate against rows committed by other scopes since staging.
        for user in &self.users {
            if tables.users.values().any(|u| u.email == user.email) {
                return Err(StoreError::DuplicateEmail(user.email.clone()));
            }
        }
        for (id, write) in &self.slots {
            if let Some(base_version) = write.base_version() {
                match tables.slots.get(id) {
                    Some(row) if row.version == base_version => {}
                    Some(_) => return Err(StoreError::StaleVersion { slot_id: *id }),
                    None => return Err(StoreError::NotFound(format!("slot {id}"))),
                }
            }
            if let Some(slot) = write.current() {
                check_overlap(self.effective_slots(&tables), slot)?;
            }
        }

        let users = mem::take(&mut self.users);
        let slots = mem::take(&mut self.slots);
        let meetings = mem::take(&mut self.meetings);
        let counts = (users.len(), slots.len(), meetings.len());

        for user in users {
            tables.users.insert(user.id, user);
        }
        for (id, write) in slots {
            match write {
                SlotWrite::Insert(slot) | SlotWrite::Update { slot, .. } => {
                    tables.slots.insert(id, slot);
                }
                SlotWrite::Delete { .. } => {
                    tables.slots.remove(&id);
                }
            }
        }
        for meeting in meetings {
            tables.meetings.insert(meeting.id, meeting);
        }
        drop(tables);

        self.committed = true;
        trace!(
            users = counts.0,
            slots = counts.1,
            meetings = counts.2,
            "transaction committed"
        );
        Ok(())
    }
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if !self.committed && self.has_writes() {
            debug!(
                staged_slots = self.slots.len(),
                staged_meetings = self.meetings.len(),
                "rolling back uncommitted transaction"
            );
        }
        if !self.locked.is_empty() {
            self.store.release(&self.locked);
        }
    }
}

// ---------------------------------------------------------------------------
// Shared query helpers
// ---------------------------------------------------------------------------

fn users_by_id(ids: &[UserId], lookup: impl Fn(UserId) -> Option<User>) -> Vec<User> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| lookup(*id))
        .collect()
}

fn slots_in_range<'t>(
    slots: impl Iterator<Item = &'t TimeSlot>,
    user_ids: &[UserId],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    status: Option<SlotStatus>,
) -> Vec<TimeSlot> {
    slots
        .filter(|s| user_ids.contains(&s.user_id))
        .filter(|s| status.is_none_or(|status| s.status == status))
        .filter(|s| s.intersects(from, to))
        .cloned()
        .collect()
}

/// Enforce that no other slot of the same user and status overlaps `candidate`.
fn check_overlap<'t>(
    mut others: impl Iterator<Item = &'t TimeSlot>,
    candidate: &TimeSlot,
) -> Result<(), StoreError> {
    let clash = others.any(|s| {
        s.id != candidate.id
            && s.user_id == candidate.user_id
            && s.status == candidate.status
            && s.intersects(candidate.start, candidate.end)
    });
    if clash {
        return Err(StoreError::Overlap {
            user_id: candidate.user_id,
            status: candidate.status,
        });
    }
    Ok(())
}
