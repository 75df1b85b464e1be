//! Users, time slots, and meetings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::interval::Interval;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id! {
    /// Identifier of a [`User`].
    UserId
}

define_id! {
    /// Identifier of a [`TimeSlot`].
    SlotId
}

define_id! {
    /// Identifier of a [`Meeting`].
    MeetingId
}

/// A registered user. Users are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Unique across all users.
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// The two states a slot can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    #[default]
    Available,
    Busy,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Available => f.write_str("AVAILABLE"),
            SlotStatus::Busy => f.write_str("BUSY"),
        }
    }
}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(SlotStatus::Available),
            "BUSY" => Ok(SlotStatus::Busy),
            other => Err(format!("unknown slot status '{other}' (expected AVAILABLE or BUSY)")),
        }
    }
}

/// A user-owned, status-tagged time interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: SlotId,
    pub user_id: UserId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SlotStatus,
    /// Back-reference to the meeting this slot was booked for. Lookup only;
    /// the meeting does not own the slot.
    pub meeting_id: Option<MeetingId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by the store on every committed update.
    pub version: u64,
}

impl TimeSlot {
    pub fn interval(&self) -> Interval {
        Interval::from_bounds_unchecked(self.start, self.end)
    }

    /// A slot is linked while it references a meeting.
    pub fn is_linked(&self) -> bool {
        self.meeting_id.is_some()
    }

    /// Whether the slot's interval intersects `[from, to)`.
    pub fn intersects(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start < to && self.end > from
    }
}

/// A booked meeting. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: MeetingId,
    pub organizer_id: UserId,
    /// Copied from the organizer's slot at booking time.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    /// Distinct participants in request order; never contains the organizer.
    pub participant_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}
