//! # booking-engine
//!
//! Time-slot publishing, cross-user availability, and race-safe meeting booking.
//!
//! Users publish AVAILABLE or BUSY time slots. The engine answers "when are these
//! people free?" by subtracting busy time from available time per user and
//! intersecting the results, and it books meetings against a slot so that at
//! most one booking of any slot ever succeeds, however many callers race for it.
//!
//! Persistence is behind the [`store::Store`] port; [`store::memory::MemoryStore`]
//! is a thread-safe in-process implementation.
//!
//! ## Modules
//!
//! - [`interval`] — Set difference and intersection over sorted interval lists
//! - [`availability`] — Per-user and common free/busy views
//! - [`slot`] — Slot lifecycle (AVAILABLE/BUSY) and slot operations
//! - [`booking`] — Atomic meeting booking
//! - [`users`] — User registration and lookup
//! - [`model`] — Users, slots, meetings, and their ids
//! - [`store`] — Storage port and the in-memory adapter
//! - [`config`] — Store tunables
//! - [`error`] — Error types

pub mod availability;
pub mod booking;
pub mod config;
pub mod error;
pub mod interval;
pub mod model;
pub mod slot;
pub mod store;
pub mod users;

pub use availability::{AvailabilityResult, AvailabilityService, UserAvailability};
pub use booking::{BookingService, ScheduleRequest};
pub use config::StoreConfig;
pub use error::{BookingError, ErrorKind, StoreError};
pub use interval::{intersect_all, intersect_two, subtract, Interval};
pub use model::{Meeting, MeetingId, SlotId, SlotStatus, TimeSlot, User, UserId};
pub use slot::{SlotEdit, SlotService};
pub use store::memory::{MemoryStore, StoreSnapshot};
pub use store::Store;
pub use users::UserService;
