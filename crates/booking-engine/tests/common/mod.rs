//! Fixtures shared by the service-level integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use booking_engine::{
    AvailabilityService, BookingService, MemoryStore, SlotService, SlotStatus, StoreConfig,
    TimeSlot, User, UserService,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Every service wired to one shared in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub users: UserService<MemoryStore>,
    pub slots: SlotService<MemoryStore>,
    pub availability: AvailabilityService<MemoryStore>,
    pub booking: BookingService<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let store = Arc::new(MemoryStore::new(config));
        Self {
            users: UserService::new(Arc::clone(&store)),
            slots: SlotService::new(Arc::clone(&store)),
            availability: AvailabilityService::new(Arc::clone(&store)),
            booking: BookingService::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn user(&self, name: &str) -> User {
        let email = format!("{}@test.com", name.to_lowercase());
        self.users.create(&email, name).unwrap()
    }

    /// Slot of `minutes` starting at `h:m` on the test day.
    pub fn slot(&self, user: &User, h: u32, m: u32, minutes: i64, status: SlotStatus) -> TimeSlot {
        self.slots
            .create(user.id, at(h, m), Duration::minutes(minutes), Some(status))
            .unwrap()
    }
}

/// Instant on 2026-01-15 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, h, m, 0).unwrap()
}
