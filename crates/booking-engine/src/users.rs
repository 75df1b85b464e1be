//! User registration and lookup.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{BookingError, Result};
use crate::model::{User, UserId};
use crate::store::{ReadTx, Store, WriteTx};

pub struct UserService<S> {
    store: Arc<S>,
}

impl<S: Store> UserService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Register a user. E-mail addresses are unique.
    ///
    /// # Errors
    /// - `InvalidInput` for a blank name or a malformed e-mail.
    /// - `Conflict` when the e-mail is already registered.
    pub fn create(&self, email: &str, name: &str) -> Result<User> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(BookingError::invalid("a valid email is required"));
        }
        if name.is_empty() {
            return Err(BookingError::invalid("name is required"));
        }

        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let mut tx = self.store.begin()?;
        let user = tx.insert_user(user)?;
        tx.commit()?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub fn get(&self, id: UserId) -> Result<User> {
        self.store
            .read()?
            .find_user(id)?
            .ok_or_else(|| BookingError::not_found("user not found"))
    }
}
