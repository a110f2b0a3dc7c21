//! Interface to the user account store.
//!
//! Account persistence lives in another service; the gateway only needs
//! lookup by email and insertion on sign-up.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::models::user::{NewUser, User};

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("{0} is already registered")]
    Duplicate(&'static str),
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError>;
    async fn insert(&self, user: NewUser) -> Result<User, UserStoreError>;
}

#[derive(Default)]
struct Users {
    next_id: i64,
    by_email: HashMap<String, User>,
}

/// In-memory user store for tests and local development.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Users>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        let key = email.trim().to_lowercase();
        Ok(self.inner.lock().by_email.get(&key).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, UserStoreError> {
        let key = user.email.trim().to_lowercase();
        let mut inner = self.inner.lock();
        if inner.by_email.contains_key(&key) {
            return Err(UserStoreError::Duplicate("email"));
        }
        if inner
            .by_email
            .values()
            .any(|u| u.user_name.eq_ignore_ascii_case(&user.user_name))
        {
            return Err(UserStoreError::Duplicate("user name"));
        }

        inner.next_id += 1;
        let stored = User {
            id: inner.next_id,
            email: user.email,
            password_hash: user.password_hash,
            user_name: user.user_name,
            first_name: user.first_name,
            last_name: user.last_name,
            photo_url: user.photo_url,
            user_type: user.user_type,
        };
        inner.by_email.insert(key, stored.clone());
        Ok(stored)
    }
}
