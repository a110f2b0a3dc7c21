use gateway_common::ForwardedUser;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

const GRAVATAR_BASE_URL: &str = "https://www.gravatar.com/avatar/";

/// User type assigned to accounts created through sign-up.
pub const DEFAULT_USER_TYPE: &str = "user";

/// A stored user account, as returned by the user store.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub photo_url: String,
    pub user_type: String,
}

/// Public-facing user profile (no email, no password hash).
///
/// This is also the user part of the session payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub user_type: String,
}

impl From<&User> for UserProfile {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            user_name: u.user_name.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            photo_url: u.photo_url.clone(),
            user_type: u.user_type.clone(),
        }
    }
}

impl From<&UserProfile> for ForwardedUser {
    fn from(p: &UserProfile) -> Self {
        Self {
            user_id: p.id,
            user_name: p.user_name.clone(),
            user_type: p.user_type.clone(),
        }
    }
}

/// A validated sign-up, ready to be inserted by the user store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub photo_url: String,
    pub user_type: String,
}

/// Gravatar URL for an email address (SHA-256 of the trimmed, lowercased address).
pub fn gravatar_url(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{GRAVATAR_BASE_URL}{hex}")
}
