use serde::{Deserialize, Serialize};

/// Header the gateway uses to tell backend services who is calling.
///
/// The gateway always strips any client-supplied value before forwarding, so
/// backends may trust it as long as they are only reachable through the
/// gateway.
pub const USER_HEADER: &str = "X-User";

/// Minimal identity projection forwarded to backend services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedUser {
    #[serde(rename = "userID")]
    pub user_id: i64,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "userType")]
    pub user_type: String,
}

impl ForwardedUser {
    /// Serialize to the compact JSON form carried in [`USER_HEADER`].
    pub fn to_header_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the header value a backend received from the gateway.
    pub fn from_header_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}
