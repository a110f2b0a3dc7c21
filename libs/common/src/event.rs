//! Envelope for events published by backend services onto the message bus.
//!
//! The gateway does not enforce a schema on event payloads. The only field it
//! looks at is `userIDs`, which selects the recipients; everything else is
//! relayed to clients verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RECIPIENTS_FIELD: &str = "userIDs";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    /// Recipients. `None` means the publisher did not target anyone, an empty
    /// list means every connected user.
    #[serde(rename = "userIDs", default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<i64>>,
}

impl EventEnvelope {
    /// Extract the recipient list from a raw payload.
    ///
    /// Returns `Ok(None)` when the payload is not a JSON object carrying a
    /// `userIDs` field, and an error when the field is present but is not a
    /// list of integer ids.
    pub fn recipients(payload: &[u8]) -> Result<Option<Vec<i64>>, serde_json::Error> {
        let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(payload) else {
            return Ok(None);
        };
        match fields.remove(RECIPIENTS_FIELD) {
            None => Ok(None),
            Some(ids) => serde_json::from_value(ids).map(Some),
        }
    }
}
