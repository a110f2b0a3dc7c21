pub mod connection;
pub mod hub;
pub mod registry;
pub mod server;

pub use hub::{Hub, HubError, HubStats};
pub use registry::{BroadcastReport, ConnectionId, UserId};
