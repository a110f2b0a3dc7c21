pub mod event;
pub mod identity;

pub use event::EventEnvelope;
pub use identity::{ForwardedUser, USER_HEADER};
