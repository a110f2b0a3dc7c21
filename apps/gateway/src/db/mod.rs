pub mod kv;
pub mod users;
