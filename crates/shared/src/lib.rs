//! Shared types for the supportdesk realtime server and its clients.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
