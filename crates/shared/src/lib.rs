//! Shared types for the notifier client: wire models, STOMP framing and errors.

pub mod error;
pub mod frame;
pub mod models;
pub mod protocol;

pub use error::*;
pub use frame::*;
pub use models::*;
pub use protocol::*;
