//! Shared application state published by the dispatcher.

pub mod unread;

pub use unread::{OptimisticUnread, UnreadCount};
