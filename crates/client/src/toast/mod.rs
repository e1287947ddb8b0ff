//! Presentation engine: stacked, self-dismissing toasts.
//!
//! The [`ToastManager`] owns every visible [`ToastHandle`] and its removal timer.
//! Rendering is a pure function of the ordered handles ([`render`]), so any UI layer,
//! or a test, can draw the stack without touching the manager's internals.

mod handle;
mod manager;
mod render;

pub use handle::{Severity, ToastHandle, ToastId, ToastRequest};
pub use manager::{RemovalReason, ToastEvent, ToastManager};
pub use render::{default_title, render, Locale, Scheme, ToastView};
