//! Logging macros and the protocol frame tap.
//!
//! All diagnostics go through `tracing`. The macros keep call sites short and give the
//! crate one place to change how messages are emitted. Frame-level monitoring is an
//! optional [`FrameTap`] on the protocol layer rather than a separate code path.

use notifier_shared::Frame;

pub fn log_info_impl(msg: &str) {
    tracing::info!("{}", msg);
}

pub fn log_error_impl(msg: &str) {
    tracing::error!("{}", msg);
}

pub fn log_warn_impl(msg: &str) {
    tracing::warn!("{}", msg);
}

pub fn log_debug_impl(msg: &str) {
    tracing::debug!("{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}

/// Which way a frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        }
    }
}

/// Observer for every frame the protocol layer sends or receives.
pub trait FrameTap: Send + Sync {
    fn on_frame(&self, direction: Direction, frame: &Frame);

    /// Heartbeat EOLs carry no frame.
    fn on_heartbeat(&self, _direction: Direction) {}
}

/// Emits one structured `trace` event per frame under the `notifier::frames` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTap;

impl FrameTap for TracingTap {
    fn on_frame(&self, direction: Direction, frame: &Frame) {
        tracing::trace!(
            target: "notifier::frames",
            direction = direction.as_str(),
            command = frame.command.as_str(),
            destination = frame.destination().unwrap_or(""),
            body_len = frame.body.len(),
            "stomp frame"
        );
    }

    fn on_heartbeat(&self, direction: Direction) {
        tracing::trace!(
            target: "notifier::frames",
            direction = direction.as_str(),
            "heartbeat"
        );
    }
}
