//! Task logger
//!
//! Handlers log through a [`TaskLogger`] found in their worker context. Messages
//! pass a [`LogMask`] filter and are forwarded to `tracing`; where they end up is
//! decided by whoever installs the subscriber.

use std::fmt;
use std::ops::BitOr;

/// Bitmask of enabled message levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogMask(u8);

impl LogMask {
    pub const NONE: LogMask = LogMask(0);
    pub const ERROR: LogMask = LogMask(1);
    pub const NOTICE: LogMask = LogMask(2);
    pub const DEBUG: LogMask = LogMask(4);
    pub const ALL: LogMask = LogMask(7);

    pub const fn from_bits(bits: u8) -> Self {
        LogMask(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every level of `other` is enabled
    pub const fn contains(self, other: LogMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for LogMask {
    fn default() -> Self {
        LogMask::ALL
    }
}

impl BitOr for LogMask {
    type Output = LogMask;

    fn bitor(self, rhs: LogMask) -> LogMask {
        LogMask(self.0 | rhs.0)
    }
}

/// Level-filtered logger handed to tasks
#[derive(Debug, Clone)]
pub struct TaskLogger {
    mask: LogMask,
    worker_id: String,
}

impl TaskLogger {
    pub fn new(worker_id: impl Into<String>, mask: LogMask) -> Self {
        Self {
            mask,
            worker_id: worker_id.into(),
        }
    }

    pub fn mask(&self) -> LogMask {
        self.mask
    }

    pub fn enabled(&self, level: LogMask) -> bool {
        self.mask.contains(level)
    }

    /// Log a failure together with its error chain
    pub fn log_exception(&self, err: &dyn std::error::Error) {
        if !self.enabled(LogMask::ERROR) {
            return;
        }
        let mut chain = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        tracing::error!(worker_id = %self.worker_id, error = %chain, "Exception");
    }

    pub fn log_error(&self, message: impl fmt::Display) {
        if self.enabled(LogMask::ERROR) {
            tracing::error!(worker_id = %self.worker_id, "{}", message);
        }
    }

    pub fn log_notice(&self, message: impl fmt::Display) {
        if self.enabled(LogMask::NOTICE) {
            tracing::info!(worker_id = %self.worker_id, "{}", message);
        }
    }

    pub fn log_debug(&self, message: impl fmt::Display) {
        if self.enabled(LogMask::DEBUG) {
            tracing::debug!(worker_id = %self.worker_id, "{}", message);
        }
    }
}
