//! Logging collaborator.
//!
//! The hub reports per-session conditions (undecodable payloads, unknown
//! routing keys, read failures, heartbeat exhaustion) through [`HubLog`]
//! so applications can route them wherever they like. [`TracingLog`] is
//! the default and forwards to `tracing`.

use std::fmt;

use parking_lot::Mutex;

use crate::domain::SessionId;
use crate::ws::session::Session;

/// Severity of a hub log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Significant but expected condition.
    Notice,
    /// Something looks wrong but the session continues.
    Warn,
    /// An operation failed; the message or session was affected.
    Error,
    /// Unrecoverable for the affected session.
    Fatal,
}

/// Sink for hub log entries. `session` is `None` for hub-wide entries.
pub trait HubLog: Send + Sync + fmt::Debug {
    /// Writes one entry at the given level.
    fn log(&self, level: LogLevel, session: Option<&Session>, msg: &str);

    /// Writes a [`LogLevel::Debug`] entry.
    fn debug(&self, session: Option<&Session>, msg: &str) {
        self.log(LogLevel::Debug, session, msg);
    }

    /// Writes a [`LogLevel::Info`] entry.
    fn info(&self, session: Option<&Session>, msg: &str) {
        self.log(LogLevel::Info, session, msg);
    }

    /// Writes a [`LogLevel::Notice`] entry.
    fn notice(&self, session: Option<&Session>, msg: &str) {
        self.log(LogLevel::Notice, session, msg);
    }

    /// Writes a [`LogLevel::Warn`] entry.
    fn warn(&self, session: Option<&Session>, msg: &str) {
        self.log(LogLevel::Warn, session, msg);
    }

    /// Writes a [`LogLevel::Error`] entry.
    fn error(&self, session: Option<&Session>, msg: &str) {
        self.log(LogLevel::Error, session, msg);
    }

    /// Writes a [`LogLevel::Fatal`] entry. Never aborts the process.
    fn fatal(&self, session: Option<&Session>, msg: &str) {
        self.log(LogLevel::Fatal, session, msg);
    }
}

/// Forwards hub log entries to `tracing` with a `session_id` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl HubLog for TracingLog {
    fn log(&self, level: LogLevel, session: Option<&Session>, msg: &str) {
        let session_id = session.map_or("-", |s| s.id().as_str());
        match level {
            LogLevel::Debug => tracing::debug!(session_id, "{msg}"),
            LogLevel::Info => tracing::info!(session_id, "{msg}"),
            LogLevel::Notice => tracing::info!(session_id, notice = true, "{msg}"),
            LogLevel::Warn => tracing::warn!(session_id, "{msg}"),
            LogLevel::Error => tracing::error!(session_id, "{msg}"),
            LogLevel::Fatal => tracing::error!(session_id, fatal = true, "{msg}"),
        }
    }
}

/// One entry captured by [`MemoryLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Entry severity.
    pub level: LogLevel,
    /// Session the entry is about, if any.
    pub session_id: Option<SessionId>,
    /// Entry text.
    pub message: String,
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all entries in arrival order.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Returns `true` if any entry's text contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.records.lock().iter().any(|r| r.message.contains(needle))
    }
}

impl HubLog for MemoryLog {
    fn log(&self, level: LogLevel, session: Option<&Session>, msg: &str) {
        self.records.lock().push(LogRecord {
            level,
            session_id: session.map(|s| s.id().clone()),
            message: msg.to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_records_levels_in_order() {
        let log = MemoryLog::new();
        log.info(None, "started");
        log.error(None, "handler not found: nope");
        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records.first().map(|r| r.level), Some(LogLevel::Info));
        assert_eq!(records.last().map(|r| r.level), Some(LogLevel::Error));
        assert!(log.contains("handler not found"));
        assert!(!log.contains("parse message failed"));
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Notice);
        assert!(LogLevel::Error < LogLevel::Fatal);
    }

    #[test]
    fn tracing_log_accepts_missing_session() {
        // Without a subscriber installed this must simply be a no-op.
        TracingLog.notice(None, "hub started");
        TracingLog.fatal(None, "still running");
    }
}
