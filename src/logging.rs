//! Logger capability: the sink every component writes through.
//!
//! Loggers are registry components like everything else; the `core` type
//! forwards to the process tracing pipeline.

use serde_json::Value;

use crate::daemon::counters;
use crate::registry::Category;

/// Wire-level severities, ordered by verbosity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Ignore = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl Severity {
    pub fn from_wire(level: i32) -> Self {
        match level {
            1 => Severity::Error,
            2 => Severity::Warning,
            3 => Severity::Info,
            4 => Severity::Debug,
            _ => Severity::Ignore,
        }
    }
}

pub trait LogSink: Send + Sync {
    fn emit(&self, severity: Severity, source: &str, message: &str);
}

/// Registry tag for logger types.
pub struct LogSinkTag;

impl Category for LogSinkTag {
    type Instance = dyn LogSink;
    const NAME: &'static str = "logger";
}

/// The built-in `core` logger: events land in the tracing pipeline.
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        counters::logger_created();
        TracingSink
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TracingSink {
    fn drop(&mut self) {
        counters::logger_dropped();
    }
}

impl LogSink for TracingSink {
    fn emit(&self, severity: Severity, source: &str, message: &str) {
        match severity {
            Severity::Ignore => {}
            Severity::Error => tracing::error!(source, "{message}"),
            Severity::Warning => tracing::warn!(source, "{message}"),
            Severity::Info => tracing::info!(source, "{message}"),
            Severity::Debug => tracing::debug!(source, "{message}"),
        }
    }
}

/// Pre-construction placeholder; everything it receives is discarded.
pub(crate) struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _severity: Severity, _source: &str, _message: &str) {}
}

pub(crate) fn tracing_sink_factory(
    _context: &crate::context::Context,
    _name: &str,
    _args: &Value,
) -> crate::Result<Box<dyn LogSink>> {
    Ok(Box::new(TracingSink::new()))
}
