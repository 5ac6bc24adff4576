//! Log adapter capability used by the interpreter.\
//! Two built-in adapters exist: one forwarding to the `log` facade and one
//! capturing entries into a bounded in-memory ring for tests.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[cfg(all(not(test), feature = "EnvLog"))]
use log::{debug, error, info, trace, warn};

#[cfg(any(test, not(feature = "EnvLog")))]
use std::{
    println as trace, println as debug, println as error, println as info, println as warn,
};

/// Totally ordered log levels: `trace < debug < info < warn < error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => f.write_str("trace"),
            LogLevel::Debug => f.write_str("debug"),
            LogLevel::Info => f.write_str("info"),
            LogLevel::Warn => f.write_str("warn"),
            LogLevel::Error => f.write_str("error"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(input: &str) -> Result<LogLevel, Self::Err> {
        match input.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

/// One captured log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

/// Capability used by the interpreter to emit structured log records.\
/// The interpreter attaches the current active leaves and the current event
/// name as metadata on every record.
pub trait LogAdapter: Send {
    fn log(&mut self, level: LogLevel, message: &str, metadata: &HashMap<String, String>);

    fn enabled(&self, level: LogLevel) -> bool;
}

/// Adapter that forwards records to the external `log` sink.
pub struct SinkLogAdapter {
    min_level: LogLevel,
}

impl SinkLogAdapter {
    pub fn new(min_level: LogLevel) -> SinkLogAdapter {
        SinkLogAdapter { min_level }
    }
}

impl Default for SinkLogAdapter {
    fn default() -> Self {
        SinkLogAdapter::new(LogLevel::Info)
    }
}

fn format_metadata(metadata: &HashMap<String, String>) -> String {
    if metadata.is_empty() {
        return String::new();
    }
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();
    let mut buf = String::from(" {");
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            buf.push_str(", ");
        }
        buf.push_str(k);
        buf.push('=');
        buf.push_str(metadata.get(*k).unwrap());
    }
    buf.push('}');
    buf
}

impl LogAdapter for SinkLogAdapter {
    fn log(&mut self, level: LogLevel, message: &str, metadata: &HashMap<String, String>) {
        if !self.enabled(level) {
            return;
        }
        let meta = format_metadata(metadata);
        match level {
            LogLevel::Trace => trace!("{}{}", message, meta),
            LogLevel::Debug => debug!("{}{}", message, meta),
            LogLevel::Info => info!("{}{}", message, meta),
            LogLevel::Warn => warn!("{}{}", message, meta),
            LogLevel::Error => error!("{}{}", message, meta),
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

/// Adapter that captures records into a bounded ring buffer.\
/// Clones share the same buffer, so a test can keep one handle while the
/// state chart owns the other.
#[derive(Clone)]
pub struct RingLogAdapter {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
    min_level: LogLevel,
}

impl RingLogAdapter {
    pub fn new(capacity: usize, min_level: LogLevel) -> RingLogAdapter {
        RingLogAdapter {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            min_level,
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// True if any captured record at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl Default for RingLogAdapter {
    fn default() -> Self {
        RingLogAdapter::new(256, LogLevel::Trace)
    }
}

impl LogAdapter for RingLogAdapter {
    fn log(&mut self, level: LogLevel, message: &str, metadata: &HashMap<String, String>) {
        if !self.enabled(level) {
            return;
        }
        let mut guard = self.entries.lock().unwrap();
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(LogEntry {
            level,
            message: message.to_string(),
            metadata: metadata.clone(),
        });
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}
