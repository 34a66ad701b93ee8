//! Leveled, callback-based log facility.
//!
//! Applications install a callback to route agent diagnostics into their
//! own logging; the callback is invoked under a mutex so implementations
//! need not be reentrant.  Without a callback, messages fall through to
//! `tracing` so they are never lost.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::LOG_MSG_MAX;

/// Severity ladder, lowest value = most severe.  A message at level `m`
/// is delivered only when `m <= filter`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Fatal = 0,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    Trace,
    All,
}

const LEVEL_NAMES: [(&str, LogLevel); 10] = [
    ("FATAL", LogLevel::Fatal),
    ("ALERT", LogLevel::Alert),
    ("CRITICAL", LogLevel::Critical),
    ("ERROR", LogLevel::Error),
    ("WARNING", LogLevel::Warning),
    ("NOTICE", LogLevel::Notice),
    ("INFO", LogLevel::Info),
    ("DEBUG", LogLevel::Debug),
    ("TRACE", LogLevel::Trace),
    ("ALL", LogLevel::All),
];

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = LEVEL_NAMES
            .iter()
            .find(|(_, level)| level == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN");
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = Status;

    /// Case-insensitive textual level name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LEVEL_NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, level)| *level)
            .ok_or(Status::NotFound)
    }
}

/// Call-site details handed to the log callback.
#[derive(Debug, Clone, Copy)]
pub struct LogSource<'a> {
    pub file: &'a str,
    pub line: u32,
}

/// User-installed sink for agent diagnostics.
pub type LogCallback = dyn Fn(LogLevel, &LogSource<'_>, &str) + Send + Sync;

struct LogState {
    level: LogLevel,
    callback: Option<Box<LogCallback>>,
}

pub(crate) struct LogFacility {
    state: Mutex<LogState>,
}

impl LogFacility {
    pub(crate) fn new() -> Self {
        LogFacility {
            state: Mutex::new(LogState {
                level: LogLevel::Info,
                callback: None,
            }),
        }
    }

    pub(crate) fn set_level(&self, level: LogLevel) {
        if let Ok(mut state) = self.state.lock() {
            state.level = level;
        }
    }

    pub(crate) fn set_level_str(&self, name: &str) -> Result<(), Status> {
        let level = LogLevel::from_str(name)?;
        self.set_level(level);
        Ok(())
    }

    pub(crate) fn set_callback(&self, callback: Option<Box<LogCallback>>) {
        if let Ok(mut state) = self.state.lock() {
            state.callback = callback;
        }
    }

    /// Deliver a message.  The callback runs under the facility mutex;
    /// without one the message falls through to `tracing`.
    pub(crate) fn log(&self, level: LogLevel, source: &LogSource<'_>, args: fmt::Arguments<'_>) {
        let mut message = args.to_string();
        if message.len() > LOG_MSG_MAX {
            let mut cut = LOG_MSG_MAX;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }

        let state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        if level > state.level {
            return;
        }
        match &state.callback {
            Some(callback) => callback(level, source, &message),
            None => match level {
                LogLevel::Fatal | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
                    tracing::error!(file = source.file, line = source.line, "{message}")
                }
                LogLevel::Warning => {
                    tracing::warn!(file = source.file, line = source.line, "{message}")
                }
                LogLevel::Notice | LogLevel::Info => {
                    tracing::info!(file = source.file, line = source.line, "{message}")
                }
                LogLevel::Debug => {
                    tracing::debug!(file = source.file, line = source.line, "{message}")
                }
                LogLevel::Trace | LogLevel::All => {
                    tracing::trace!(file = source.file, line = source.line, "{message}")
                }
            },
        }
    }
}

/// Internal logging macro routing through the agent's log facility.
macro_rules! agent_log {
    ($facility:expr, $level:expr, $($arg:tt)*) => {
        $facility.log(
            $level,
            &$crate::log::LogSource { file: file!(), line: line!() },
            format_args!($($arg)*),
        )
    };
}

pub(crate) use agent_log;
