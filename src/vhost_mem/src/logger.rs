// Copyright 2025 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging for the crate, through the `log` facade.
//!
//! Translation itself never logs, errors are returned to the caller which decides whether they
//! are worth reporting. Only building a memory map does: `debug` when a map is built, `warn`
//! when a memory table is rejected.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

pub use log::{debug, error, info, trace, warn};
use log::{Log, Metadata, Record};
use serde::{Deserialize, Serialize};

/// Level set by [`Logger::init`], until a configuration selects another one.
pub const DEFAULT_LEVEL: log::LevelFilter = log::LevelFilter::Info;

/// The process wide logger.
pub static LOGGER: Logger = Logger::new();

/// Errors associated with installing or configuring the [`Logger`].
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum LoggerError {
    /// Cannot install the logger: {0}
    Init(#[from] log::SetLoggerError),
    /// Cannot open the log file: {0}
    Open(#[from] std::io::Error),
}

/// Invalid log level: {0}
#[derive(Debug, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub struct InvalidLevel(String);

/// Verbosity threshold of the logger.
///
/// Parsed case-insensitively from the `log` level names, with `warning` as an alias of `warn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct LevelFilter(log::LevelFilter);

impl From<log::LevelFilter> for LevelFilter {
    fn from(filter: log::LevelFilter) -> Self {
        LevelFilter(filter)
    }
}

impl From<LevelFilter> for log::LevelFilter {
    fn from(filter: LevelFilter) -> Self {
        filter.0
    }
}

impl FromStr for LevelFilter {
    type Err = InvalidLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("warning") {
            return Ok(LevelFilter(log::LevelFilter::Warn));
        }
        log::LevelFilter::from_str(s)
            .map(LevelFilter)
            .map_err(|_| InvalidLevel(s.to_string()))
    }
}

impl TryFrom<String> for LevelFilter {
    type Error = InvalidLevel;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LevelFilter> for String {
    fn from(filter: LevelFilter) -> Self {
        filter.0.as_str().to_ascii_lowercase()
    }
}

/// Logger settings. Fields left out keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    /// File the log lines are appended to, instead of stderr.
    pub log_path: Option<PathBuf>,
    /// Maximum level of the records written.
    pub level: Option<LevelFilter>,
    /// Whether lines carry the level of the record.
    pub show_level: Option<bool>,
    /// Whether lines carry the source file and line of the record.
    pub show_log_origin: Option<bool>,
    /// Only records whose module path starts with this prefix are written.
    pub module: Option<String>,
}

#[derive(Debug)]
struct Output {
    file: Option<File>,
    module: Option<String>,
    show_level: bool,
    show_origin: bool,
}

impl Output {
    fn accepts(&self, record: &Record) -> bool {
        match (&self.module, record.module_path()) {
            (None, _) => true,
            (Some(prefix), Some(path)) => path.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }

    // `<seconds>.<micros> [<thread>[:<level>][:<file>:<line>]] <message>`
    fn line(&self, record: &Record) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut line = format!(
            "{}.{:06} [{}",
            now.as_secs(),
            now.subsec_micros(),
            thread::current().name().unwrap_or("-")
        );
        // Writing into a `String` cannot fail.
        if self.show_level {
            let _ = write!(line, ":{}", record.level());
        }
        if self.show_origin {
            let _ = write!(line, ":{}:", record.file().unwrap_or("?"));
            let _ = match record.line() {
                Some(number) => write!(line, "{number}"),
                None => write!(line, "?"),
            };
        }
        let _ = writeln!(line, "] {}", record.args());
        line
    }
}

/// Logger writing one line per record, to a file or to stderr.
#[derive(Debug)]
pub struct Logger {
    output: Mutex<Output>,
    missed_lines: AtomicUsize,
}

impl Logger {
    const fn new() -> Self {
        Logger {
            output: Mutex::new(Output {
                file: None,
                module: None,
                show_level: false,
                show_origin: false,
            }),
            missed_lines: AtomicUsize::new(0),
        }
    }

    fn output(&self) -> MutexGuard<'_, Output> {
        // A panic while holding the lock cannot leave `Output` half updated.
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Installs this logger as the `log` backend, at [`DEFAULT_LEVEL`].
    pub fn init(&'static self) -> Result<(), LoggerError> {
        log::set_logger(self)?;
        log::set_max_level(DEFAULT_LEVEL);
        Ok(())
    }

    /// Applies `config`. On error the logger is left unchanged.
    pub fn configure(&self, config: LoggerConfig) -> Result<(), LoggerError> {
        let file = config
            .log_path
            .map(|path| OpenOptions::new().create(true).append(true).open(path))
            .transpose()?;

        if let Some(level) = config.level {
            log::set_max_level(level.into());
        }

        let mut output = self.output();
        if file.is_some() {
            output.file = file;
        }
        if let Some(show_level) = config.show_level {
            output.show_level = show_level;
        }
        if let Some(show_origin) = config.show_log_origin {
            output.show_origin = show_origin;
        }
        if config.module.is_some() {
            output.module = config.module;
        }
        Ok(())
    }

    /// Number of lines that could not be written.
    pub fn missed_lines(&self) -> usize {
        self.missed_lines.load(Ordering::Relaxed)
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        let mut output = self.output();
        if !output.accepts(record) {
            return;
        }

        let line = output.line(record);
        let result = match output.file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()),
            None => std::io::stderr().write_all(line.as_bytes()),
        };
        if result.is_err() {
            self.missed_lines.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {
        if let Some(file) = self.output().file.as_mut() {
            let _ = file.flush();
        }
    }
}
