//! Per-session log buffers configured from the client's logging preferences.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Log type fed with the automation driver's output.
pub const DRIVER_LOG: &str = "driver";

const DEFAULT_CAPACITY: usize = 2000;

/// Wire-protocol log levels, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
	All,
	Debug,
	Info,
	Warning,
	Severe,
	Off,
}

impl LogLevel {
	pub fn as_str(self) -> &'static str {
		match self {
			LogLevel::All => "ALL",
			LogLevel::Debug => "DEBUG",
			LogLevel::Info => "INFO",
			LogLevel::Warning => "WARNING",
			LogLevel::Severe => "SEVERE",
			LogLevel::Off => "OFF",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LogLevel {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"ALL" => Ok(LogLevel::All),
			"DEBUG" | "FINE" => Ok(LogLevel::Debug),
			"INFO" => Ok(LogLevel::Info),
			"WARNING" => Ok(LogLevel::Warning),
			"SEVERE" => Ok(LogLevel::Severe),
			"OFF" => Ok(LogLevel::Off),
			other => Err(format!("unknown log level `{other}`")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
	pub timestamp_ms: u64,
	pub level: LogLevel,
	pub message: String,
}

struct LogInner {
	thresholds: BTreeMap<String, LogLevel>,
	buffers: Mutex<BTreeMap<String, VecDeque<LogEntry>>>,
	capacity: usize,
}

/// Cheap-to-clone handle on a session's log buffers.
#[derive(Clone)]
pub struct LogManager {
	inner: Arc<LogInner>,
}

impl fmt::Debug for LogManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LogManager").field("thresholds", &self.inner.thresholds).finish()
	}
}

impl LogManager {
	/// Builds a manager from `loggingPrefs`; unset types record at INFO and above.
	pub fn new(prefs: Option<&BTreeMap<String, String>>) -> Result<Self> {
		let mut thresholds = BTreeMap::new();
		for (log_type, level) in prefs.into_iter().flatten() {
			if log_type.trim().is_empty() {
				return Err(Error::LogManagerCreationFailed("empty log type".to_string()));
			}
			let level = level
				.parse::<LogLevel>()
				.map_err(|reason| Error::LogManagerCreationFailed(format!("{reason} for log type `{log_type}`")))?;
			thresholds.insert(log_type.clone(), level);
		}

		Ok(Self {
			inner: Arc::new(LogInner {
				thresholds,
				buffers: Mutex::new(BTreeMap::new()),
				capacity: DEFAULT_CAPACITY,
			}),
		})
	}

	pub fn threshold(&self, log_type: &str) -> LogLevel {
		self.inner.thresholds.get(log_type).copied().unwrap_or(LogLevel::Info)
	}

	/// Appends a message when `level` passes the type's threshold. The oldest
	/// entries are dropped once a buffer is full.
	pub fn record(&self, log_type: &str, level: LogLevel, message: impl Into<String>) {
		let threshold = self.threshold(log_type);
		if threshold == LogLevel::Off || level < threshold {
			return;
		}

		let entry = LogEntry {
			timestamp_ms: now_ms(),
			level,
			message: message.into(),
		};
		let mut buffers = self.inner.buffers.lock();
		let buffer = buffers.entry(log_type.to_string()).or_default();
		if buffer.len() == self.inner.capacity {
			buffer.pop_front();
		}
		buffer.push_back(entry);
	}

	/// Returns and clears the buffered entries of `log_type`.
	pub fn drain(&self, log_type: &str) -> Vec<LogEntry> {
		self.inner
			.buffers
			.lock()
			.get_mut(log_type)
			.map(|buffer| buffer.drain(..).collect())
			.unwrap_or_default()
	}

	pub fn entries(&self, log_type: &str) -> Vec<LogEntry> {
		self.inner
			.buffers
			.lock()
			.get(log_type)
			.map(|buffer| buffer.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Configured types plus any type that has received entries.
	pub fn log_types(&self) -> Vec<String> {
		let mut types: Vec<String> = self.inner.thresholds.keys().cloned().collect();
		for log_type in self.inner.buffers.lock().keys() {
			if !types.contains(log_type) {
				types.push(log_type.clone());
			}
		}
		types.sort();
		types
	}
}

fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
