use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// Failures of the automation-driver process.
#[derive(Debug, Error)]
pub enum DriverError {
	#[error("failed to spawn driver `{program}`: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("driver did not become ready within {timeout:?}")]
	StartTimeout { timeout: Duration },

	#[error("driver exited before becoming ready (exit code {code:?})")]
	Exited { code: Option<i32>, recent: Vec<String> },

	#[error("driver reported an application crash during startup: {trigger}")]
	Crashed { trigger: String },

	#[error("invalid driver output pattern `{pattern}`: {source}")]
	Pattern {
		pattern: String,
		#[source]
		source: regex::Error,
	},
}

impl DriverError {
	/// Returns `true` when the driver simply ran out of its start budget.
	pub fn is_timeout(&self) -> bool {
		matches!(self, DriverError::StartTimeout { .. })
	}
}
