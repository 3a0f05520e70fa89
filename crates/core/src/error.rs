//! Error taxonomy of the session engine.
//!
//! Every failure is a tagged [`Error`] kind with a fixed [`ErrorClass`]; the
//! orchestrator decides whether to retry from the class alone.

use std::time::Duration;

use mdrive_runtime::DriverError;
use thiserror::Error;

use crate::session::{CrashDetails, SessionState};

pub type Result<T> = std::result::Result<T, Error>;

/// Retry classification attached to every [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	/// Malformed or unsupported capabilities. Never retried.
	Validation,
	/// Nothing in the pool or catalog can serve the request. Not retried.
	ResourceUnavailable,
	/// The driver may succeed with a fresh attempt and a larger budget.
	Transient,
	/// Anything else. Aborts orchestration.
	Fatal,
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("language code `{0}` is not supported")]
	UnsupportedLanguage(String),

	#[error("SDK {version} is too old; only SDK {minimum} and above are supported")]
	UnsupportedSdkVersion { version: String, minimum: String },

	#[error("cannot start on SDK {version}; installed: {}", .installed.join(", "))]
	SdkNotInstalled { version: String, installed: Vec<String> },

	#[error("malformed capabilities: {0}")]
	InvalidCapabilities(String),

	#[error("no free device matches {0}")]
	NoMatchingDevice(String),

	#[error("no deployed application matches bundle `{bundle_id}` in language `{language}`")]
	NoMatchingApplication { bundle_id: String, language: String },

	#[error("application `{bundle_id}` is not localized for `{language}`")]
	LanguageNotLocalized { bundle_id: String, language: String },

	#[error("cannot create app from {location}: {source}")]
	ApplicationResolutionFailed {
		location: String,
		#[source]
		source: Box<Error>,
	},

	#[error("{0}")]
	Materialize(String),

	#[error("archive error: {0}")]
	Archive(#[from] zip::result::ZipError),

	#[error("download failed: {0}")]
	Download(#[from] reqwest::Error),

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error("cannot create log manager: {0}")]
	LogManagerCreationFailed(String),

	#[error("driver did not become ready within {timeout:?}")]
	DriverStartTimeout { timeout: Duration },

	#[error("application crashed at startup: {details}")]
	CrashedAtStartup { details: CrashDetails },

	#[error("driver failed: {0}")]
	Driver(#[source] DriverError),

	#[error("session is missing its {0}")]
	SessionNotInitialized(&'static str),

	#[error("cannot move session from {from:?} to {to:?}")]
	IllegalTransition { from: SessionState, to: SessionState },

	#[error("session was stopped while its driver was starting")]
	StoppedDuringStart,

	#[error("failed starting after {attempts} attempts; final wait was {final_timeout:?}")]
	RetriesExhausted {
		attempts: u32,
		final_timeout: Duration,
		#[source]
		last: Option<Box<Error>>,
	},

	#[error("no session with id {0}")]
	NoSuchSession(String),
}

impl Error {
	pub fn class(&self) -> ErrorClass {
		match self {
			Error::UnsupportedLanguage(_) | Error::UnsupportedSdkVersion { .. } | Error::SdkNotInstalled { .. } | Error::InvalidCapabilities(_) => {
				ErrorClass::Validation
			}
			Error::NoMatchingDevice(_) | Error::NoMatchingApplication { .. } | Error::NoSuchSession(_) => ErrorClass::ResourceUnavailable,
			Error::DriverStartTimeout { .. } | Error::CrashedAtStartup { .. } => ErrorClass::Transient,
			_ => ErrorClass::Fatal,
		}
	}

	/// Returns `true` when a fresh attempt may succeed.
	pub fn is_retryable(&self) -> bool {
		self.class() == ErrorClass::Transient
	}
}

impl From<DriverError> for Error {
	fn from(err: DriverError) -> Self {
		match err {
			DriverError::StartTimeout { timeout } => Error::DriverStartTimeout { timeout },
			other => Error::Driver(other),
		}
	}
}

/// Uniform failure surfaced at the orchestrator boundary.
///
/// The underlying cause stays reachable through [`std::error::Error::source`].
#[derive(Debug, Error)]
#[error("session not created: {cause}")]
pub struct SessionNotCreated {
	#[source]
	cause: Error,
}

impl SessionNotCreated {
	pub fn cause(&self) -> &Error {
		&self.cause
	}
}

impl From<Error> for SessionNotCreated {
	fn from(cause: Error) -> Self {
		Self { cause }
	}
}
