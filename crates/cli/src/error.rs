use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {path}: {source}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid device `{id}`: {reason}")]
	InvalidDevice { id: String, reason: String },

	#[error("driver program `{program}` not found: {source}")]
	DriverNotFound {
		program: String,
		#[source]
		source: which::Error,
	},

	#[error(transparent)]
	Engine(#[from] mdrive::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}
