//! Launch description for an automation-driver process.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{DriverError, Result};

const DEFAULT_HISTORY: usize = 50;

/// Program, arguments and output patterns of one driver launch.
#[derive(Debug, Clone)]
pub struct DriverCommand {
	program: PathBuf,
	args: Vec<String>,
	env: Vec<(String, String)>,
	ready: Regex,
	crash: Vec<Regex>,
	history: usize,
}

impl DriverCommand {
	/// Creates a command that is considered started once an output line
	/// matches `ready_pattern`.
	pub fn new(program: impl Into<PathBuf>, ready_pattern: &str) -> Result<Self> {
		Ok(Self {
			program: program.into(),
			args: Vec::new(),
			env: Vec::new(),
			ready: compile(ready_pattern)?,
			crash: Vec::new(),
			history: DEFAULT_HISTORY,
		})
	}

	/// Appends one argument.
	pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	/// Appends several arguments.
	pub fn with_args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	/// Sets an environment variable for the child.
	pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}

	/// Adds a pattern whose match on any output line signals an application crash.
	pub fn with_crash_pattern(mut self, pattern: &str) -> Result<Self> {
		self.crash.push(compile(pattern)?);
		Ok(self)
	}

	/// Sets how many recent output lines a crash report carries.
	pub fn with_history(mut self, lines: usize) -> Self {
		self.history = lines.max(1);
		self
	}

	pub fn program(&self) -> &Path {
		&self.program
	}

	pub fn args(&self) -> &[String] {
		&self.args
	}

	pub fn env(&self) -> &[(String, String)] {
		&self.env
	}

	pub fn history(&self) -> usize {
		self.history
	}

	pub(crate) fn crash_patterns(&self) -> &[Regex] {
		&self.crash
	}

	pub(crate) fn is_ready_line(&self, line: &str) -> bool {
		self.ready.is_match(line)
	}

	pub(crate) fn is_crash_line(&self, line: &str) -> bool {
		self.crash.iter().any(|re| re.is_match(line))
	}
}

fn compile(pattern: &str) -> Result<Regex> {
	Regex::new(pattern).map_err(|source| DriverError::Pattern {
		pattern: pattern.to_string(),
		source,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_collects_args_env_and_patterns() {
		let command = DriverCommand::new("instruments", r"^READY\b")
			.unwrap()
			.with_arg("-w")
			.with_args(["device-1", "app"])
			.with_env("LANG", "fr")
			.with_crash_pattern("(?i)crash")
			.unwrap()
			.with_history(0);

		assert_eq!(command.program(), Path::new("instruments"));
		assert_eq!(command.args(), ["-w", "device-1", "app"]);
		assert_eq!(command.env(), [("LANG".to_string(), "fr".to_string())]);
		assert_eq!(command.history(), 1);
		assert!(command.is_ready_line("READY on port 4444"));
		assert!(!command.is_ready_line("NOT READY"));
		assert!(command.is_crash_line("The application Crashed"));
	}

	#[test]
	fn invalid_pattern_is_reported() {
		let err = DriverCommand::new("driver", "(unclosed").unwrap_err();
		assert!(matches!(err, DriverError::Pattern { ref pattern, .. } if pattern == "(unclosed"));
	}
}
