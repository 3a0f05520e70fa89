//! The driver-process seam between sessions and the external automation
//! process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mdrive_runtime::{CrashReport, DriverCommand, OutputLine, OutputStream, ProcessObserver, RunningProcess};
use parking_lot::Mutex;
use tracing::debug;

use super::lifecycle::{CrashReporter, Session};
use crate::error::{Error, Result};
use crate::logs::{DRIVER_LOG, LogLevel, LogManager};

/// A driver process bound to one session.
#[async_trait]
pub trait DriverProcess: Send + Sync {
	/// Starts the process and waits until it is ready, failing with
	/// [`Error::DriverStartTimeout`] once `timeout` elapses. Crashes detected
	/// at any point are delivered through `crashes`.
	async fn start(&self, timeout: Duration, crashes: CrashReporter) -> Result<()>;

	/// Stops the process. Must be idempotent and safe before `start`.
	async fn stop(&self);
}

/// Builds the driver for a session whose device and application are bound.
pub trait DriverFactory: Send + Sync {
	fn create(&self, session: &Session) -> Result<Arc<dyn DriverProcess>>;
}

/// Command line of the driver program.
///
/// Arguments and environment values may contain `{session}`, `{device}`,
/// `{app}`, `{bundleId}`, `{language}`, `{locale}`, `{sdk}`, `{variation}`
/// and `{deviceKind}` placeholders.
#[derive(Debug, Clone)]
pub struct DriverTemplate {
	pub program: PathBuf,
	pub args: Vec<String>,
	pub env: BTreeMap<String, String>,
	pub ready_pattern: String,
	pub crash_patterns: Vec<String>,
}

impl DriverTemplate {
	pub fn new(program: impl Into<PathBuf>, ready_pattern: impl Into<String>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
			env: BTreeMap::new(),
			ready_pattern: ready_pattern.into(),
			crash_patterns: Vec::new(),
		}
	}

	pub fn with_args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.insert(key.into(), value.into());
		self
	}

	pub fn with_crash_pattern(mut self, pattern: impl Into<String>) -> Self {
		self.crash_patterns.push(pattern.into());
		self
	}

	/// Resolves placeholders against `session` into a runnable command.
	pub fn render(&self, session: &Session) -> Result<DriverCommand> {
		let vars = placeholders(session);
		let expand = |text: &str| vars.iter().fold(text.to_string(), |acc, (key, value)| acc.replace(key.as_str(), value));

		let mut command = DriverCommand::new(&self.program, &self.ready_pattern)?.with_args(self.args.iter().map(|arg| expand(arg)));
		for (key, value) in &self.env {
			command = command.with_env(key, expand(value));
		}
		for pattern in &self.crash_patterns {
			command = command.with_crash_pattern(pattern)?;
		}
		Ok(command)
	}
}

fn placeholders(session: &Session) -> Vec<(String, String)> {
	let caps = session.capabilities();
	let app = session.application();
	[
		("session", Some(session.id().to_string())),
		("device", session.device().map(|device| device.id().to_string())),
		("app", app.map(|app| app.path().display().to_string())),
		("bundleId", app.map(|app| app.bundle_id().to_string()).or_else(|| caps.bundle_id.clone())),
		("language", caps.language.clone()),
		("locale", caps.locale.clone()),
		("sdk", caps.sdk_version.clone()),
		("variation", caps.variation.map(|variation| variation.to_string())),
		("deviceKind", caps.device.map(|kind| kind.to_string())),
	]
	.into_iter()
	.map(|(key, value)| (format!("{{{key}}}"), value.unwrap_or_default()))
	.collect()
}

/// Launches one [`ProcessDriver`] per session from a [`DriverTemplate`].
#[derive(Debug, Clone)]
pub struct ProcessDriverFactory {
	template: DriverTemplate,
}

impl ProcessDriverFactory {
	pub fn new(template: DriverTemplate) -> Self {
		Self { template }
	}

	pub fn template(&self) -> &DriverTemplate {
		&self.template
	}
}

impl DriverFactory for ProcessDriverFactory {
	fn create(&self, session: &Session) -> Result<Arc<dyn DriverProcess>> {
		let command = self.template.render(session)?;
		debug!(target = "mdrive.driver", session = %session.id(), program = %command.program().display(), args = ?command.args(), "driver prepared");
		Ok(Arc::new(ProcessDriver::new(command, session.logs().clone())))
	}
}

/// A driver backed by an external process.
pub struct ProcessDriver {
	command: DriverCommand,
	logs: LogManager,
	process: Mutex<Option<Arc<RunningProcess>>>,
	stopped: AtomicBool,
}

impl ProcessDriver {
	pub fn new(command: DriverCommand, logs: LogManager) -> Self {
		Self {
			command,
			logs,
			process: Mutex::new(None),
			stopped: AtomicBool::new(false),
		}
	}

	pub fn pid(&self) -> Option<u32> {
		self.process.lock().as_ref().and_then(|process| process.pid())
	}
}

#[async_trait]
impl DriverProcess for ProcessDriver {
	async fn start(&self, timeout: Duration, crashes: CrashReporter) -> Result<()> {
		let observer = Arc::new(SessionObserver {
			logs: self.logs.clone(),
			crashes,
		});
		let process = Arc::new(mdrive_runtime::launch(&self.command, timeout, observer).await?);

		let raced = {
			let mut slot = self.process.lock();
			if self.stopped.load(Ordering::Acquire) {
				true
			} else {
				*slot = Some(Arc::clone(&process));
				false
			}
		};
		if raced {
			process.stop().await;
			return Err(Error::StoppedDuringStart);
		}
		Ok(())
	}

	async fn stop(&self) {
		self.stopped.store(true, Ordering::Release);
		let process = self.process.lock().take();
		if let Some(process) = process {
			process.stop().await;
			debug!(target = "mdrive.driver", pid = ?process.pid(), "driver stopped");
		}
	}
}

/// Routes driver output into the session's logs and crashes into its
/// lifecycle.
struct SessionObserver {
	logs: LogManager,
	crashes: CrashReporter,
}

impl ProcessObserver for SessionObserver {
	fn on_line(&self, line: &OutputLine) {
		let level = match line.stream {
			OutputStream::Stdout => LogLevel::Info,
			OutputStream::Stderr => LogLevel::Warning,
		};
		self.logs.record(DRIVER_LOG, level, line.text.clone());
	}

	fn on_crash(&self, report: CrashReport) {
		self.crashes.report(report.render());
	}
}
