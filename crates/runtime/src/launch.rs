//! Spawning, readiness detection and crash monitoring of driver processes.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::DriverCommand;
use crate::error::{DriverError, Result};
use crate::process::terminate_group;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
	Stdout,
	Stderr,
}

/// One line of driver output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
	pub stream: OutputStream,
	pub text: String,
}

/// Diagnostic snapshot taken when a crash line is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
	/// The line that matched a crash pattern.
	pub trigger: String,
	/// Most recent output, oldest first, ending with `trigger`.
	pub recent: Vec<String>,
}

impl CrashReport {
	/// Renders the report as a single log blob.
	pub fn render(&self) -> String {
		self.recent.join("\n")
	}
}

/// Receives output and crash notifications from a launched process.
///
/// Callbacks run on the process's monitor task and must not block.
pub trait ProcessObserver: Send + Sync + 'static {
	fn on_line(&self, _line: &OutputLine) {}

	fn on_crash(&self, report: CrashReport);
}

/// A driver process that reached readiness.
pub struct RunningProcess {
	pid: Option<u32>,
	child: Mutex<Option<Child>>,
	monitor: JoinHandle<()>,
}

impl std::fmt::Debug for RunningProcess {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RunningProcess").field("pid", &self.pid).finish_non_exhaustive()
	}
}

impl RunningProcess {
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Returns `true` until the process has exited or been stopped.
	pub async fn is_running(&self) -> bool {
		let mut guard = self.child.lock().await;
		match guard.as_mut() {
			Some(child) => matches!(child.try_wait(), Ok(None)),
			None => false,
		}
	}

	/// Terminates the process group and reaps the child. Safe to call repeatedly.
	pub async fn stop(&self) {
		self.monitor.abort();
		let Some(mut child) = self.child.lock().await.take() else {
			return;
		};
		shutdown_child(&mut child, self.pid).await;
	}
}

/// Spawns `command` and waits up to `timeout` for its readiness line.
///
/// A crash line seen before readiness is reported to `observer` and fails the
/// launch with [`DriverError::Crashed`]. On any failure the child is killed
/// before returning.
pub async fn launch(command: &DriverCommand, timeout: Duration, observer: Arc<dyn ProcessObserver>) -> Result<RunningProcess> {
	let mut cmd = Command::new(command.program());
	cmd.args(command.args())
		.envs(command.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true);

	#[cfg(unix)]
	cmd.process_group(0);

	let mut child = cmd.spawn().map_err(|source| DriverError::Spawn {
		program: command.program().display().to_string(),
		source,
	})?;
	let pid = child.id();
	debug!(target = "mdrive.driver", ?pid, program = %command.program().display(), ?timeout, "driver spawned");

	let (tx, mut rx) = mpsc::unbounded_channel();
	if let Some(stdout) = child.stdout.take() {
		tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
	}
	if let Some(stderr) = child.stderr.take() {
		tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone()));
	}
	drop(tx);

	let mut recent = RecentLines::new(command.history());
	let deadline = tokio::time::Instant::now().checked_add(timeout);
	loop {
		let waited = match deadline {
			Some(deadline) => tokio::time::timeout_at(deadline, rx.recv()).await,
			None => Ok(rx.recv().await),
		};
		let next = match waited {
			Ok(next) => next,
			Err(_) => {
				warn!(target = "mdrive.driver", ?pid, ?timeout, "driver not ready in time; killing");
				shutdown_child(&mut child, pid).await;
				return Err(DriverError::StartTimeout { timeout });
			}
		};

		let Some(line) = next else {
			let code = match tokio::time::timeout(STOP_GRACE, child.wait()).await {
				Ok(Ok(status)) => status.code(),
				_ => {
					shutdown_child(&mut child, pid).await;
					None
				}
			};
			return Err(DriverError::Exited {
				code,
				recent: recent.snapshot(),
			});
		};

		observer.on_line(&line);
		recent.push(&line.text);

		if command.is_crash_line(&line.text) {
			let report = CrashReport {
				trigger: line.text.clone(),
				recent: recent.snapshot(),
			};
			observer.on_crash(report);
			shutdown_child(&mut child, pid).await;
			return Err(DriverError::Crashed { trigger: line.text });
		}

		if command.is_ready_line(&line.text) {
			break;
		}
	}

	info!(target = "mdrive.driver", ?pid, "driver ready");
	let monitor = tokio::spawn(monitor(rx, recent, command.crash_patterns().to_vec(), observer));

	Ok(RunningProcess {
		pid,
		child: Mutex::new(Some(child)),
		monitor,
	})
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
	R: AsyncRead + Unpin + Send + 'static,
{
	let mut lines = BufReader::new(reader).lines();
	while let Ok(Some(text)) = lines.next_line().await {
		if tx.send(OutputLine { stream, text }).is_err() {
			break;
		}
	}
}

async fn monitor(mut rx: mpsc::UnboundedReceiver<OutputLine>, mut recent: RecentLines, crash: Vec<Regex>, observer: Arc<dyn ProcessObserver>) {
	while let Some(line) = rx.recv().await {
		observer.on_line(&line);
		recent.push(&line.text);

		if crash.iter().any(|re| re.is_match(&line.text)) {
			warn!(target = "mdrive.driver", trigger = %line.text, "application crash detected");
			observer.on_crash(CrashReport {
				trigger: line.text,
				recent: recent.snapshot(),
			});
			return;
		}
	}
	debug!(target = "mdrive.driver", "driver output closed");
}

async fn shutdown_child(child: &mut Child, pid: Option<u32>) {
	if let Some(pid) = pid {
		if terminate_group(pid).await && tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok() {
			return;
		}
	}
	if let Err(err) = child.start_kill() {
		debug!(target = "mdrive.driver", ?pid, error = %err, "kill failed; process already gone");
	}
	let _ = child.wait().await;
}

struct RecentLines {
	lines: VecDeque<String>,
	capacity: usize,
}

impl RecentLines {
	fn new(capacity: usize) -> Self {
		Self {
			lines: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	fn push(&mut self, line: &str) {
		if self.lines.len() == self.capacity {
			self.lines.pop_front();
		}
		self.lines.push_back(line.to_string());
	}

	fn snapshot(&self) -> Vec<String> {
		self.lines.iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recent_lines_keep_the_tail() {
		let mut recent = RecentLines::new(2);
		recent.push("a");
		recent.push("b");
		recent.push("c");
		assert_eq!(recent.snapshot(), ["b", "c"]);
	}

	#[test]
	fn crash_report_renders_lines_in_order() {
		let report = CrashReport {
			trigger: "boom".into(),
			recent: vec!["starting".into(), "boom".into()],
		};
		assert_eq!(report.render(), "starting\nboom");
	}
}
