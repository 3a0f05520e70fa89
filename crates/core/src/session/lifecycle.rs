//! Session context and its lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use mdrive_protocol::{Capabilities, WireResponse};
use parking_lot::Mutex;
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::driver::DriverProcess;
use crate::application::ApplicationInstance;
use crate::device::{Device, DeviceLease};
use crate::error::{Error, Result};
use crate::logs::{DRIVER_LOG, LogLevel, LogManager};

/// Opaque session identifier handed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
	pub fn generate() -> Self {
		Self(Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<String> for SessionId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<&str> for SessionId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
	Created,
	Starting,
	Running,
	Crashed,
	Stopped,
}

impl SessionState {
	pub fn as_str(self) -> &'static str {
		match self {
			SessionState::Created => "created",
			SessionState::Starting => "starting",
			SessionState::Running => "running",
			SessionState::Crashed => "crashed",
			SessionState::Stopped => "stopped",
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Diagnostic output captured when a crash was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashDetails {
	log: String,
	detected_at: SystemTime,
}

impl CrashDetails {
	pub fn new(log: impl Into<String>) -> Self {
		Self {
			log: log.into(),
			detected_at: SystemTime::now(),
		}
	}

	pub fn log(&self) -> &str {
		&self.log
	}

	pub fn detected_at(&self) -> SystemTime {
		self.detected_at
	}

	/// Last non-empty line of the captured log.
	pub fn summary(&self) -> &str {
		self.log.lines().rev().map(str::trim).find(|line| !line.is_empty()).unwrap_or("no diagnostic output")
	}
}

impl fmt::Display for CrashDetails {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.summary())
	}
}

struct Lifecycle {
	state: SessionState,
	crash: Option<CrashDetails>,
}

/// One client session: capabilities, bound resources and lifecycle state.
///
/// Resources are bound through `&mut self` while the session is still owned
/// by the orchestrator. Once shared, [`Session::stop`] is the only operation
/// that releases them and it runs its teardown exactly once; concurrent
/// callers wait for that teardown to finish.
pub struct Session {
	id: SessionId,
	capabilities: Capabilities,
	logs: LogManager,
	lease: Mutex<Option<DeviceLease>>,
	device: Option<Arc<Device>>,
	application: Option<ApplicationInstance>,
	scratch: Mutex<Option<TempDir>>,
	driver: Option<Arc<dyn DriverProcess>>,
	lifecycle: Mutex<Lifecycle>,
	stopped: OnceCell<()>,
	cached_response: Mutex<Option<WireResponse>>,
	decorated: AtomicBool,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("state", &self.state())
			.field("device", &self.device.as_ref().map(|device| device.id().clone()))
			.field("application", &self.application.as_ref().map(ApplicationInstance::bundle_id))
			.finish()
	}
}

impl Session {
	pub fn new(capabilities: Capabilities, logs: LogManager) -> Self {
		Self {
			id: SessionId::generate(),
			capabilities,
			logs,
			lease: Mutex::new(None),
			device: None,
			application: None,
			scratch: Mutex::new(None),
			driver: None,
			lifecycle: Mutex::new(Lifecycle {
				state: SessionState::Created,
				crash: None,
			}),
			stopped: OnceCell::new(),
			cached_response: Mutex::new(None),
			decorated: AtomicBool::new(false),
		}
	}

	pub fn id(&self) -> &SessionId {
		&self.id
	}

	pub fn capabilities(&self) -> &Capabilities {
		&self.capabilities
	}

	pub fn capabilities_mut(&mut self) -> &mut Capabilities {
		&mut self.capabilities
	}

	pub fn logs(&self) -> &LogManager {
		&self.logs
	}

	/// Device bound at build time. Still reported after the reservation was
	/// released by [`Session::stop`].
	pub fn device(&self) -> Option<&Arc<Device>> {
		self.device.as_ref()
	}

	/// `true` while the session still holds its device reservation.
	pub fn holds_device(&self) -> bool {
		self.lease.lock().is_some()
	}

	pub fn application(&self) -> Option<&ApplicationInstance> {
		self.application.as_ref()
	}

	/// Binds a reserved device and returns the previously bound lease, if any.
	pub fn bind_device(&mut self, lease: DeviceLease) -> Option<DeviceLease> {
		self.device = Some(Arc::clone(lease.device()));
		self.lease.get_mut().replace(lease)
	}

	/// Binds the application. A scratch directory it owns is removed when
	/// the session stops.
	pub fn bind_application(&mut self, mut application: ApplicationInstance) {
		*self.scratch.get_mut() = application.take_scratch();
		self.application = Some(application);
	}

	pub fn bind_driver(&mut self, driver: Arc<dyn DriverProcess>) {
		self.driver = Some(driver);
	}

	pub fn state(&self) -> SessionState {
		self.lifecycle.lock().state
	}

	pub fn is_crashed(&self) -> bool {
		self.lifecycle.lock().crash.is_some()
	}

	pub fn crash_details(&self) -> Option<CrashDetails> {
		self.lifecycle.lock().crash.clone()
	}

	/// Handle the driver uses to signal crashes from its own tasks.
	pub fn crash_reporter(self: &Arc<Self>) -> CrashReporter {
		CrashReporter {
			session: Arc::downgrade(self),
		}
	}

	/// Starts the driver process within `timeout`.
	///
	/// Returns [`Error::CrashedAtStartup`] when a crash was reported before
	/// the driver came up. On any error the session is left for the caller
	/// to stop.
	pub async fn start(self: &Arc<Self>, timeout: Duration) -> Result<()> {
		let driver = self.driver.clone().ok_or(Error::SessionNotInitialized("driver"))?;
		{
			let mut lifecycle = self.lifecycle.lock();
			if lifecycle.state != SessionState::Created {
				return Err(Error::IllegalTransition {
					from: lifecycle.state,
					to: SessionState::Starting,
				});
			}
			lifecycle.state = SessionState::Starting;
		}
		debug!(target = "mdrive.session", session = %self.id, timeout_ms = timeout.as_millis() as u64, "starting driver");

		let started = driver.start(timeout, self.crash_reporter()).await;

		let mut lifecycle = self.lifecycle.lock();
		if let Some(details) = &lifecycle.crash {
			return Err(Error::CrashedAtStartup { details: details.clone() });
		}
		started?;
		match lifecycle.state {
			SessionState::Starting => {
				lifecycle.state = SessionState::Running;
				info!(target = "mdrive.session", session = %self.id, "session running");
				Ok(())
			}
			_ => Err(Error::StoppedDuringStart),
		}
	}

	/// Records a crash. Accepted only while starting or running; returns
	/// whether the crash was recorded.
	pub fn record_crash(&self, log: impl Into<String>) -> bool {
		let details = CrashDetails::new(log);
		{
			let mut lifecycle = self.lifecycle.lock();
			if !matches!(lifecycle.state, SessionState::Starting | SessionState::Running) {
				debug!(target = "mdrive.session", session = %self.id, state = %lifecycle.state, "crash ignored");
				return false;
			}
			lifecycle.state = SessionState::Crashed;
			lifecycle.crash = Some(details.clone());
		}
		self.cached_response.lock().take();
		self.logs.record(DRIVER_LOG, LogLevel::Severe, details.log());
		warn!(target = "mdrive.session", session = %self.id, crash = %details, "application crashed");
		true
	}

	/// Releases the device and stops the driver. Idempotent.
	pub async fn stop(&self) {
		self.stopped.get_or_init(|| self.teardown()).await;
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.initialized()
	}

	async fn teardown(&self) {
		let previous = std::mem::replace(&mut self.lifecycle.lock().state, SessionState::Stopped);
		self.cached_response.lock().take();

		self.release_device();
		if let Some(driver) = &self.driver {
			driver.stop().await;
		}
		let scratch = self.scratch.lock().take();
		if let Some(scratch) = scratch {
			let path = scratch.path().to_path_buf();
			match tokio::task::spawn_blocking(move || scratch.close()).await {
				Ok(Ok(())) => debug!(target = "mdrive.session", session = %self.id, path = %path.display(), "scratch directory removed"),
				Ok(Err(err)) => warn!(target = "mdrive.session", session = %self.id, path = %path.display(), error = %err, "failed to remove scratch directory"),
				Err(err) => warn!(target = "mdrive.session", session = %self.id, path = %path.display(), error = %err, "scratch removal task failed"),
			}
		}
		info!(target = "mdrive.session", session = %self.id, from = %previous, "session stopped");
	}

	fn release_device(&self) {
		let lease = self.lease.lock().take();
		if let Some(lease) = lease {
			lease.release();
		}
	}

	/// Response memoized by capability queries. Cleared when the session
	/// crashes or stops.
	pub fn cached_response(&self) -> Option<WireResponse> {
		self.cached_response.lock().clone()
	}

	/// Memoizes `response`; ignored once the session has crashed or stopped.
	pub fn set_cached_response(&self, response: WireResponse) {
		let lifecycle = self.lifecycle.lock();
		if lifecycle.crash.is_none() && lifecycle.state != SessionState::Stopped {
			*self.cached_response.lock() = Some(response);
		}
	}

	pub fn is_decorated(&self) -> bool {
		self.decorated.load(Ordering::Acquire)
	}

	pub fn set_decorated(&self, decorated: bool) {
		self.decorated.store(decorated, Ordering::Release);
	}
}

/// Delivers crash signals to a session from any task.
///
/// Holds only a weak reference, so a driver that outlives its session does
/// not keep it alive.
#[derive(Clone)]
pub struct CrashReporter {
	session: Weak<Session>,
}

impl fmt::Debug for CrashReporter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CrashReporter").field("attached", &(self.session.strong_count() > 0)).finish()
	}
}

impl CrashReporter {
	/// A reporter with no session behind it.
	pub fn detached() -> Self {
		Self { session: Weak::new() }
	}

	/// Marks the session crashed and releases its device, then stops the
	/// driver in the background.
	pub fn report(&self, log: impl Into<String>) {
		let Some(session) = self.session.upgrade() else {
			return;
		};
		if !session.record_crash(log) {
			return;
		}
		session.release_device();
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move { session.stop().await });
			}
			Err(_) => warn!(target = "mdrive.session", session = %session.id(), "no runtime to stop the crashed driver"),
		}
	}
}
