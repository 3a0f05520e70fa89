//! Scripted collaborators for driving the orchestrator in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mdrive::{
	Application, Artifact, ApplicationCatalog, ApplicationResolver, ArtifactKind, CapabilityNegotiator, CrashReporter, Device, DevicePool, DriverFactory,
	DriverProcess, Error, HostInfo, Materializer, Result, RetryPolicy, Session, SessionOrchestrator,
};
use mdrive_protocol::{DeviceKind, DeviceVariation};
use mdrive_runtime::DriverError;
use parking_lot::Mutex;

/// What a scripted driver does when started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
	Ready,
	/// Never becomes ready within its budget.
	Timeout,
	/// Reports a crash while starting, then claims success.
	CrashOnStart,
	/// Becomes ready, then reports a crash before returning.
	CrashAfterReady,
	/// Exits with an unclassified failure.
	Exit,
}

/// Shared record of everything the scripted drivers did.
#[derive(Default)]
pub struct DriverLog {
	pub timeouts: Mutex<Vec<Duration>>,
	pub created: AtomicUsize,
	pub running: AtomicUsize,
	pub stops: AtomicUsize,
}

impl DriverLog {
	pub fn timeouts(&self) -> Vec<Duration> {
		self.timeouts.lock().clone()
	}

	pub fn running(&self) -> usize {
		self.running.load(Ordering::SeqCst)
	}

	pub fn created(&self) -> usize {
		self.created.load(Ordering::SeqCst)
	}
}

/// Hands out drivers following a script; the last entry repeats.
pub struct ScriptedDrivers {
	script: Mutex<VecDeque<Behavior>>,
	fallback: Behavior,
	pub log: Arc<DriverLog>,
}

impl ScriptedDrivers {
	pub fn new(script: impl IntoIterator<Item = Behavior>) -> Arc<Self> {
		let script: VecDeque<_> = script.into_iter().collect();
		let fallback = script.back().copied().unwrap_or(Behavior::Ready);
		Arc::new(Self {
			script: Mutex::new(script),
			fallback,
			log: Arc::new(DriverLog::default()),
		})
	}

	pub fn always(behavior: Behavior) -> Arc<Self> {
		Self::new([behavior])
	}
}

impl DriverFactory for ScriptedDrivers {
	fn create(&self, _session: &Session) -> Result<Arc<dyn DriverProcess>> {
		let behavior = self.script.lock().pop_front().unwrap_or(self.fallback);
		self.log.created.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::new(ScriptedDriver {
			behavior,
			log: Arc::clone(&self.log),
			up: AtomicBool::new(false),
		}))
	}
}

struct ScriptedDriver {
	behavior: Behavior,
	log: Arc<DriverLog>,
	up: AtomicBool,
}

impl ScriptedDriver {
	fn come_up(&self) {
		if !self.up.swap(true, Ordering::SeqCst) {
			self.log.running.fetch_add(1, Ordering::SeqCst);
		}
	}
}

#[async_trait]
impl DriverProcess for ScriptedDriver {
	async fn start(&self, timeout: Duration, crashes: CrashReporter) -> Result<()> {
		self.log.timeouts.lock().push(timeout);
		match self.behavior {
			Behavior::Ready => {
				self.come_up();
				Ok(())
			}
			Behavior::Timeout => Err(DriverError::StartTimeout { timeout }.into()),
			Behavior::CrashOnStart => {
				self.come_up();
				crashes.report("Launching application\nApplication crashed: SIGSEGV");
				Ok(())
			}
			Behavior::CrashAfterReady => {
				self.come_up();
				tokio::task::yield_now().await;
				crashes.report("EXC_BAD_ACCESS");
				Ok(())
			}
			Behavior::Exit => Err(DriverError::Exited {
				code: Some(1),
				recent: vec!["no such simulator".into()],
			}
			.into()),
		}
	}

	async fn stop(&self) {
		self.log.stops.fetch_add(1, Ordering::SeqCst);
		if self.up.swap(false, Ordering::SeqCst) {
			self.log.running.fetch_sub(1, Ordering::SeqCst);
		}
	}
}

/// Materializes every location to a fixed artifact.
pub struct FixedArtifact(pub PathBuf);

#[async_trait]
impl Materializer for FixedArtifact {
	async fn materialize(&self, _location: &str) -> Result<Artifact> {
		Ok(Artifact::local(&self.0))
	}
}

/// Fails every materialization.
pub struct Unreachable;

#[async_trait]
impl Materializer for Unreachable {
	async fn materialize(&self, location: &str) -> Result<Artifact> {
		Err(Error::Materialize(format!("cannot fetch {location}")))
	}
}

pub const SAFARI: &str = "com.apple.mobilesafari";

pub fn host() -> HostInfo {
	HostInfo::new(["6.1", "7.0", "7.1"], "7.1")
}

pub fn simulator(id: &str) -> Device {
	Device::simulator(id, "iOS Simulator", ["6.1", "7.0", "7.1"])
}

pub fn iphone(id: &str) -> Device {
	Device::real(id, "iPhone 5s", DeviceKind::Iphone, "7.1", DeviceVariation::Retina4)
}

pub fn catalog() -> ApplicationCatalog {
	ApplicationCatalog::new([Application::new(SAFARI, "/Applications/MobileSafari.app", ArtifactKind::Package).with_languages(["en", "fr"])])
}

pub fn orchestrator(pool: DevicePool, drivers: Arc<ScriptedDrivers>) -> SessionOrchestrator {
	orchestrator_with(pool, drivers, Arc::new(Unreachable))
}

pub fn orchestrator_with(pool: DevicePool, drivers: Arc<ScriptedDrivers>, materializer: Arc<dyn Materializer>) -> SessionOrchestrator {
	SessionOrchestrator::new(
		CapabilityNegotiator::new(host()),
		pool,
		ApplicationResolver::new(materializer, catalog()),
		drivers,
	)
	.with_policy(RetryPolicy::new(Duration::from_millis(50)))
}
