use std::sync::Arc;
use std::time::Instant;

use mdrive::{
	ApplicationResolver, CapabilityNegotiator, DevicePool, DriverFactory, FsMaterializer, ProcessDriverFactory, RetryPolicy, SessionOrchestrator,
	SessionRegistry,
};
use tokio::sync::Semaphore;
use tracing::info;

use crate::config::Config;
use crate::error::Result;

/// Shared server state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
	inner: Arc<StateInner>,
}

struct StateInner {
	orchestrator: SessionOrchestrator,
	permits: Semaphore,
	started: Instant,
}

impl AppState {
	pub fn new(orchestrator: SessionOrchestrator, max_concurrent_sessions: usize) -> Self {
		Self {
			inner: Arc::new(StateInner {
				orchestrator,
				permits: Semaphore::new(max_concurrent_sessions.max(1)),
				started: Instant::now(),
			}),
		}
	}

	/// Wires the engine from configuration.
	pub fn from_config(config: &Config) -> Result<Self> {
		let drivers: Arc<dyn DriverFactory> = Arc::new(ProcessDriverFactory::new(config.driver_template()?));
		Self::from_config_with_drivers(config, drivers)
	}

	/// Like [`AppState::from_config`] with a caller-supplied driver factory.
	pub fn from_config_with_drivers(config: &Config, drivers: Arc<dyn DriverFactory>) -> Result<Self> {
		let pool = DevicePool::new(config.devices()?);
		let resolver = ApplicationResolver::new(Arc::new(FsMaterializer::new(config.work_dir())), config.catalog());
		let orchestrator = SessionOrchestrator::new(CapabilityNegotiator::new(config.host_info()), pool, resolver, drivers)
			.with_policy(RetryPolicy::new(config.base_timeout()));

		info!(
			target = "mdrive.server",
			devices = orchestrator.pool().len(),
			sdks = ?orchestrator.negotiator().host().installed_sdks(),
			base_timeout_secs = config.base_timeout().as_secs(),
			max_sessions = config.max_concurrent_sessions(),
			"engine ready"
		);
		Ok(Self::new(orchestrator, config.max_concurrent_sessions()))
	}

	pub fn orchestrator(&self) -> &SessionOrchestrator {
		&self.inner.orchestrator
	}

	pub fn registry(&self) -> &SessionRegistry {
		self.inner.orchestrator.registry()
	}

	pub fn pool(&self) -> &DevicePool {
		self.inner.orchestrator.pool()
	}

	pub fn permits(&self) -> &Semaphore {
		&self.inner.permits
	}

	pub fn uptime_secs(&self) -> u64 {
		self.inner.started.elapsed().as_secs()
	}
}
