//! Bounded-retry session creation.

use std::sync::Arc;
use std::time::Duration;

use mdrive_protocol::Capabilities;
use tracing::{debug, info, warn};

use super::driver::DriverFactory;
use super::lifecycle::{Session, SessionId};
use super::registry::SessionRegistry;
use crate::application::ApplicationResolver;
use crate::device::DevicePool;
use crate::error::{Error, Result, SessionNotCreated};
use crate::logs::LogManager;
use crate::negotiate::CapabilityNegotiator;

/// Attempts made before giving up on a session.
pub const MAX_RETRIES: u32 = 3;

/// Start budget of the first attempt.
pub const DEFAULT_BASE_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-attempt start budgets: attempt `i` (zero-based) gets `(i + 1) * base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	base_timeout: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(DEFAULT_BASE_TIMEOUT)
	}
}

impl RetryPolicy {
	pub fn new(base_timeout: Duration) -> Self {
		Self { base_timeout }
	}

	pub fn base_timeout(&self) -> Duration {
		self.base_timeout
	}

	pub fn attempts(&self) -> u32 {
		MAX_RETRIES
	}

	/// Timeout for the zero-based `attempt`; saturates at [`Duration::MAX`].
	pub fn timeout_for(&self, attempt: u32) -> Duration {
		self.base_timeout.saturating_mul(attempt.saturating_add(1))
	}
}

/// Turns raw capabilities into a running, registered session.
///
/// Every failed attempt stops its partially built session before the next
/// attempt begins, so no device reservation or driver process outlives it.
pub struct SessionOrchestrator {
	negotiator: CapabilityNegotiator,
	pool: DevicePool,
	resolver: ApplicationResolver,
	drivers: Arc<dyn DriverFactory>,
	policy: RetryPolicy,
	registry: SessionRegistry,
}

impl SessionOrchestrator {
	pub fn new(negotiator: CapabilityNegotiator, pool: DevicePool, resolver: ApplicationResolver, drivers: Arc<dyn DriverFactory>) -> Self {
		Self {
			negotiator,
			pool,
			resolver,
			drivers,
			policy: RetryPolicy::default(),
			registry: SessionRegistry::default(),
		}
	}

	pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
		self.registry = registry;
		self
	}

	pub fn negotiator(&self) -> &CapabilityNegotiator {
		&self.negotiator
	}

	pub fn pool(&self) -> &DevicePool {
		&self.pool
	}

	pub fn policy(&self) -> RetryPolicy {
		self.policy
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	/// Creates a session and registers it, returning its id.
	pub async fn create_session(&self, raw: Capabilities) -> std::result::Result<SessionId, SessionNotCreated> {
		let session = self.launch(raw).await?;
		let id = session.id().clone();
		self.registry.insert(session);
		Ok(id)
	}

	/// Creates a running session without registering it.
	pub async fn launch(&self, raw: Capabilities) -> std::result::Result<Arc<Session>, SessionNotCreated> {
		let caps = self.negotiator.normalize(raw).map_err(|err| {
			warn!(target = "mdrive.session", error = %err, "capabilities rejected");
			SessionNotCreated::from(err)
		})?;

		let mut last = None;
		for attempt in 0..self.policy.attempts() {
			let timeout = self.policy.timeout_for(attempt);
			info!(
				target = "mdrive.session",
				attempt = attempt + 1,
				of = self.policy.attempts(),
				timeout_ms = timeout.as_millis() as u64,
				"creating session"
			);

			match self.attempt(caps.clone(), timeout).await {
				Ok(session) => {
					info!(
						target = "mdrive.session",
						session = %session.id(),
						device = ?session.device().map(|device| device.id().to_string()),
						attempt = attempt + 1,
						"session created"
					);
					return Ok(session);
				}
				Err(err) if err.is_retryable() => {
					warn!(target = "mdrive.session", attempt = attempt + 1, error = %err, "session attempt failed, retrying");
					last = Some(Box::new(err));
				}
				Err(err) => {
					warn!(target = "mdrive.session", attempt = attempt + 1, class = ?err.class(), error = %err, "session creation aborted");
					return Err(err.into());
				}
			}
		}

		let attempts = self.policy.attempts();
		Err(Error::RetriesExhausted {
			attempts,
			final_timeout: self.policy.timeout_for(attempts.saturating_sub(1)),
			last,
		}
		.into())
	}

	async fn attempt(&self, caps: Capabilities, timeout: Duration) -> Result<Arc<Session>> {
		let session = Arc::new(self.build(caps).await?);

		if let Err(err) = session.start(timeout).await {
			session.stop().await;
			return Err(err);
		}
		if let Some(details) = session.crash_details() {
			session.stop().await;
			return Err(Error::CrashedAtStartup { details });
		}
		Ok(session)
	}

	async fn build(&self, caps: Capabilities) -> Result<Session> {
		let logs = LogManager::new(caps.logging_prefs.as_ref())?;
		let mut session = Session::new(caps, logs);
		match self.bind(&mut session).await {
			Ok(()) => Ok(session),
			Err(err) => {
				session.stop().await;
				Err(err)
			}
		}
	}

	async fn bind(&self, session: &mut Session) -> Result<()> {
		session.bind_device(self.pool.reserve(session.capabilities())?);

		let application = self.resolver.resolve(session.capabilities_mut()).await?;
		if session.device().is_some_and(|device| !device.accepts(session.capabilities())) {
			let replacement = self.pool.reserve(session.capabilities())?;
			debug!(target = "mdrive.session", device = %replacement.device().id(), "switched to a device that can run the application");
			if let Some(previous) = session.bind_device(replacement) {
				previous.release();
			}
		}

		session.capabilities_mut().bundle_id = Some(application.bundle_id().to_string());
		session.bind_application(application);

		let driver = self.drivers.create(session)?;
		session.bind_driver(driver);
		Ok(())
	}
}
