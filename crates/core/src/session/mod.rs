//! Sessions: lifecycle, driver seam, orchestration and the live registry.

mod driver;
mod lifecycle;
mod orchestrator;
mod registry;

pub use driver::{DriverFactory, DriverProcess, DriverTemplate, ProcessDriver, ProcessDriverFactory};
pub use lifecycle::{CrashDetails, CrashReporter, Session, SessionId, SessionState};
pub use orchestrator::{DEFAULT_BASE_TIMEOUT, MAX_RETRIES, RetryPolicy, SessionOrchestrator};
pub use registry::SessionRegistry;
