//! Session orchestration engine for remote-controlled mobile devices.
//!
//! A session request flows through four stages:
//!
//! 1. [`CapabilityNegotiator`] validates the requested capabilities and fills
//!    in defaults (language, locale, SDK, device variation).
//! 2. [`DevicePool`] reserves a matching device exclusively.
//! 3. [`ApplicationResolver`] materializes or looks up the application.
//! 4. [`Session`] starts the driver process within a time budget.
//!
//! [`SessionOrchestrator`] drives these stages with a bounded retry loop and
//! stops every partially built session before reporting a failure.

pub mod application;
pub mod archive;
pub mod device;
pub mod error;
pub mod logs;
pub mod negotiate;
pub mod session;

pub use application::{Application, ApplicationCatalog, ApplicationInstance, ApplicationResolver, ArtifactKind};
pub use archive::{Artifact, FsMaterializer, Materializer};
pub use device::{Device, DeviceId, DeviceLease, DevicePool, DeviceStatus};
pub use error::{Error, ErrorClass, Result, SessionNotCreated};
pub use logs::{DRIVER_LOG, LogEntry, LogLevel, LogManager};
pub use negotiate::{CapabilityNegotiator, HostInfo, SdkVersion};
pub use session::{
	CrashDetails, CrashReporter, DEFAULT_BASE_TIMEOUT, DriverFactory, DriverProcess, DriverTemplate, MAX_RETRIES, ProcessDriver, ProcessDriverFactory,
	RetryPolicy, Session, SessionId, SessionOrchestrator, SessionRegistry, SessionState,
};
