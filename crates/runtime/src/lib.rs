//! mdrive runtime - automation-driver process lifecycle
//!
//! This crate owns the mechanics of the external process that actually
//! drives a device for a session:
//!
//! - **Command**: program, arguments, environment and the output patterns
//!   that signal readiness or an application crash
//! - **Launch**: spawning the process and waiting for its readiness line
//!   within a caller-supplied timeout
//! - **Monitoring**: forwarding output lines and reporting crashes with the
//!   most recent output as diagnostics
//! - **Stop**: terminating the process group, idempotently
//!
//! It knows nothing about sessions, devices or capabilities; callers observe
//! the process through the [`ProcessObserver`] trait.

pub mod command;
pub mod error;
pub mod launch;
pub mod process;

pub use command::DriverCommand;
pub use error::{DriverError, Result};
pub use launch::{CrashReport, OutputLine, OutputStream, ProcessObserver, RunningProcess, launch};
pub use process::pid_is_alive;
