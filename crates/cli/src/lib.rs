//! The `mdrive` session server: configuration, logging and the HTTP surface
//! over the orchestration engine.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod state;
