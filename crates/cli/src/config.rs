//! Server configuration file.
//!
//! Every key is optional; a missing default file means all defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mdrive::{Application, ApplicationCatalog, ArtifactKind, Device, DriverTemplate, HostInfo};
use mdrive_protocol::{DeviceKind, DeviceVariation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Cli;
use crate::error::{CliError, Result};

pub const DEFAULT_PORT: u16 = 5555;
/// Upper bound for the base session timeout, in seconds.
pub const MAX_SESSION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	pub host: String,
	pub port: u16,
	pub new_session_timeout_secs: u64,
	pub max_concurrent_sessions: usize,
	pub sdks: SdkConfig,
	pub devices: Vec<DeviceConfig>,
	pub applications: Vec<ApplicationConfig>,
	pub driver: DriverConfig,
	pub work_dir: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: DEFAULT_PORT,
			new_session_timeout_secs: 20,
			max_concurrent_sessions: 4,
			sdks: SdkConfig::default(),
			devices: Vec::new(),
			applications: Vec::new(),
			driver: DriverConfig::default(),
			work_dir: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdkConfig {
	pub installed: Vec<String>,
	pub default: String,
}

impl Default for SdkConfig {
	fn default() -> Self {
		Self {
			installed: vec!["7.1".to_string()],
			default: "7.1".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
	pub id: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default = "default_true")]
	pub simulator: bool,
	#[serde(default)]
	pub kinds: Vec<DeviceKind>,
	/// Defaults to every installed SDK.
	#[serde(default)]
	pub sdks: Vec<String>,
	#[serde(default)]
	pub variations: Vec<DeviceVariation>,
}

fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
	pub bundle_id: String,
	pub path: PathBuf,
	#[serde(default)]
	pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
	pub program: String,
	pub args: Vec<String>,
	pub env: BTreeMap<String, String>,
	pub ready_pattern: String,
	pub crash_patterns: Vec<String>,
}

impl Default for DriverConfig {
	fn default() -> Self {
		Self {
			program: "instruments".to_string(),
			args: vec!["-w".into(), "{device}".into(), "{app}".into(), "-AppleLanguages".into(), "({language})".into()],
			env: BTreeMap::new(),
			ready_pattern: "Instruments Trace Complete|Script started".to_string(),
			crash_patterns: vec!["(?i)application.*crashed".to_string(), "The target application appears to have died".to_string()],
		}
	}
}

impl Config {
	/// `<config dir>/mdrive/config.json`.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("mdrive").join("config.json"))
	}

	/// Loads `explicit`, or the default file when it exists.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			return Self::from_file(path);
		}
		match Self::default_path() {
			Some(path) if path.is_file() => Self::from_file(&path),
			_ => Ok(Self::default()),
		}
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		let config = serde_json::from_str(&text).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;
		debug!(target = "mdrive.server", path = %path.display(), "config loaded");
		Ok(config)
	}

	/// Command-line flags win over file values.
	pub fn apply_overrides(&mut self, cli: &Cli) {
		if let Some(host) = &cli.host {
			self.host = host.clone();
		}
		if let Some(port) = cli.port {
			self.port = port;
		}
		if let Some(secs) = cli.new_session_timeout {
			self.new_session_timeout_secs = secs;
		}
		if let Some(max) = cli.max_sessions {
			self.max_concurrent_sessions = max;
		}
	}

	pub fn bind_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	pub fn base_timeout(&self) -> Duration {
		Duration::from_secs(self.new_session_timeout_secs.clamp(1, MAX_SESSION_TIMEOUT_SECS))
	}

	pub fn max_concurrent_sessions(&self) -> usize {
		self.max_concurrent_sessions.max(1)
	}

	pub fn work_dir(&self) -> PathBuf {
		self.work_dir.clone().unwrap_or_else(|| std::env::temp_dir().join("mdrive"))
	}

	pub fn host_info(&self) -> HostInfo {
		HostInfo::new(self.sdks.installed.iter().cloned(), self.sdks.default.clone())
	}

	/// Configured devices, or a single all-purpose simulator when none are.
	pub fn devices(&self) -> Result<Vec<Device>> {
		let installed: Vec<String> = self.host_info().installed_sdks().iter().cloned().collect();
		if self.devices.is_empty() {
			return Ok(vec![Device::simulator("simulator", "iOS Simulator", installed)]);
		}
		self.devices.iter().map(|device| device.build(&installed)).collect()
	}

	pub fn catalog(&self) -> ApplicationCatalog {
		ApplicationCatalog::new(self.applications.iter().map(|app| {
			let kind = match app.path.extension().and_then(|ext| ext.to_str()) {
				Some("ipa") => ArtifactKind::Package,
				_ => ArtifactKind::Bundle,
			};
			Application::new(&app.bundle_id, &app.path, kind).with_languages(app.languages.iter().cloned())
		}))
	}

	/// Driver template with the program resolved on `PATH`.
	pub fn driver_template(&self) -> Result<DriverTemplate> {
		let driver = &self.driver;
		let program = which::which(&driver.program).map_err(|source| CliError::DriverNotFound {
			program: driver.program.clone(),
			source,
		})?;

		let mut template = DriverTemplate::new(program, driver.ready_pattern.clone()).with_args(driver.args.iter().cloned());
		for (key, value) in &driver.env {
			template = template.with_env(key, value);
		}
		for pattern in &driver.crash_patterns {
			template = template.with_crash_pattern(pattern.clone());
		}
		Ok(template)
	}
}

impl DeviceConfig {
	fn build(&self, installed: &[String]) -> Result<Device> {
		let name = self.name.clone().unwrap_or_else(|| self.id.clone());
		if self.simulator {
			let sdks = if self.sdks.is_empty() { installed.to_vec() } else { self.sdks.clone() };
			let mut device = Device::simulator(&self.id, name, sdks);
			if !self.kinds.is_empty() {
				device = device.with_kinds(self.kinds.iter().copied());
			}
			if !self.variations.is_empty() {
				device = device.with_variations(self.variations.iter().copied());
			}
			return Ok(device);
		}

		let invalid = |reason: &str| CliError::InvalidDevice {
			id: self.id.clone(),
			reason: reason.to_string(),
		};
		let kind = self.kinds.first().copied().unwrap_or_default();
		let sdk = self.sdks.first().ok_or_else(|| invalid("real devices need their installed SDK in `sdks`"))?;
		let variation = self
			.variations
			.first()
			.copied()
			.ok_or_else(|| invalid("real devices need their screen in `variations`"))?;
		Ok(Device::real(&self.id, name, kind, sdk.clone(), variation))
	}
}
