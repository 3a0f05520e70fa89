//! Desired-capability object carried by new-session requests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device form factor requested by a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
	#[default]
	#[serde(alias = "iPhone", alias = "IPHONE")]
	Iphone,
	#[serde(alias = "iPad", alias = "IPAD")]
	Ipad,
}

impl DeviceKind {
	pub fn as_str(self) -> &'static str {
		match self {
			DeviceKind::Iphone => "iphone",
			DeviceKind::Ipad => "ipad",
		}
	}
}

impl fmt::Display for DeviceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for DeviceKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"iphone" => Ok(DeviceKind::Iphone),
			"ipad" => Ok(DeviceKind::Ipad),
			other => Err(format!("unknown device kind: {other}")),
		}
	}
}

/// Screen variation of a device form factor.
///
/// Serialized in PascalCase; lowercase spellings are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceVariation {
	#[serde(alias = "regular", alias = "REGULAR")]
	Regular,
	#[serde(alias = "retina35", alias = "RETINA35")]
	Retina35,
	#[serde(alias = "retina4", alias = "RETINA4")]
	Retina4,
	#[serde(alias = "retina", alias = "RETINA")]
	Retina,
}

impl DeviceVariation {
	pub const ALL: [DeviceVariation; 4] = [
		DeviceVariation::Regular,
		DeviceVariation::Retina35,
		DeviceVariation::Retina4,
		DeviceVariation::Retina,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			DeviceVariation::Regular => "Regular",
			DeviceVariation::Retina35 => "Retina35",
			DeviceVariation::Retina4 => "Retina4",
			DeviceVariation::Retina => "Retina",
		}
	}
}

impl fmt::Display for DeviceVariation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Client-declared description of the desired session environment.
///
/// Unrecognized keys are preserved in [`Capabilities::extra`] so that they
/// survive negotiation and are echoed back by capability queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
	/// Application source: local path, `file://` or `http(s)://` URL.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app: Option<String>,
	#[serde(default, rename = "CFBundleIdentifier", alias = "bundleId", skip_serializing_if = "Option::is_none")]
	pub bundle_id: Option<String>,
	/// Dotted SDK version, e.g. `7.0`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sdk_version: Option<String>,
	/// ISO language code.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub language: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub locale: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device: Option<DeviceKind>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variation: Option<DeviceVariation>,
	/// Restricts the session to virtual devices.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub simulator: Option<bool>,
	/// Log type to level name, e.g. `{"driver": "DEBUG"}`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub logging_prefs: Option<BTreeMap<String, String>>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Capabilities {
	/// Returns `true` when only a virtual device may host the session.
	pub fn simulator_only(&self) -> bool {
		self.simulator.unwrap_or(false)
	}
}

/// Payload of `POST /session`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
	pub desired_capabilities: Capabilities,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub required_capabilities: Option<Value>,
}

impl NewSessionRequest {
	/// Desired capabilities with the required entries laid over them.
	pub fn into_capabilities(self) -> serde_json::Result<Capabilities> {
		let Some(Value::Object(required)) = self.required_capabilities else {
			return Ok(self.desired_capabilities);
		};
		let mut merged = match serde_json::to_value(self.desired_capabilities)? {
			Value::Object(map) => map,
			_ => Map::new(),
		};
		merged.extend(required);
		serde_json::from_value(Value::Object(merged))
	}
}
