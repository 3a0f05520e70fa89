//! Capability validation and default injection.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use mdrive_protocol::{Capabilities, DeviceKind, DeviceVariation};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_LOCALE: &str = "en_GB";
pub const MINIMUM_SDK: &str = "5.0";

/// ISO codes of the languages a device can be switched to.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
	"en", "fr", "de", "ja", "nl", "it", "es", "pt", "pt-PT", "da", "fi", "nb", "sv", "ko", "zh-Hans", "zh-Hant", "ru", "pl", "tr", "uk", "ar", "hr",
	"cs", "el", "he", "ro", "sk", "th", "id", "ms", "en-GB", "ca", "hu", "vi",
];

/// Dotted numeric SDK version. Missing trailing components compare as zero,
/// so `7` and `7.0` are equal.
#[derive(Debug, Clone)]
pub struct SdkVersion {
	raw: String,
	parts: Vec<u32>,
}

impl SdkVersion {
	pub fn parse(raw: &str) -> Option<Self> {
		let raw = raw.trim();
		if raw.is_empty() {
			return None;
		}
		let parts = raw.split('.').map(|part| part.parse::<u32>().ok()).collect::<Option<Vec<_>>>()?;
		Some(Self { raw: raw.to_string(), parts })
	}

	pub fn major(&self) -> u32 {
		self.parts.first().copied().unwrap_or(0)
	}

	pub fn as_str(&self) -> &str {
		&self.raw
	}

	fn component(&self, idx: usize) -> u32 {
		self.parts.get(idx).copied().unwrap_or(0)
	}
}

impl PartialEq for SdkVersion {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for SdkVersion {}

impl PartialOrd for SdkVersion {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for SdkVersion {
	fn cmp(&self, other: &Self) -> Ordering {
		let len = self.parts.len().max(other.parts.len());
		(0..len)
			.map(|idx| self.component(idx).cmp(&other.component(idx)))
			.find(|ord| *ord != Ordering::Equal)
			.unwrap_or(Ordering::Equal)
	}
}

impl fmt::Display for SdkVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.raw)
	}
}

/// Returns `true` when two version strings name the same SDK.
pub fn same_sdk(a: &str, b: &str) -> bool {
	match (SdkVersion::parse(a), SdkVersion::parse(b)) {
		(Some(a), Some(b)) => a == b,
		_ => a.trim() == b.trim(),
	}
}

/// SDKs installed on the host running the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
	installed: BTreeSet<String>,
	default_sdk: String,
}

impl HostInfo {
	/// The default SDK is always part of the installed set.
	pub fn new<I, S>(installed: I, default_sdk: impl Into<String>) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let default_sdk = default_sdk.into();
		let mut installed: BTreeSet<String> = installed.into_iter().map(Into::into).collect();
		installed.insert(default_sdk.clone());
		Self { installed, default_sdk }
	}

	pub fn installed_sdks(&self) -> &BTreeSet<String> {
		&self.installed
	}

	pub fn default_sdk(&self) -> &str {
		&self.default_sdk
	}

	/// Installed entry naming the same SDK as `version`.
	pub fn find_installed(&self, version: &SdkVersion) -> Option<SdkVersion> {
		self.installed.iter().filter_map(|sdk| SdkVersion::parse(sdk)).find(|sdk| sdk == version)
	}
}

/// Variation that a device of `kind` can display under `sdk`.
///
/// The non-retina layouts were dropped from the SDK 7 simulators.
pub fn compatible_variation(kind: DeviceKind, sdk: Option<&SdkVersion>) -> DeviceVariation {
	let modern = sdk.is_some_and(|sdk| sdk.major() >= 7);
	match (kind, modern) {
		(DeviceKind::Iphone, true) => DeviceVariation::Retina4,
		(DeviceKind::Ipad, true) => DeviceVariation::Retina,
		(_, false) => DeviceVariation::Regular,
	}
}

/// Validates client capabilities and fills in defaults.
#[derive(Debug, Clone)]
pub struct CapabilityNegotiator {
	host: HostInfo,
}

impl CapabilityNegotiator {
	pub fn new(host: HostInfo) -> Self {
		Self { host }
	}

	pub fn host(&self) -> &HostInfo {
		&self.host
	}

	/// Returns the resolved capability set, or the first validation failure.
	pub fn normalize(&self, mut caps: Capabilities) -> Result<Capabilities> {
		caps.language = Some(negotiate_language(caps.language.take())?);
		caps.locale = Some(match caps.locale.take() {
			Some(locale) if !locale.trim().is_empty() => locale,
			_ => DEFAULT_LOCALE.to_string(),
		});

		let sdk = self.negotiate_sdk(caps.sdk_version.take())?;
		caps.sdk_version = Some(sdk.as_str().to_string());

		let kind = *caps.device.get_or_insert_with(DeviceKind::default);
		if caps.variation.is_none() {
			caps.variation = Some(compatible_variation(kind, Some(&sdk)));
		}

		debug!(
			target = "mdrive.session",
			language = ?caps.language,
			locale = ?caps.locale,
			sdk = %sdk,
			device = %kind,
			variation = ?caps.variation,
			"capabilities negotiated"
		);
		Ok(caps)
	}

	fn negotiate_sdk(&self, requested: Option<String>) -> Result<SdkVersion> {
		let requested = requested.filter(|v| !v.trim().is_empty());
		let Some(requested) = requested else {
			return SdkVersion::parse(self.host.default_sdk()).ok_or_else(|| Error::UnsupportedSdkVersion {
				version: self.host.default_sdk().to_string(),
				minimum: MINIMUM_SDK.to_string(),
			});
		};

		let version = SdkVersion::parse(&requested)
			.filter(|v| *v >= minimum_sdk())
			.ok_or_else(|| Error::UnsupportedSdkVersion {
				version: requested.clone(),
				minimum: MINIMUM_SDK.to_string(),
			})?;

		self.host.find_installed(&version).ok_or_else(|| Error::SdkNotInstalled {
			version: requested,
			installed: self.host.installed_sdks().iter().cloned().collect(),
		})
	}
}

fn minimum_sdk() -> SdkVersion {
	SdkVersion {
		raw: MINIMUM_SDK.to_string(),
		parts: vec![5, 0],
	}
}

fn negotiate_language(requested: Option<String>) -> Result<String> {
	match requested {
		Some(code) if !code.trim().is_empty() => {
			if SUPPORTED_LANGUAGES.contains(&code.as_str()) {
				Ok(code)
			} else {
				Err(Error::UnsupportedLanguage(code))
			}
		}
		_ => Ok(DEFAULT_LANGUAGE.to_string()),
	}
}
