//! Application resolution: materialized artifacts and deployed instances.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdrive_protocol::Capabilities;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::archive::Materializer;
use crate::error::{Error, Result};
use crate::negotiate::DEFAULT_LANGUAGE;

/// Shape of an application artifact on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
	/// Directory bundle (`*.app`). Built for the simulator only.
	Bundle,
	/// Flat package (`*.ipa`). Installable on hardware.
	Package,
}

/// A launchable application and the localizations it ships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
	bundle_id: String,
	path: PathBuf,
	kind: ArtifactKind,
	languages: BTreeSet<String>,
}

impl Application {
	pub fn new(bundle_id: impl Into<String>, path: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
		Self {
			bundle_id: bundle_id.into(),
			path: path.into(),
			kind,
			languages: BTreeSet::new(),
		}
	}

	/// Declares the localizations; an empty set accepts any language.
	pub fn with_languages<I, S>(mut self, languages: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.languages = languages.into_iter().map(Into::into).collect();
		self
	}

	/// Inspects a materialized artifact. Bundles list their localizations as
	/// `<lang>.lproj` directories.
	pub fn from_artifact(path: &Path) -> Result<Self> {
		let metadata = std::fs::metadata(path)?;
		let bundle_id = path
			.file_stem()
			.and_then(|stem| stem.to_str())
			.filter(|stem| !stem.is_empty())
			.ok_or_else(|| Error::Materialize(format!("cannot derive a bundle name from {}", path.display())))?
			.to_string();

		if !metadata.is_dir() {
			return Ok(Self::new(bundle_id, path, ArtifactKind::Package));
		}

		let mut languages = BTreeSet::new();
		for entry in std::fs::read_dir(path)? {
			let entry = entry?;
			let name = entry.file_name();
			let Some(lang) = name.to_str().and_then(|name| name.strip_suffix(".lproj")) else {
				continue;
			};
			if lang != "Base" && entry.file_type()?.is_dir() {
				languages.insert(lang.to_string());
			}
		}
		Ok(Self::new(bundle_id, path, ArtifactKind::Bundle).with_languages(languages))
	}

	pub fn bundle_id(&self) -> &str {
		&self.bundle_id
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn kind(&self) -> ArtifactKind {
		self.kind
	}

	pub fn languages(&self) -> &BTreeSet<String> {
		&self.languages
	}

	pub fn supports(&self, language: &str) -> bool {
		self.languages.is_empty() || self.languages.contains(language)
	}

	/// Binds the application to `language`.
	pub fn instance(self: &Arc<Self>, language: &str) -> Result<ApplicationInstance> {
		if !self.supports(language) {
			return Err(Error::LanguageNotLocalized {
				bundle_id: self.bundle_id.clone(),
				language: language.to_string(),
			});
		}
		Ok(ApplicationInstance {
			application: Arc::clone(self),
			language: language.to_string(),
			scratch: None,
		})
	}
}

/// An application bound to one language, owned by a single session.
///
/// Instances resolved from a fetched or extracted source own the scratch
/// directory holding the artifact.
#[derive(Debug)]
pub struct ApplicationInstance {
	application: Arc<Application>,
	language: String,
	scratch: Option<TempDir>,
}

impl ApplicationInstance {
	pub fn application(&self) -> &Application {
		&self.application
	}

	pub fn bundle_id(&self) -> &str {
		self.application.bundle_id()
	}

	pub fn path(&self) -> &Path {
		self.application.path()
	}

	pub fn language(&self) -> &str {
		&self.language
	}

	pub fn is_simulator_only(&self) -> bool {
		self.application.kind() == ArtifactKind::Bundle
	}

	pub fn scratch_dir(&self) -> Option<&Path> {
		self.scratch.as_ref().map(TempDir::path)
	}

	/// Hands over the scratch directory; the caller becomes responsible for removing it.
	pub fn take_scratch(&mut self) -> Option<TempDir> {
		self.scratch.take()
	}
}

/// Applications already deployed on the host.
#[derive(Debug, Clone, Default)]
pub struct ApplicationCatalog {
	applications: Vec<Arc<Application>>,
}

impl ApplicationCatalog {
	pub fn new(applications: impl IntoIterator<Item = Application>) -> Self {
		Self {
			applications: applications.into_iter().map(Arc::new).collect(),
		}
	}

	pub fn applications(&self) -> &[Arc<Application>] {
		&self.applications
	}

	/// First deployed application with `bundle_id` that is localized for `language`.
	pub fn find(&self, bundle_id: &str, language: &str) -> Option<&Arc<Application>> {
		self.applications
			.iter()
			.find(|app| app.bundle_id() == bundle_id && app.supports(language))
	}
}

/// Turns capabilities into a launchable [`ApplicationInstance`].
#[derive(Clone)]
pub struct ApplicationResolver {
	materializer: Arc<dyn Materializer>,
	catalog: Arc<ApplicationCatalog>,
}

impl ApplicationResolver {
	pub fn new(materializer: Arc<dyn Materializer>, catalog: ApplicationCatalog) -> Self {
		Self {
			materializer,
			catalog: Arc::new(catalog),
		}
	}

	pub fn catalog(&self) -> &ApplicationCatalog {
		&self.catalog
	}

	/// Resolves the application named by `caps`.
	///
	/// Materializing a directory bundle marks `caps` simulator-only.
	pub async fn resolve(&self, caps: &mut Capabilities) -> Result<ApplicationInstance> {
		let language = caps.language.clone().unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

		if let Some(location) = caps.app.clone() {
			let instance = self
				.from_source(&location, &language)
				.await
				.map_err(|source| Error::ApplicationResolutionFailed {
					location: location.clone(),
					source: Box::new(source),
				})?;
			if instance.is_simulator_only() {
				caps.simulator = Some(true);
			}
			info!(
				target = "mdrive.app",
				%location,
				bundle_id = instance.bundle_id(),
				simulator_only = instance.is_simulator_only(),
				"application materialized"
			);
			return Ok(instance);
		}

		let Some(bundle_id) = caps.bundle_id.as_deref() else {
			return Err(Error::InvalidCapabilities(
				"neither an application source (`app`) nor a bundle identifier was given".to_string(),
			));
		};
		let application = self.catalog.find(bundle_id, &language).ok_or_else(|| Error::NoMatchingApplication {
			bundle_id: bundle_id.to_string(),
			language: language.clone(),
		})?;
		debug!(target = "mdrive.app", bundle_id, %language, "using deployed application");
		application.instance(&language)
	}

	async fn from_source(&self, location: &str, language: &str) -> Result<ApplicationInstance> {
		let (path, scratch) = self.materializer.materialize(location).await?.into_parts();
		let application = Arc::new(Application::from_artifact(&path)?);
		let mut instance = application.instance(language)?;
		instance.scratch = scratch;
		Ok(instance)
	}
}
