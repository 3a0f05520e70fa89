//! Fetching and unpacking application artifacts.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// Turns an application location into a local artifact.
#[async_trait]
pub trait Materializer: Send + Sync {
	async fn materialize(&self, location: &str) -> Result<Artifact>;
}

/// A local application artifact.
///
/// Artifacts fetched or extracted by a materializer own their scratch
/// directory; it is removed when the artifact (or the session it was bound
/// to) lets go of it.
#[derive(Debug)]
pub struct Artifact {
	path: PathBuf,
	scratch: Option<TempDir>,
}

impl Artifact {
	/// An artifact that already lives on disk and is never removed.
	pub fn local(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			scratch: None,
		}
	}

	/// An artifact inside `scratch`, which is deleted with it.
	pub fn in_scratch(path: impl Into<PathBuf>, scratch: TempDir) -> Self {
		Self {
			path: path.into(),
			scratch: Some(scratch),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn scratch_dir(&self) -> Option<&Path> {
		self.scratch.as_ref().map(TempDir::path)
	}

	pub fn into_parts(self) -> (PathBuf, Option<TempDir>) {
		(self.path, self.scratch)
	}
}

/// Materializes local paths, `file://` URLs and `http(s)://` downloads.
/// Zip archives are extracted under the work directory.
#[derive(Debug, Clone)]
pub struct FsMaterializer {
	work_dir: PathBuf,
	client: reqwest::Client,
}

impl FsMaterializer {
	pub fn new(work_dir: impl Into<PathBuf>) -> Self {
		Self {
			work_dir: work_dir.into(),
			client: reqwest::Client::new(),
		}
	}

	pub fn work_dir(&self) -> &Path {
		&self.work_dir
	}

	async fn download(&self, url: &Url) -> Result<Artifact> {
		let name = url
			.path_segments()
			.and_then(|mut segments| segments.next_back())
			.filter(|name| !name.is_empty())
			.unwrap_or("download.zip")
			.to_string();
		let dir = self.scratch_dir("download-").await?;
		let target = dir.path().join(name);

		let bytes = self.client.get(url.clone()).send().await?.error_for_status()?.bytes().await?;
		tokio::fs::write(&target, &bytes).await?;
		info!(target = "mdrive.app", %url, bytes = bytes.len(), path = %target.display(), "application downloaded");
		Ok(Artifact::in_scratch(target, dir))
	}

	async fn scratch_dir(&self, prefix: &str) -> Result<TempDir> {
		tokio::fs::create_dir_all(&self.work_dir).await?;
		Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(&self.work_dir)?)
	}

	/// Extracts `archive` into a fresh scratch directory. A downloaded
	/// archive's own scratch directory is removed once extraction finishes.
	async fn unpack(&self, archive: Artifact) -> Result<Artifact> {
		let dest = self.scratch_dir("app-").await?;
		let extract_to = dest.path().to_path_buf();
		tokio::task::spawn_blocking(move || -> Result<()> {
			let file = std::fs::File::open(archive.path())?;
			let mut zip = zip::ZipArchive::new(file)?;
			zip.extract(&extract_to)?;
			Ok(())
		})
		.await
		.map_err(|e| Error::Materialize(format!("extraction task failed: {e}")))??;

		let artifact = find_artifact(dest.path())?;
		debug!(target = "mdrive.app", path = %artifact.display(), "archive extracted");
		Ok(Artifact::in_scratch(artifact, dest))
	}
}

#[async_trait]
impl Materializer for FsMaterializer {
	async fn materialize(&self, location: &str) -> Result<Artifact> {
		let artifact = match Url::parse(location) {
			Ok(url) if matches!(url.scheme(), "http" | "https") => self.download(&url).await?,
			Ok(url) if url.scheme() == "file" => Artifact::local(
				url.to_file_path()
					.map_err(|()| Error::Materialize(format!("`{location}` is not a valid file URL")))?,
			),
			_ => Artifact::local(location),
		};

		let path = artifact.path();
		let metadata = tokio::fs::metadata(path)
			.await
			.map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
		if metadata.is_dir() || !is_zip(path) {
			return Ok(artifact);
		}
		self.unpack(artifact).await
	}
}

fn is_zip(path: &Path) -> bool {
	path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Finds the `.app` bundle or `.ipa` package inside an extracted archive.
fn find_artifact(root: &Path) -> Result<PathBuf> {
	for dir in [root.to_path_buf(), root.join("Payload")] {
		let Ok(entries) = std::fs::read_dir(&dir) else {
			continue;
		};
		let mut candidates: Vec<PathBuf> = entries
			.filter_map(|entry| entry.ok().map(|entry| entry.path()))
			.filter(|path| matches!(path.extension().and_then(|ext| ext.to_str()), Some("app" | "ipa")))
			.collect();
		candidates.sort();
		if let Some(found) = candidates.into_iter().next() {
			return Ok(found);
		}
	}
	Err(Error::Materialize(format!("no .app or .ipa found in {}", root.display())))
}
