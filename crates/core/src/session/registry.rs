//! Live sessions keyed by id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::lifecycle::{Session, SessionId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
	sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, session: Arc<Session>) {
		self.sessions.write().insert(session.id().clone(), session);
	}

	pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
		self.sessions.read().get(id).cloned()
	}

	/// Sessions ordered by id.
	pub fn list(&self) -> Vec<Arc<Session>> {
		let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
		sessions.sort_by(|a, b| a.id().cmp(b.id()));
		sessions
	}

	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}

	/// Unregisters the session and stops it.
	pub async fn remove_and_stop(&self, id: &SessionId) -> Result<Arc<Session>> {
		let session = self.sessions.write().remove(id).ok_or_else(|| Error::NoSuchSession(id.to_string()))?;
		session.stop().await;
		info!(target = "mdrive.session", session = %id, "session deleted");
		Ok(session)
	}

	/// Stops and unregisters every session; returns how many there were.
	pub async fn stop_all(&self) -> usize {
		let sessions: Vec<_> = self.sessions.write().drain().map(|(_, session)| session).collect();
		for session in &sessions {
			session.stop().await;
		}
		sessions.len()
	}
}
