//! HTTP surface of the session server.

mod sessions;

use std::future::Future;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/wd/hub/status", get(sessions::status))
		.route("/wd/hub/session", post(sessions::create))
		.route("/wd/hub/sessions", get(sessions::list))
		.route("/wd/hub/session/{id}", get(sessions::show).delete(sessions::delete))
		.with_state(state)
}

/// Serves until `shutdown` resolves, then stops every live session.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
	F: Future<Output = ()> + Send + 'static,
{
	info!(target = "mdrive.server", addr = ?listener.local_addr().ok(), "listening");
	axum::serve(listener, router(state.clone()).into_make_service())
		.with_graceful_shutdown(shutdown)
		.await?;

	let stopped = state.registry().stop_all().await;
	info!(target = "mdrive.server", sessions = stopped, "server stopped");
	Ok(())
}
