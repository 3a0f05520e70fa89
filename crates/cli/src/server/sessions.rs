use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use mdrive::{Session, SessionId};
use mdrive_protocol::{NewSessionRequest, WireResponse, status};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::state::AppState;

type Reply = (StatusCode, Json<WireResponse>);

fn reply(code: StatusCode, response: WireResponse) -> Reply {
	(code, Json(response))
}

/// `error` followed by its sources, joined with `: `.
fn error_chain(error: &dyn std::error::Error) -> String {
	let mut message = error.to_string();
	let mut source = error.source();
	while let Some(cause) = source {
		let text = cause.to_string();
		if !message.contains(&text) {
			message.push_str(": ");
			message.push_str(&text);
		}
		source = cause.source();
	}
	message
}

fn describe(session: &Session) -> Value {
	let mut caps = serde_json::to_value(session.capabilities()).unwrap_or_else(|_| json!({}));
	if let Value::Object(map) = &mut caps {
		map.insert("state".into(), json!(session.state()));
		if let Some(device) = session.device() {
			map.insert("deviceId".into(), json!(device.id().as_str()));
		}
		if let Some(details) = session.crash_details() {
			map.insert("crash".into(), json!(details.log()));
		}
	}
	caps
}

fn no_such_session(id: &str) -> Reply {
	reply(
		StatusCode::NOT_FOUND,
		WireResponse::failure(Some(id.to_string()), status::NO_SUCH_SESSION, format!("no session with id {id}")),
	)
}

pub(super) async fn status(State(state): State<AppState>) -> Json<WireResponse> {
	let devices: Vec<Value> = state
		.pool()
		.snapshot()
		.iter()
		.map(|status| {
			json!({
				"id": status.device.id().as_str(),
				"name": status.device.name(),
				"simulator": status.device.is_simulator(),
				"reserved": status.reserved,
			})
		})
		.collect();
	Json(WireResponse::success(
		None,
		json!({
			"build": { "version": env!("CARGO_PKG_VERSION") },
			"uptimeSecs": state.uptime_secs(),
			"sessions": state.registry().len(),
			"devices": {
				"total": state.pool().len(),
				"free": state.pool().free_count(),
				"entries": devices,
			},
		}),
	))
}

pub(super) async fn create(State(state): State<AppState>, payload: Result<Json<NewSessionRequest>, JsonRejection>) -> Reply {
	let caps = match payload.map_err(|rejection| rejection.body_text()).and_then(|Json(request)| {
		request.into_capabilities().map_err(|err| err.to_string())
	}) {
		Ok(caps) => caps,
		Err(message) => {
			warn!(target = "mdrive.server", %message, "malformed session request");
			return reply(StatusCode::BAD_REQUEST, WireResponse::failure(None, status::UNKNOWN_ERROR, message));
		}
	};

	let Ok(_permit) = state.permits().acquire().await else {
		return reply(
			StatusCode::SERVICE_UNAVAILABLE,
			WireResponse::failure(None, status::UNKNOWN_ERROR, "server is shutting down"),
		);
	};

	match state.orchestrator().create_session(caps).await {
		Ok(id) => {
			info!(target = "mdrive.server", session = %id, "session created");
			reply(StatusCode::OK, WireResponse::success(Some(id.to_string()), json!({})))
		}
		Err(err) => {
			let message = error_chain(&err);
			warn!(target = "mdrive.server", class = ?err.cause().class(), error = %message, "session not created");
			reply(
				StatusCode::INTERNAL_SERVER_ERROR,
				WireResponse::failure(None, status::SESSION_NOT_CREATED, message),
			)
		}
	}
}

pub(super) async fn show(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
	let Some(session) = state.registry().get(&SessionId::from(id.as_str())) else {
		return no_such_session(&id);
	};
	if let Some(cached) = session.cached_response() {
		return reply(StatusCode::OK, cached);
	}
	let response = WireResponse::success(Some(id), describe(&session));
	session.set_cached_response(response.clone());
	reply(StatusCode::OK, response)
}

pub(super) async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
	match state.registry().remove_and_stop(&SessionId::from(id.as_str())).await {
		Ok(_) => reply(StatusCode::OK, WireResponse::success(Some(id), Value::Null)),
		Err(mdrive::Error::NoSuchSession(_)) => no_such_session(&id),
		Err(err) => reply(
			StatusCode::INTERNAL_SERVER_ERROR,
			WireResponse::failure(Some(id), status::UNKNOWN_ERROR, error_chain(&err)),
		),
	}
}

pub(super) async fn list(State(state): State<AppState>) -> Json<WireResponse> {
	let sessions: Vec<Value> = state
		.registry()
		.list()
		.iter()
		.map(|session| json!({ "id": session.id().as_str(), "capabilities": describe(session) }))
		.collect();
	Json(WireResponse::success(None, Value::Array(sessions)))
}
