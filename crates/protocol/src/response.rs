//! JSON wire-protocol response envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Numeric status codes used in [`WireResponse::status`].
pub mod status {
	pub const SUCCESS: i32 = 0;
	pub const NO_SUCH_SESSION: i32 = 6;
	pub const UNKNOWN_ERROR: i32 = 13;
	pub const SESSION_NOT_CREATED: i32 = 33;
}

/// Envelope returned by every session endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	pub status: i32,
	pub value: Value,
}

impl WireResponse {
	/// Success response with the given payload.
	pub fn success(session_id: Option<String>, value: Value) -> Self {
		Self {
			session_id,
			status: status::SUCCESS,
			value,
		}
	}

	/// Failure response carrying a human-readable message.
	pub fn failure(session_id: Option<String>, status: i32, message: impl Into<String>) -> Self {
		Self {
			session_id,
			status,
			value: json!({ "message": message.into() }),
		}
	}

	pub fn is_success(&self) -> bool {
		self.status == status::SUCCESS
	}

	/// Message of a failure response, if any.
	pub fn message(&self) -> Option<&str> {
		self.value.get("message").and_then(Value::as_str)
	}
}
