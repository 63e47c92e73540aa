//! Control surface endpoints.
//!
//! Every failure the dashboard can act on is returned as `{ok: false, error}`
//! with a 200; only an unparsable request body gets a 400.

mod control;
mod health;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use callrun_core::CallRunError;

// ── Shared envelope ─────────────────────────────────────────────

pub type ApiResponse = (StatusCode, Json<Value>);

/// `{ok: true, ...fields}`; `fields` must be a JSON object.
pub(crate) fn ok(fields: Value) -> ApiResponse {
    let mut body = json!({ "ok": true });
    if let (Value::Object(out), Value::Object(extra)) = (&mut body, fields) {
        out.extend(extra);
    }
    (StatusCode::OK, Json(body))
}

pub(crate) fn fail(error: impl Into<String>) -> ApiResponse {
    (StatusCode::OK, Json(json!({ "ok": false, "error": error.into() })))
}

/// Map a domain error onto the failure envelope, flagging retryable ones.
pub(crate) fn fail_with(err: &CallRunError) -> ApiResponse {
    let mut body = json!({ "ok": false, "error": err.to_string() });
    if err.is_retryable() {
        body["retryable"] = Value::Bool(true);
    }
    (StatusCode::OK, Json(body))
}

// ── Re-exports ──────────────────────────────────────────────────

pub use control::control;
pub use health::health;
