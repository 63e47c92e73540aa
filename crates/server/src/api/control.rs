//! `POST /api`: the action-dispatched control endpoint used by the dashboard.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use callrun_core::config::LAST_SENDABLE_RUN;
use callrun_core::lead::tabs;
use callrun_core::CallRunError;
use callrun_dispatch::{CooldownKind, SendRunRequest};
use callrun_results::count_leads;

use crate::state::AppState;

use super::{fail, fail_with, ok, ApiResponse};

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub action: String,
    /// Accepted as a number or a numeric string.
    #[serde(default)]
    pub run: Option<Value>,
    #[serde(default)]
    pub count: Option<Value>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub no_answer: Option<Value>,
    #[serde(default)]
    pub answered: Option<Value>,
}

fn lenient_u64(v: Option<&Value>) -> Option<u64> {
    match v? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub async fn control(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResponse {
    let req: ControlRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Unparsable control request");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": "INVALID_REQUEST_BODY" })),
            );
        }
    };

    let authorized = state
        .config
        .portal
        .client_token
        .as_deref()
        .is_some_and(|t| t == req.token);
    if !authorized {
        warn!(action = %req.action, "Control request rejected: bad token");
        return fail(CallRunError::Authorization.to_string());
    }

    match req.action.as_str() {
        "balance" => balance(&state).await,
        "send_run" => send_run(&state, &req).await,
        "cooldown_status" => cooldown_status(&state).await,
        "ingest" => ingest(&state).await,
        "portal_auth" => portal_auth(&state, &req),
        "counts" => counts(&state).await,
        "get_settings" => get_settings(&state).await,
        "config" => ok(json!({ "config": state.config.redacted_summary() })),
        "set_recall_days" => set_recall_days(&state, &req).await,
        "set_run_amount" => set_run_amount(&state, &req).await,
        other => {
            warn!(action = other, "Unknown control action");
            fail("UNKNOWN_ACTION")
        }
    }
}

// ── Actions ─────────────────────────────────────────────────────

async fn balance(state: &AppState) -> ApiResponse {
    match state.engine.ledger().balance().await {
        Ok(balance) => ok(json!({ "balance": balance })),
        Err(e) => fail_with(&e),
    }
}

async fn send_run(state: &AppState, req: &ControlRequest) -> ApiResponse {
    let run = match lenient_u64(req.run.as_ref()) {
        Some(n) if (1..=LAST_SENDABLE_RUN as u64).contains(&n) => n as u8,
        _ => return fail("Invalid run number."),
    };
    let limit = lenient_u64(req.count.as_ref()).map(|n| n as usize);

    let request = SendRunRequest {
        source_tab: tabs::OUTBOUND_LEADS.to_string(),
        run,
        limit,
        user: Some("portal".to_string()),
    };
    match state.engine.start_run(request).await {
        Ok(accepted) => {
            info!(run_id = %accepted.run_id, run, to_send = accepted.to_send, "Send run accepted");
            ok(json!({
                "message": accepted.message,
                "run_id": accepted.run_id,
                "run": accepted.run,
                "to_send": accepted.to_send,
                "balance": accepted.balance,
            }))
        }
        Err(e) => {
            warn!(run, error = %e, "Send run refused");
            fail_with(&e)
        }
    }
}

async fn cooldown_status(state: &AppState) -> ApiResponse {
    match state.cooldowns.status().await {
        Ok(s) => ok(json!({
            "send_seconds": s.send_remaining_secs,
            "ingest_seconds": s.ingest_remaining_secs,
        })),
        Err(e) => fail_with(&e),
    }
}

async fn ingest(state: &AppState) -> ApiResponse {
    match state.cooldowns.remaining_secs(CooldownKind::Ingest).await {
        Ok(0) => {}
        Ok(secs) => return fail(format!("Please wait {} min to ingest.", secs.div_ceil(60))),
        Err(e) => return fail_with(&e),
    }
    if let Err(e) = state.cooldowns.mark(CooldownKind::Ingest).await {
        return fail_with(&e);
    }

    match state.pipeline.run_cycle().await {
        Ok(report) => {
            let message = report.message.clone();
            ok(json!({ "message": message, "report": report }))
        }
        Err(e) => {
            warn!(error = %e, "Manual ingestion failed");
            fail(format!("Ingestion failed: {e}"))
        }
    }
}

fn portal_auth(state: &AppState, req: &ControlRequest) -> ApiResponse {
    let valid = match (&state.config.portal.portal_password, &req.password) {
        (Some(expected), Some(given)) => expected == given,
        _ => false,
    };
    (StatusCode::OK, Json(json!({ "ok": valid })))
}

async fn counts(state: &AppState) -> ApiResponse {
    let wb = &state.workbooks;
    match count_leads(wb.outbound.as_ref(), tabs::OUTBOUND_LEADS, wb.results.as_ref()).await {
        Ok(c) => ok(json!({ "runs": c.runs, "buckets": c.buckets })),
        Err(e) => fail_with(&e),
    }
}

async fn get_settings(state: &AppState) -> ApiResponse {
    let days = match state.pipeline.recall_days().await {
        Ok(d) => d,
        Err(e) => return fail_with(&e),
    };
    match state.engine.run_limit().await {
        Ok(limit) => ok(json!({ "recall_days": days, "run_amount": limit })),
        Err(e) => fail_with(&e),
    }
}

async fn set_recall_days(state: &AppState, req: &ControlRequest) -> ApiResponse {
    let parse = |v: Option<&Value>| lenient_u64(v).and_then(|n| u32::try_from(n).ok());
    let (Some(no_answer), Some(answered)) = (parse(req.no_answer.as_ref()), parse(req.answered.as_ref()))
    else {
        return fail("Invalid recall days.");
    };
    match state.pipeline.set_recall_days(no_answer, answered).await {
        Ok(days) => ok(json!({ "recall_days": days })),
        Err(e) => fail_with(&e),
    }
}

async fn set_run_amount(state: &AppState, req: &ControlRequest) -> ApiResponse {
    let Some(requested) = lenient_u64(req.count.as_ref()) else {
        return fail("Invalid run amount.");
    };
    match state.engine.set_run_limit(requested).await {
        Ok(limit) => ok(json!({ "value": limit })),
        Err(e) => fail_with(&e),
    }
}
