//! Control API: status, and outage scheduling/cancellation. Unauthenticated
//! by design; bind it to an operator network.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use occam_core::kv::KvStore;
use occam_core::suppression;

#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn KvStore>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl ApiState {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(status).post(schedule).delete(cancel))
        .fallback(invalid)
        .with_state(state)
}

async fn status(State(state): State<ApiState>) -> Response {
    match suppression::load_snapshot(state.store.as_ref()).await {
        Ok(snapshot) => {
            let outages = if snapshot.is_empty() {
                json!("None")
            } else {
                json!(snapshot)
            };
            Json(json!({
                "Occam Start Time": state.started_at.to_rfc3339(),
                "Current Outages Scheduled": outages,
            }))
            .into_response()
        }
        Err(err) => {
            warn!(error = %err, "failed to load outage snapshot");
            (StatusCode::INTERNAL_SERVER_ERROR, "Request Error: status").into_response()
        }
    }
}

async fn schedule(State(state): State<ApiState>, body: String) -> (StatusCode, String) {
    let Some((field, value, hours)) = parse_schedule(&body) else {
        return (StatusCode::BAD_REQUEST, format!("Request Error: {body}"));
    };
    match suppression::schedule_outage(state.store.as_ref(), &field, &value, hours).await {
        Ok(()) => {
            info!(field = %field, value = %value, hours, "outage scheduled");
            (StatusCode::OK, format!("Request Received - POST: {body}"))
        }
        Err(err) => {
            warn!(error = %err, "failed to schedule outage");
            (StatusCode::BAD_REQUEST, format!("Request Error: {body}"))
        }
    }
}

async fn cancel(State(state): State<ApiState>, body: String) -> (StatusCode, String) {
    let Some((field, value)) = parse_cancel(&body) else {
        return (StatusCode::BAD_REQUEST, format!("Request Error: {body}"));
    };
    match suppression::cancel_outage(state.store.as_ref(), &field, &value).await {
        Ok(()) => {
            info!(field = %field, value = %value, "outage cancelled");
            (StatusCode::OK, format!("Request Received - DELETE: {body}"))
        }
        Err(err) => {
            warn!(error = %err, "failed to cancel outage");
            (StatusCode::BAD_REQUEST, format!("Request Error: {body}"))
        }
    }
}

async fn invalid() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "Request Invalid")
}

/// Bodies look like `{"outage": "field:value:hours"}`.
fn outage_parts(body: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let entry = value.get("outage")?.as_str()?;
    Some(entry.split(':').map(str::to_owned).collect())
}

fn parse_schedule(body: &str) -> Option<(String, String, u64)> {
    match outage_parts(body)?.as_slice() {
        [field, value, hours] => Some((field.clone(), value.clone(), hours.parse().ok()?)),
        _ => None,
    }
}

fn parse_cancel(body: &str) -> Option<(String, String)> {
    match outage_parts(body)?.as_slice() {
        [field, value] => Some((field.clone(), value.clone())),
        _ => None,
    }
}
