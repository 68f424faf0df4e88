use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::{info, warn};

use occam_core::message::Message;

const EVENTS_URL: &str = "https://events.pagerduty.com/generic/2010-04-15/create_event.json";

/// Generic-events trigger payload. The whole matched message rides along as
/// the incident details; an incident key, when given, also becomes the
/// description so repeated triggers dedupe into one incident.
fn build_event(message: &Message, service_key: &str, incident_key: Option<&str>) -> Value {
    json!({
        "event_type": "trigger",
        "service_key": service_key,
        "description": incident_key.unwrap_or("occam_alert"),
        "incident_key": incident_key.unwrap_or(""),
        "details": message,
    })
}

pub(super) async fn send(
    http: &reqwest::Client,
    services: &HashMap<String, String>,
    message: &Message,
    service: &str,
    incident_key: Option<&str>,
) {
    let Some(service_key) = services.get(service) else {
        warn!(service, "unknown pagerduty service alias, dropping alert");
        return;
    };

    let event = build_event(message, service_key, incident_key);
    match http.post(EVENTS_URL).json(&event).send().await {
        Ok(resp) if resp.status().is_success() => info!("message sent to pagerduty"),
        Ok(resp) => warn!(status = %resp.status(), "error sending to pagerduty"),
        Err(err) => warn!(error = %err, "error sending to pagerduty"),
    }
}
