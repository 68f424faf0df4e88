use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::{info, warn};

use occam_core::message::Message;

/// Config entries are `<room id>_<auth token>`; tokens may themselves
/// contain underscores, so split on the first one only.
fn room_and_token(entry: &str) -> Option<(&str, &str)> {
    entry.split_once('_')
}

fn build_notification(message: &Message) -> Value {
    json!({
        "message": format!("<b>Occam Alert</b><br>{}", Value::Object(message.clone())),
        "message_format": "html",
    })
}

pub(super) async fn send(
    http: &reqwest::Client,
    rooms: &HashMap<String, String>,
    message: &Message,
    room: &str,
) {
    let Some(entry) = rooms.get(room) else {
        warn!(room, "unknown hipchat room alias, dropping alert");
        return;
    };
    let Some((room_id, token)) = room_and_token(entry) else {
        warn!(room, "malformed hipchat room entry, expected <room>_<token>");
        return;
    };

    let url = format!("https://api.hipchat.com/v2/room/{room_id}/notification");
    let notification = build_notification(message);
    match http
        .post(&url)
        .query(&[("auth_token", token)])
        .json(&notification)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => info!("message sent to hipchat"),
        Ok(resp) => warn!(status = %resp.status(), "error sending to hipchat"),
        Err(err) => warn!(error = %err, "error sending to hipchat"),
    }
}
