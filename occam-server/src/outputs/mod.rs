//! Alert delivery: a small dispatcher pool drains the alert queue and routes
//! each envelope to its sink, keeping slow HTTP calls off the evaluation
//! path. Delivery is best-effort; failures are logged and dropped.

mod hipchat;
mod pagerduty;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use occam_core::alerts::Alert;

pub(crate) struct Sinks {
    http: reqwest::Client,
    pagerduty: HashMap<String, String>,
    hipchat: HashMap<String, String>,
}

impl fmt::Debug for Sinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sinks")
            .field("pagerduty", &self.pagerduty.keys())
            .field("hipchat", &self.hipchat.keys())
            .finish()
    }
}

impl Sinks {
    pub(crate) fn new(
        pagerduty: HashMap<String, String>,
        hipchat: HashMap<String, String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            pagerduty,
            hipchat,
        }
    }

    async fn deliver(&self, alert: Alert) {
        match alert {
            Alert::Console { message } => {
                info!("Event Match: {}", serde_json::Value::Object(message));
            }
            Alert::Incident {
                message,
                service,
                incident_key,
            } => {
                pagerduty::send(
                    &self.http,
                    &self.pagerduty,
                    &message,
                    &service,
                    incident_key.as_deref(),
                )
                .await;
            }
            Alert::Chat { message, room } => {
                hipchat::send(&self.http, &self.hipchat, &message, &room).await;
            }
        }
    }
}

pub(crate) fn spawn_dispatchers(
    count: usize,
    alert_rx: async_channel::Receiver<Alert>,
    sinks: Arc<Sinks>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let alert_rx = alert_rx.clone();
            let sinks = sinks.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(dispatcher_loop(id, alert_rx, sinks, shutdown))
        })
        .collect()
}

async fn dispatcher_loop(
    id: usize,
    alert_rx: async_channel::Receiver<Alert>,
    sinks: Arc<Sinks>,
    shutdown: CancellationToken,
) {
    debug!(dispatcher = id, "alert dispatcher started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            alert = alert_rx.recv() => match alert {
                Ok(alert) => sinks.deliver(alert).await,
                Err(_) => break,
            }
        }
    }
    debug!(dispatcher = id, "alert dispatcher stopped");
}
