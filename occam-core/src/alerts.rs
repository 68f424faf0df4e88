//! Alert envelopes and the queue handle checks emit through.

use async_channel::TrySendError;
use tracing::warn;

use crate::message::Message;

/// A matched message on its way to a sink, tagged with the sink kind and
/// the sink-specific parameters the check supplied.
#[derive(Debug, Clone)]
pub enum Alert {
    Console {
        message: Message,
    },
    Chat {
        message: Message,
        room: String,
    },
    Incident {
        message: Message,
        service: String,
        incident_key: Option<String>,
    },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::Console { .. } => "console",
            Alert::Chat { .. } => "chat",
            Alert::Incident { .. } => "incident",
        }
    }
}

/// Create the alert queue. The sender half goes to the check context, the
/// receiver half to the dispatcher pool.
pub fn alert_channel(capacity: usize) -> (AlertSender, async_channel::Receiver<Alert>) {
    let (tx, rx) = async_channel::bounded(capacity);
    (AlertSender { tx }, rx)
}

/// Non-blocking handle onto the alert queue. Delivery is best-effort: a
/// full or closed queue drops the alert with a warning so the evaluation
/// path never stalls on a slow sink.
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: async_channel::Sender<Alert>,
}

impl AlertSender {
    pub fn push(&self, alert: Alert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(alert)) => {
                warn!(kind = alert.kind(), "alert queue full, dropping alert");
            }
            Err(TrySendError::Closed(alert)) => {
                warn!(kind = alert.kind(), "alert queue closed, dropping alert");
            }
        }
    }
}
