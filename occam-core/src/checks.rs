//! The compiled check entrypoint and the primitives it runs against.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::alerts::{Alert, AlertSender};
use crate::error::Result;
use crate::message::{Message, field_string};
use crate::rate::{Fingerprint, RateRegistry};

/// A compiled rule program. The runtime invokes `run` once per message that
/// survives decoding and suppression; an error aborts evaluation of that
/// message only.
#[async_trait]
pub trait Ruleset: Send + Sync {
    async fn run(&self, ctx: &CheckContext, msg: &Message) -> Result<()>;
}

/// Everything a check can reach: the shared rate registry and the alert
/// queue. Field matching is stateless, see [`crate::matchers`].
#[derive(Clone)]
pub struct CheckContext {
    rates: RateRegistry,
    alerts: AlertSender,
}

impl fmt::Debug for CheckContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckContext")
            .field("rates", &self.rates)
            .finish()
    }
}

impl CheckContext {
    pub fn new(rates: RateRegistry, alerts: AlertSender) -> Self {
        Self { rates, alerts }
    }

    /// True when `threshold` arrivals hit this call-site within `window`.
    /// State is shared across workers and keyed by the call-site, so the
    /// same check counts globally and distinct checks never interfere.
    #[track_caller]
    pub fn rate(
        &self,
        threshold: u64,
        window: Duration,
    ) -> impl Future<Output = Result<bool>> + Send + '_ {
        let fingerprint = Fingerprint::from_call_site();
        async move { self.rates.check(&fingerprint, threshold, window).await }
    }

    /// Like [`rate`](Self::rate) but with a separate window per value of
    /// `field`, e.g. one window per user.
    #[track_caller]
    pub fn rate_keyed<'a>(
        &'a self,
        msg: &Message,
        field: &str,
        threshold: u64,
        window: Duration,
    ) -> impl Future<Output = Result<bool>> + Send + 'a {
        let fingerprint = Fingerprint::from_call_site().keyed(&field_string(msg, field));
        async move { self.rates.check(&fingerprint, threshold, window).await }
    }

    pub fn emit_console(&self, msg: &Message) {
        self.alerts.push(Alert::Console {
            message: msg.clone(),
        });
    }

    pub fn emit_chat(&self, msg: &Message, room: &str) {
        self.alerts.push(Alert::Chat {
            message: msg.clone(),
            room: room.to_string(),
        });
    }

    pub fn emit_incident(&self, msg: &Message, service: &str, incident_key: Option<&str>) {
        self.alerts.push(Alert::Incident {
            message: msg.clone(),
            service: service.to_string(),
            incident_key: incident_key.map(str::to_string),
        });
    }
}
