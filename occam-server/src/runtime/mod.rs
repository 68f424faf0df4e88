//! Lifecycle supervision: channel wiring, phased startup, graceful drain.

mod ingress;
mod stats;
mod worker;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use occam_core::alerts::alert_channel;
use occam_core::checks::{CheckContext, Ruleset};
use occam_core::kv::KvStore;
use occam_core::rate::RateRegistry;
use occam_core::suppression::{SuppressionIndex, SuppressionSnapshot};

use crate::api::{self, ApiState};
use crate::outputs::{self, Sinks};

use ingress::IngressPoller;

/// One poll's worth of raw messages, in arrival order.
pub type Batch = Vec<Vec<u8>>;

/// How long startup waits for the first suppression sync before proceeding
/// anyway.
const FIRST_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

const DRAIN_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub work_capacity: usize,
    pub dispatchers: usize,
    pub alert_capacity: usize,
    pub listen: String,
    pub port: u16,
    pub refresh_interval: Duration,
    pub stats_interval: Duration,
    pub empty_poll_sleep: Duration,
    pub retry: Duration,
    pub reset_on_trip: bool,
    pub pagerduty: HashMap<String, String>,
    pub hipchat: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            work_capacity: num_cpus::get() * 6,
            dispatchers: 3,
            alert_capacity: 1024,
            listen: "0.0.0.0".to_string(),
            port: 8080,
            refresh_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(5),
            empty_poll_sleep: Duration::from_secs(3),
            retry: Duration::from_secs(10),
            reset_on_trip: true,
            pagerduty: HashMap::new(),
            hipchat: HashMap::new(),
        }
    }
}

/// One worker on a single hardware thread, otherwise leave two threads for
/// the ingress/dispatch side but never run fewer than two workers.
pub fn default_worker_count() -> usize {
    let cpus = num_cpus::get();
    if cpus == 1 { 1 } else { (cpus - 1).max(2) }
}

/// Handle onto a running engine. Dropping it does not stop anything; call
/// [`Runtime::shutdown`] to drain and stop.
pub struct Runtime {
    ingress_stop: CancellationToken,
    drain: CancellationToken,
    services: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    dispatchers: Vec<JoinHandle<()>>,
    work_tx: async_channel::Sender<Batch>,
    suppression_rx: watch::Receiver<SuppressionSnapshot>,
    api_addr: SocketAddr,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .field("dispatchers", &self.dispatchers.len())
            .field("api_addr", &self.api_addr)
            .finish()
    }
}

impl Runtime {
    /// Bring the engine up: workers first, then the suppression refresher,
    /// dispatchers, stats and the control API; ingress starts last, gated
    /// on the first suppression sync so early messages are not evaluated
    /// against an empty ruleset.
    pub async fn start(
        cfg: RuntimeConfig,
        store: Arc<dyn KvStore>,
        checks: Arc<dyn Ruleset>,
    ) -> anyhow::Result<Runtime> {
        let (work_tx, work_rx) = async_channel::bounded(cfg.work_capacity);
        let (alerts, alert_rx) = alert_channel(cfg.alert_capacity);
        let (stats_tx, stats_rx) = mpsc::unbounded_channel();
        let (suppression_tx, suppression_rx) = watch::channel(SuppressionSnapshot::default());
        let (first_sync_tx, first_sync_rx) = oneshot::channel();

        let ingress_stop = CancellationToken::new();
        let drain = CancellationToken::new();
        let services = CancellationToken::new();

        let ctx = Arc::new(CheckContext::new(
            RateRegistry::new(store.clone(), cfg.reset_on_trip),
            alerts,
        ));

        let workers = worker::spawn_workers(
            cfg.workers,
            work_rx,
            suppression_rx.clone(),
            ctx,
            checks,
            drain.clone(),
        );

        let refresher = SuppressionIndex::new(
            store.clone(),
            cfg.refresh_interval,
            suppression_tx,
            first_sync_tx,
            services.clone(),
        );
        tokio::spawn(refresher.run());

        let sinks = Arc::new(Sinks::new(cfg.pagerduty, cfg.hipchat));
        let dispatchers =
            outputs::spawn_dispatchers(cfg.dispatchers, alert_rx, sinks, services.clone());

        tokio::spawn(stats::run(stats_rx, cfg.stats_interval, services.clone()));

        let listener = tokio::net::TcpListener::bind((cfg.listen.as_str(), cfg.port))
            .await
            .with_context(|| {
                format!("failed to bind control api on {}:{}", cfg.listen, cfg.port)
            })?;
        let api_addr = listener.local_addr().context("control api local addr")?;
        let router = api::router(ApiState::new(store.clone()));
        let api_shutdown = services.clone();
        tokio::spawn(async move {
            let shutdown = async move { api_shutdown.cancelled().await };
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %err, "control api server error");
            }
        });
        info!("control api listening on {api_addr}");

        match tokio::time::timeout(FIRST_SYNC_TIMEOUT, first_sync_rx).await {
            Ok(Ok(())) => debug!("initial suppression sync complete"),
            _ => warn!("timed out waiting for initial suppression sync"),
        }

        let poller = IngressPoller::new(
            store,
            work_tx.clone(),
            stats_tx,
            ingress_stop.clone(),
            cfg.empty_poll_sleep,
            cfg.retry,
        );
        tokio::spawn(poller.run());

        Ok(Runtime {
            ingress_stop,
            drain,
            services,
            workers,
            dispatchers,
            work_tx,
            suppression_rx,
            api_addr,
        })
    }

    /// Address the control API actually bound; with port 0 this carries the
    /// assigned port.
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    /// Observe the suppression snapshot feed the workers see.
    pub fn suppression(&self) -> watch::Receiver<SuppressionSnapshot> {
        self.suppression_rx.clone()
    }

    /// Stop accepting new batches, let the work channel drain, then stop
    /// the workers and the service tasks. Alerts still queued at that point
    /// are dropped.
    pub async fn shutdown(self) {
        info!("stopping ingress");
        self.ingress_stop.cancel();

        while !self.work_tx.is_empty() {
            info!("waiting for in-flight messages");
            tokio::time::sleep(DRAIN_POLL).await;
        }

        self.drain.cancel();
        for handle in self.workers {
            let _ = handle.await;
        }

        self.services.cancel();
        for handle in self.dispatchers {
            handle.abort();
        }
        info!("shutdown complete");
    }
}
