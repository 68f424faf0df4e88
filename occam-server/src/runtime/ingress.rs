use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use occam_core::kv::KvStore;

use super::Batch;

/// List the external producer appends to.
pub(crate) const MESSAGES_KEY: &str = "messages";

/// Upper bound on one pipelined pop.
const BATCH_LIMIT: usize = 100;

/// Single task draining the shared log into the work channel. The push is
/// blocking, so a full channel halts polling and backpressure reaches the
/// external list.
pub(crate) struct IngressPoller {
    store: Arc<dyn KvStore>,
    work_tx: async_channel::Sender<Batch>,
    stats_tx: mpsc::UnboundedSender<usize>,
    stop: CancellationToken,
    empty_sleep: Duration,
    retry: Duration,
}

impl IngressPoller {
    pub(crate) fn new(
        store: Arc<dyn KvStore>,
        work_tx: async_channel::Sender<Batch>,
        stats_tx: mpsc::UnboundedSender<usize>,
        stop: CancellationToken,
        empty_sleep: Duration,
        retry: Duration,
    ) -> Self {
        Self {
            store,
            work_tx,
            stats_tx,
            stop,
            empty_sleep,
            retry,
        }
    }

    pub(crate) async fn run(self) {
        info!("ingress poller started");
        while !self.stop.is_cancelled() {
            match self.store.pop_batch(MESSAGES_KEY, BATCH_LIMIT).await {
                Ok(batch) if !batch.is_empty() => {
                    let _ = self.stats_tx.send(batch.len());
                    // The batch is already owned here; deliver it even if
                    // the channel makes us wait.
                    if self.work_tx.send(batch).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(self.empty_sleep) => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to poll shared log");
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = self.store.wait_ready(self.retry) => {}
                    }
                }
            }
        }
        info!("ingress poller stopped");
    }
}
