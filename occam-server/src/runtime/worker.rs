use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use occam_core::checks::{CheckContext, Ruleset};
use occam_core::message;
use occam_core::suppression::SuppressionSnapshot;

use super::Batch;

/// How long a worker waits on the work channel before looping back to poll
/// its suppression feed and the drain state.
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) fn spawn_workers(
    count: usize,
    work_rx: async_channel::Receiver<Batch>,
    suppression: watch::Receiver<SuppressionSnapshot>,
    ctx: Arc<CheckContext>,
    checks: Arc<dyn Ruleset>,
    drain: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let handles = (0..count)
        .map(|id| {
            let work_rx = work_rx.clone();
            let suppression = suppression.clone();
            let ctx = ctx.clone();
            let checks = checks.clone();
            let drain = drain.clone();
            tokio::spawn(worker_loop(id, work_rx, suppression, ctx, checks, drain))
        })
        .collect();
    info!("started {count} matcher workers");
    handles
}

async fn worker_loop(
    id: usize,
    work_rx: async_channel::Receiver<Batch>,
    mut suppression: watch::Receiver<SuppressionSnapshot>,
    ctx: Arc<CheckContext>,
    checks: Arc<dyn Ruleset>,
    drain: CancellationToken,
) {
    debug!(worker = id, "worker started");
    let mut snapshot = SuppressionSnapshot::default();

    loop {
        apply_suppression_update(id, &mut suppression, &mut snapshot);

        if drain.is_cancelled() {
            // Draining: finish whatever is still queued, then exit.
            while let Ok(batch) = work_rx.try_recv() {
                process_batch(id, &batch, &snapshot, &ctx, checks.as_ref()).await;
            }
            break;
        }

        tokio::select! {
            _ = drain.cancelled() => {}
            result = work_rx.recv() => match result {
                Ok(batch) => {
                    // Pick up a snapshot that landed while we were waiting,
                    // then evaluate the whole batch against it.
                    apply_suppression_update(id, &mut suppression, &mut snapshot);
                    process_batch(id, &batch, &snapshot, &ctx, checks.as_ref()).await;
                }
                Err(_) => break,
            },
            _ = tokio::time::sleep(RECV_TIMEOUT) => {}
        }
    }
    info!(worker = id, "worker stopped");
}

fn apply_suppression_update(
    id: usize,
    suppression: &mut watch::Receiver<SuppressionSnapshot>,
    snapshot: &mut SuppressionSnapshot,
) {
    if suppression.has_changed().unwrap_or(false) {
        *snapshot = suppression.borrow_and_update().clone();
        info!(
            worker = id,
            rules = snapshot.len(),
            "suppression snapshot updated"
        );
    }
}

async fn process_batch(
    id: usize,
    batch: &[Vec<u8>],
    snapshot: &SuppressionSnapshot,
    ctx: &CheckContext,
    checks: &dyn Ruleset,
) {
    for raw in batch {
        let msg = match message::decode(raw) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(worker = id, error = %err, "skipping undecodable message");
                continue;
            }
        };
        if snapshot.matches(&msg) {
            trace!(worker = id, "message suppressed");
            continue;
        }
        if let Err(err) = checks.run(ctx, &msg).await {
            error!(worker = id, error = %err, "check evaluation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use occam_core::alerts::alert_channel;
    use occam_core::kv::MemoryStore;
    use occam_core::matchers::match_eq;
    use occam_core::message::Message;
    use occam_core::prelude::Result;
    use occam_core::rate::RateRegistry;

    #[derive(Default)]
    struct RecordingChecks {
        runs: AtomicUsize,
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl Ruleset for RecordingChecks {
        async fn run(&self, ctx: &CheckContext, msg: &Message) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(serde_json::Value::String(n)) = msg.get("n") {
                self.seen.lock().push(n.clone());
                if self.fail_on.as_deref() == Some(n.as_str()) {
                    return Err(occam_core::OccamError::Internal("boom".to_string()));
                }
            }
            if match_eq(msg, "a", "x") {
                ctx.emit_console(msg);
            }
            Ok(())
        }
    }

    struct Harness {
        work_tx: async_channel::Sender<Batch>,
        suppression_tx: watch::Sender<SuppressionSnapshot>,
        alert_rx: async_channel::Receiver<occam_core::alerts::Alert>,
        drain: CancellationToken,
        handles: Vec<JoinHandle<()>>,
    }

    fn harness(checks: Arc<RecordingChecks>, workers: usize) -> Harness {
        let (work_tx, work_rx) = async_channel::bounded(16);
        let (suppression_tx, suppression_rx) = watch::channel(SuppressionSnapshot::default());
        let (alerts, alert_rx) = alert_channel(64);
        let ctx = Arc::new(CheckContext::new(
            RateRegistry::new(Arc::new(MemoryStore::new()), true),
            alerts,
        ));
        let drain = CancellationToken::new();
        let handles = spawn_workers(
            workers,
            work_rx,
            suppression_rx,
            ctx,
            checks,
            drain.clone(),
        );
        Harness {
            work_tx,
            suppression_tx,
            alert_rx,
            drain,
            handles,
        }
    }

    async fn shutdown(harness: Harness) {
        while !harness.work_tx.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        harness.drain.cancel();
        for handle in harness.handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn evaluates_each_message_once_in_batch_order() {
        let checks = Arc::new(RecordingChecks::default());
        let harness = harness(checks.clone(), 1);

        let batch: Batch = (0..5)
            .map(|i| format!("{{\"n\": \"{i}\", \"a\": \"x\"}}").into_bytes())
            .collect();
        harness.work_tx.send(batch).await.unwrap();

        shutdown(harness).await;
        assert_eq!(checks.runs.load(Ordering::SeqCst), 5);
        assert_eq!(*checks.seen.lock(), vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn undecodable_messages_are_skipped() {
        let checks = Arc::new(RecordingChecks::default());
        let harness = harness(checks.clone(), 1);

        let batch: Batch = vec![
            b"{not json".to_vec(),
            br#"{"a": "x"}"#.to_vec(),
            br#"[1, 2]"#.to_vec(),
        ];
        harness.work_tx.send(batch).await.unwrap();

        let alert = harness.alert_rx.recv().await.unwrap();
        assert_eq!(alert.kind(), "console");

        shutdown(harness).await;
        assert_eq!(checks.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn suppressed_messages_never_reach_the_checks() {
        let checks = Arc::new(RecordingChecks::default());
        let harness = harness(checks.clone(), 2);

        let mut snapshot = SuppressionSnapshot::default();
        snapshot.insert("a", "x");
        harness.suppression_tx.send(snapshot).unwrap();

        let batch: Batch = vec![
            br#"{"a": "x", "n": "suppressed"}"#.to_vec(),
            br#"{"a": "y", "n": "clean"}"#.to_vec(),
        ];
        harness.work_tx.send(batch).await.unwrap();

        let alert_rx = harness.alert_rx.clone();
        shutdown(harness).await;
        assert_eq!(checks.runs.load(Ordering::SeqCst), 1);
        assert_eq!(*checks.seen.lock(), vec!["clean"]);
        assert!(alert_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn a_failing_check_does_not_stop_the_batch() {
        let checks = Arc::new(RecordingChecks {
            fail_on: Some("1".to_string()),
            ..RecordingChecks::default()
        });
        let harness = harness(checks.clone(), 1);

        let batch: Batch = (0..3)
            .map(|i| format!("{{\"n\": \"{i}\"}}").into_bytes())
            .collect();
        harness.work_tx.send(batch).await.unwrap();

        shutdown(harness).await;
        assert_eq!(checks.runs.load(Ordering::SeqCst), 3);
        assert_eq!(*checks.seen.lock(), vec!["0", "1", "2"]);
    }
}
