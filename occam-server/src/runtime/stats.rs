use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodic throughput reporter. Batch sizes arrive on the stats channel;
/// every interval the sum is divided by the *measured* window duration,
/// since scheduler jitter makes the nominal interval unreliable.
pub(crate) async fn run(
    mut rx: mpsc::UnboundedReceiver<usize>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick resolves immediately; consume it so the first window
    // is a full interval.
    ticker.tick().await;

    let mut count: usize = 0;
    let mut window_start = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(n) = rx.recv() => count += n,
            _ = ticker.tick() => {
                let elapsed = window_start.elapsed().as_secs_f64();
                if count > 0 && elapsed > 0.0 {
                    info!("{:.1} messages/sec", count as f64 / elapsed);
                }
                count = 0;
                window_start = Instant::now();
            }
        }
    }
    debug!("stats reporter stopped");
}
