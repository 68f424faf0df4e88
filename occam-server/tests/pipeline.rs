//! End-to-end: seeded shared log → ingress → workers → checks, with outage
//! scheduling over the control API and a graceful drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use occam_core::kv::{KvStore, MemoryStore};
use occam_core::prelude::*;
use occam_server::runtime::{Runtime, RuntimeConfig};

#[derive(Default)]
struct CountingChecks {
    runs: AtomicUsize,
    matches: AtomicUsize,
}

#[async_trait]
impl Ruleset for CountingChecks {
    async fn run(&self, ctx: &CheckContext, msg: &Message) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if match_eq(msg, "a", "x") {
            self.matches.fetch_add(1, Ordering::SeqCst);
            ctx.emit_console(msg);
        }
        Ok(())
    }
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        workers: 2,
        dispatchers: 1,
        listen: "127.0.0.1".to_string(),
        port: 0,
        refresh_interval: Duration::from_millis(20),
        empty_poll_sleep: Duration::from_millis(20),
        ..RuntimeConfig::default()
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn matches_flow_and_outages_suppress() {
    let store = Arc::new(MemoryStore::new());
    store.push_message("messages", br#"{"a": "x"}"#.to_vec());
    store.push_message("messages", br#"{"a": "y"}"#.to_vec());
    store.push_message("messages", b"{not json".to_vec());

    let checks = Arc::new(CountingChecks::default());
    let runtime = Runtime::start(
        test_config(),
        store.clone() as Arc<dyn KvStore>,
        checks.clone(),
    )
    .await
    .unwrap();

    // Two decodable messages, one match; the malformed one is skipped.
    wait_until("initial batch evaluation", || {
        checks.runs.load(Ordering::SeqCst) == 2 && checks.matches.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(store.list_len("messages"), 0);

    // Schedule an outage through the control API and wait for the
    // refresher to broadcast it to the workers.
    let addr = runtime.api_addr();
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/"))
        .body(r#"{"outage": "a:x:1"}"#)
        .send()
        .await
        .unwrap();
    assert!(
        response
            .text()
            .await
            .unwrap()
            .starts_with("Request Received - POST")
    );

    let mut suppression = runtime.suppression();
    suppression
        .wait_for(|snapshot| !snapshot.is_empty())
        .await
        .unwrap();

    // The suppressed message is dropped before the checks; the other one
    // still runs.
    store.push_message("messages", br#"{"a": "x"}"#.to_vec());
    store.push_message("messages", br#"{"a": "z"}"#.to_vec());
    wait_until("post-outage evaluation", || {
        checks.runs.load(Ordering::SeqCst) == 3
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(checks.runs.load(Ordering::SeqCst), 3);
    assert_eq!(checks.matches.load(Ordering::SeqCst), 1);

    // Cancelling the outage lets matching messages through again.
    client
        .delete(format!("http://{addr}/"))
        .body(r#"{"outage": "a:x"}"#)
        .send()
        .await
        .unwrap();
    suppression
        .wait_for(|snapshot| snapshot.is_empty())
        .await
        .unwrap();

    store.push_message("messages", br#"{"a": "x"}"#.to_vec());
    wait_until("post-cancel evaluation", || {
        checks.matches.load(Ordering::SeqCst) == 2
    })
    .await;
    assert_eq!(checks.runs.load(Ordering::SeqCst), 4);

    runtime.shutdown().await;
}

#[tokio::test]
async fn status_endpoint_reflects_scheduled_outages() {
    let store = Arc::new(MemoryStore::new());
    let checks = Arc::new(CountingChecks::default());
    let runtime = Runtime::start(
        test_config(),
        store.clone() as Arc<dyn KvStore>,
        checks,
    )
    .await
    .unwrap();

    let addr = runtime.api_addr();
    let client = reqwest::Client::new();

    let status: serde_json::Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["Current Outages Scheduled"], "None");

    client
        .post(format!("http://{addr}/"))
        .body(r#"{"outage": "host:web-1:2"}"#)
        .send()
        .await
        .unwrap();

    let status: serde_json::Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        status["Current Outages Scheduled"]["host"],
        serde_json::json!(["web-1"])
    );

    runtime.shutdown().await;
}
