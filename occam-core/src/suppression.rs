//! Outage suppression: TTL'd rules in the store, periodically folded into an
//! immutable snapshot and broadcast to the workers.
//!
//! A rule is stored twice: a string `"field:value"` at its id with the
//! outage TTL, and the id's membership in the `blacklist` set. The string is
//! the source of truth; set members whose string has expired are collected
//! lazily on the next snapshot load.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::kv::KvStore;
use crate::message::Message;

pub const BLACKLIST_KEY: &str = "blacklist";

/// Point-in-time view of the active suppression rules, keyed by field.
/// Workers replace their copy wholesale; there is no partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SuppressionSnapshot {
    rules: HashMap<String, HashSet<String>>,
}

impl SuppressionSnapshot {
    pub fn insert(&mut self, field: &str, value: &str) {
        self.rules
            .entry(field.to_string())
            .or_default()
            .insert(value.to_string());
    }

    /// A message is suppressed when any rule's field is present with a
    /// matching string value.
    pub fn matches(&self, msg: &Message) -> bool {
        self.rules.iter().any(|(field, values)| {
            matches!(msg.get(field), Some(Value::String(s)) if values.contains(s))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Total number of active rules across all fields.
    pub fn len(&self) -> usize {
        self.rules.values().map(HashSet::len).sum()
    }
}

/// Rule id as stored in the blacklist set: SHA1 over the `['field', 'value']`
/// rendering, hex encoded. Ids computed here line up with blacklists written
/// by earlier deployments.
pub fn outage_id(field: &str, value: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("['{field}', '{value}']").as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn schedule_outage(
    store: &dyn KvStore,
    field: &str,
    value: &str,
    hours: u64,
) -> Result<()> {
    let id = outage_id(field, value);
    store
        .set_ex(&id, hours * 3600, &format!("{field}:{value}"))
        .await?;
    store.set_add(BLACKLIST_KEY, &id).await?;
    Ok(())
}

/// Cancelling deletes only the TTL string; the set member is collected
/// lazily by the next snapshot load.
pub async fn cancel_outage(store: &dyn KvStore, field: &str, value: &str) -> Result<()> {
    store.delete(&outage_id(field, value)).await
}

/// Read the live rules out of the store, collecting dangling blacklist
/// members as a side effect. Used by the refresher and by the control API's
/// status endpoint.
pub async fn load_snapshot(store: &dyn KvStore) -> Result<SuppressionSnapshot> {
    let mut snapshot = SuppressionSnapshot::default();
    for id in store.set_members(BLACKLIST_KEY).await? {
        match store.get(&id).await? {
            Some(entry) => match entry.split_once(':') {
                Some((field, value)) => snapshot.insert(field, value),
                None => warn!(id = %id, entry = %entry, "malformed outage record, skipping"),
            },
            // Rule expired; drop the dangling set member.
            None => store.set_remove(BLACKLIST_KEY, &id).await?,
        }
    }
    Ok(snapshot)
}

/// Background refresher. Loads a snapshot on a fixed interval and publishes
/// it on the watch channel only when it differs from the last broadcast.
/// After the first completed load, changed or not, `first_sync` fires so the
/// supervisor can gate ingress start on it.
pub struct SuppressionIndex {
    store: Arc<dyn KvStore>,
    interval: Duration,
    updates: watch::Sender<SuppressionSnapshot>,
    first_sync: Option<oneshot::Sender<()>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for SuppressionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuppressionIndex")
            .field("interval", &self.interval)
            .field("synced", &self.first_sync.is_none())
            .finish()
    }
}

impl SuppressionIndex {
    pub fn new(
        store: Arc<dyn KvStore>,
        interval: Duration,
        updates: watch::Sender<SuppressionSnapshot>,
        first_sync: oneshot::Sender<()>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            interval,
            updates,
            first_sync: Some(first_sync),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.refresh().await,
            }
        }
        debug!("suppression refresher stopped");
    }

    async fn refresh(&mut self) {
        match load_snapshot(self.store.as_ref()).await {
            Ok(snapshot) => {
                if snapshot != *self.updates.borrow() {
                    info!(rules = snapshot.len(), "suppression ruleset changed");
                    let _ = self.updates.send(snapshot);
                }
                if let Some(tx) = self.first_sync.take() {
                    let _ = tx.send(());
                }
            }
            Err(err) => warn!(error = %err, "failed to refresh suppression rules"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::message::decode;

    #[test]
    fn ids_are_stable_and_distinct() {
        assert_eq!(outage_id("a", "x"), outage_id("a", "x"));
        assert_ne!(outage_id("a", "x"), outage_id("a", "y"));
        assert_ne!(outage_id("a", "x"), outage_id("b", "x"));
        assert_eq!(outage_id("a", "x").len(), 40);
    }

    #[test]
    fn snapshot_matches_on_field_and_value() {
        let mut snapshot = SuppressionSnapshot::default();
        snapshot.insert("host", "web-1");
        snapshot.insert("host", "web-2");
        snapshot.insert("env", "staging");

        let suppressed = decode(br#"{"host": "web-2", "msg": "down"}"#).unwrap();
        let clean = decode(br#"{"host": "web-3", "env": "prod"}"#).unwrap();
        let non_string = decode(br#"{"host": 1}"#).unwrap();

        assert!(snapshot.matches(&suppressed));
        assert!(!snapshot.matches(&clean));
        assert!(!snapshot.matches(&non_string));
        assert_eq!(snapshot.len(), 3);
    }

    #[tokio::test]
    async fn schedule_and_cancel_round_trip() {
        let store = MemoryStore::new();
        schedule_outage(&store, "a", "x", 1).await.unwrap();

        let snapshot = load_snapshot(&store).await.unwrap();
        let msg = decode(br#"{"a": "x"}"#).unwrap();
        assert!(snapshot.matches(&msg));

        cancel_outage(&store, "a", "x").await.unwrap();
        // The string is gone; the next load also collects the set member.
        let snapshot = load_snapshot(&store).await.unwrap();
        assert!(snapshot.is_empty());
        assert!(
            store
                .set_members(BLACKLIST_KEY)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn dangling_blacklist_members_are_collected() {
        let store = MemoryStore::new();
        store.set_add(BLACKLIST_KEY, "deadbeef").await.unwrap();

        let snapshot = load_snapshot(&store).await.unwrap();
        assert!(snapshot.is_empty());
        assert!(
            store
                .set_members(BLACKLIST_KEY)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn refresher_broadcasts_changes_and_signals_first_sync() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (tx, mut rx) = watch::channel(SuppressionSnapshot::default());
        let (sync_tx, sync_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();

        let index = SuppressionIndex::new(
            store.clone(),
            Duration::from_millis(20),
            tx,
            sync_tx,
            shutdown.clone(),
        );
        let handle = tokio::spawn(index.run());

        // First sync fires even though nothing changed.
        tokio::time::timeout(Duration::from_secs(1), sync_rx)
            .await
            .expect("first sync signal")
            .unwrap();

        schedule_outage(store.as_ref(), "a", "x", 1).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("snapshot broadcast")
            .unwrap();
        let msg = decode(br#"{"a": "x"}"#).unwrap();
        assert!(rx.borrow_and_update().matches(&msg));

        cancel_outage(store.as_ref(), "a", "x").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("empty snapshot broadcast")
            .unwrap();
        assert!(rx.borrow_and_update().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
