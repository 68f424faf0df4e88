//! Sliding-window rate primitive shared across workers through the
//! key/value store.

use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

use crate::error::Result;
use crate::kv::KvStore;

/// Stable identifier for one rate call-site, used as the sorted-set key.
///
/// The identity is bound lexically: file, line and column of the call-site
/// are hashed, so two rate checks on the same source line still get distinct
/// windows, and the same check maps to the same window in every worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[track_caller]
    pub fn from_call_site() -> Self {
        let loc = Location::caller();
        let mut hasher = Md5::new();
        hasher.update(loc.file().as_bytes());
        hasher.update(loc.line().to_string().as_bytes());
        hasher.update(loc.column().to_string().as_bytes());
        Self(format!("rate-{:x}", hasher.finalize()))
    }

    /// Extend the fingerprint with a per-message key so that one call-site
    /// tracks a separate window per key value.
    pub fn keyed(&self, key: &str) -> Self {
        Self(format!("{}-{key}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Window counters live in the store so every worker sees the same state.
#[derive(Clone)]
pub struct RateRegistry {
    store: Arc<dyn KvStore>,
    reset_on_trip: bool,
}

impl fmt::Debug for RateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateRegistry")
            .field("reset_on_trip", &self.reset_on_trip)
            .finish()
    }
}

impl RateRegistry {
    /// `reset_on_trip` deletes the window when the threshold is reached, so
    /// the check fires once per burst instead of continuously after
    /// crossing. Disable it to keep the window and fire on every arrival
    /// while the count stays at or above the threshold.
    pub fn new(store: Arc<dyn KvStore>, reset_on_trip: bool) -> Self {
        Self {
            store,
            reset_on_trip,
        }
    }

    /// Record an arrival and report whether `threshold` arrivals were seen
    /// within the last `window`.
    pub async fn check(
        &self,
        fingerprint: &Fingerprint,
        threshold: u64,
        window: Duration,
    ) -> Result<bool> {
        let now = unix_now();
        let key = fingerprint.as_str();

        // Trim before admitting so cardinality never drifts unbounded.
        self.store
            .zset_trim_by_score(key, now - window.as_secs_f64())
            .await?;
        self.store
            .zset_add(key, now, &format!("{now:.6}"))
            .await?;

        if self.store.zset_card(key).await? >= threshold {
            if self.reset_on_trip {
                self.store.delete(key).await?;
            }
            return Ok(true);
        }
        Ok(false)
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
