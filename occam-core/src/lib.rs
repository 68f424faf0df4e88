//! Core engine for occam, a stream event-matcher: the key/value store
//! adapter, the sliding-window rate registry, match primitives, outage
//! suppression, and the alert plumbing checks emit through.
//!
//! The runtime around this engine (ingress, workers, dispatchers, control
//! API) lives in `occam-server`.

pub mod alerts;
pub mod checks;
pub mod error;
pub mod kv;
pub mod matchers;
pub mod message;
pub mod rate;
pub mod suppression;

pub use error::{OccamError, Result};

/// Everything a check module needs.
pub mod prelude {
    pub use crate::alerts::Alert;
    pub use crate::checks::{CheckContext, Ruleset};
    pub use crate::error::{OccamError, Result};
    pub use crate::matchers::{match_eq, match_regex};
    pub use crate::message::{Message, decode};
}
