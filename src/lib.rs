#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Numeric casts: intentional in routing code
#![allow(clippy::cast_possible_truncation)]
// Control flow style
#![allow(clippy::if_not_else)]
#![allow(clippy::single_match_else)]

//! fanout - Tick-batched publish/subscribe topic fan-out core.
//!
//! A hierarchical topic namespace (`/`-separated segments) with MQTT-style
//! single-segment (`+`) and terminating (`#`) wildcard subscriptions.
//! Publishes within a tick are buffered per matching topic under a global
//! message id; a drain then hands every subscriber exactly one coalesced
//! payload with duplicates suppressed across overlapping matches and global
//! publish order preserved. Subscribers that intersect the tick's triggered
//! topics in the same pattern share one serialized payload.
//!
//! The crate is a core meant to be embedded in a networking host: the host
//! owns the connections, maps [`SubscriberId`]s to them, and supplies the
//! [`DeliverySink`] the drain writes into. Everything is synchronous and
//! single-threaded by contract.
//!
//! # Module Organization
//!
//! - `topic` - Topic grammar, wildcard tokens, boundary validation
//! - `subscriber` - Stable ordered subscriber identity
//! - `tree` - Topic trie, publish routing, tick drain
//! - `delivery` - Sink seam toward the owning transport
//! - `config` - Engine tuning
//! - `metrics` - Counters and gauges for the host's telemetry

pub mod config;
pub mod delivery;
pub mod metrics;
pub mod subscriber;
pub mod topic;
pub mod tree;

// Re-exports for convenience
pub use config::{ConfigError, TreeConfig, MAX_TRIGGER_CAPACITY};
pub use delivery::{DeliverySink, NoopSink};
pub use metrics::{TreeMetrics, TreeMetricsSnapshot};
pub use subscriber::SubscriberId;
pub use topic::TopicError;
pub use tree::{PublishError, SubscribeError, TopicTree};
