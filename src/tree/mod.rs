//! Hierarchical topic trie with tick-batched fan-out.
//!
//! `subscribe` lazily inserts a path of segment nodes and registers the
//! subscriber at the leaf. `publish` walks the trie from the root, buffering
//! the message into every matching node under a monotonically increasing
//! message id and marking newly matched nodes as triggered. `drain` then
//! emits one coalesced payload per subscriber and returns the trie to its
//! quiescent state. Wildcard children (`+`, `#`) live in the ordinary child
//! map but are additionally aliased on their parent for O(1) access while
//! routing.

pub(crate) mod arena;
mod drain;

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use crate::config::TreeConfig;
use crate::delivery::DeliverySink;
use crate::metrics::TreeMetrics;
use crate::subscriber::{SubscriberId, SubscriberRecord};
use crate::topic::{self, TopicError};
use arena::{NodeArena, NodeId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error(transparent)]
    InvalidFilter(#[from] TopicError),
    #[error("unknown subscriber {0}")]
    UnknownSubscriber(SubscriberId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    InvalidTopic(#[from] TopicError),
    #[error("tick already holds {0} triggered topics; drain before publishing further")]
    TriggeredCapacity(usize),
}

/// Topic trie plus the per-tick routing state shared by `publish` and
/// `drain`.
///
/// Single-threaded by contract: the owning execution context serializes
/// every call, and no operation suspends mid-flight.
pub struct TopicTree<S> {
    config: TreeConfig,
    arena: NodeArena,
    subscribers: HashMap<SubscriberId, SubscriberRecord>,
    next_subscriber: u64,
    next_message_id: u64,
    /// Topics holding buffered messages for the current tick, in trigger
    /// order. Bounded by `config.max_triggered_topics`.
    triggered: Vec<NodeId>,
    sink: S,
    metrics: TreeMetrics,
}

impl<S: DeliverySink> TopicTree<S> {
    /// Build a tree with the default configuration.
    pub fn new(sink: S) -> Self {
        let config = TreeConfig::default();
        Self {
            arena: NodeArena::with_capacity(config.initial_node_capacity),
            subscribers: HashMap::new(),
            next_subscriber: 0,
            next_message_id: 0,
            triggered: Vec::with_capacity(config.max_triggered_topics),
            sink,
            metrics: TreeMetrics::new(),
            config,
        }
    }

    /// Build a tree with an explicit configuration.
    pub fn with_config(config: TreeConfig, sink: S) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        Ok(Self {
            arena: NodeArena::with_capacity(config.initial_node_capacity),
            subscribers: HashMap::new(),
            next_subscriber: 0,
            next_message_id: 0,
            triggered: Vec::with_capacity(config.max_triggered_topics),
            sink,
            metrics: TreeMetrics::new(),
            config,
        })
    }

    /// Allocate a fresh subscriber identity. Ids are never reused.
    pub fn register_subscriber(&mut self) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.insert(id, SubscriberRecord::default());
        self.metrics.subscribers.inc();
        tracing::debug!(subscriber = %id, "registered subscriber");
        id
    }

    /// Register `id` at the leaf of `filter`, creating the path as needed.
    ///
    /// Subscribing twice to the same filter is idempotent at the set level;
    /// the teardown list tolerates the duplicate entry.
    pub fn subscribe(&mut self, filter: &str, id: SubscriberId) -> Result<(), SubscribeError> {
        if !self.subscribers.contains_key(&id) {
            return Err(SubscribeError::UnknownSubscriber(id));
        }
        topic::validate_filter(filter)?;

        let mut current = NodeId::ROOT;
        for segment in topic::segments(filter) {
            let existing = self.arena.node(current).children.get(segment).copied();
            current = match existing {
                Some(child) => child,
                None => {
                    let child = self.arena.alloc(segment.to_string(), current);
                    let parent = self.arena.node_mut(current);
                    parent.children.insert(segment.to_string(), child);
                    if topic::is_single_wildcard(segment) {
                        parent.wildcard_child = Some(child);
                    } else if topic::is_terminating_wildcard(segment) {
                        parent.terminating_wildcard_child = Some(child);
                    }
                    self.metrics.live_nodes.inc();
                    child
                }
            };
        }

        self.arena.node_mut(current).subscribers.insert(id);
        if let Some(record) = self.subscribers.get_mut(&id) {
            record.leaves.push(current);
        }
        tracing::debug!(filter = %filter, subscriber = %id, "subscribed");
        Ok(())
    }

    /// Remove `id` from the leaf of `filter` and trim the emptied path.
    ///
    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, filter: &str, id: SubscriberId) -> bool {
        let mut current = NodeId::ROOT;
        for segment in topic::segments(filter) {
            match self.arena.node(current).children.get(segment).copied() {
                Some(child) => current = child,
                None => return false,
            }
        }

        if !self.arena.node_mut(current).subscribers.remove(&id) {
            return false;
        }
        if let Some(record) = self.subscribers.get_mut(&id) {
            // Drop every duplicate entry so no stale leaf survives a trim.
            record.leaves.retain(|&leaf| leaf != current);
        }
        self.trim(current);
        tracing::debug!(filter = %filter, subscriber = %id, "unsubscribed");
        true
    }

    /// Detach `id` from every subscription leaf and forget it. Unknown ids
    /// are a no-op.
    pub fn unsubscribe_all(&mut self, id: SubscriberId) {
        let Some(record) = self.subscribers.remove(&id) else {
            return;
        };
        let mut leaves = record.leaves;
        // Duplicates collapse here so each leaf is trimmed at most once.
        leaves.sort_unstable();
        leaves.dedup();
        let count = leaves.len();
        for leaf in leaves {
            self.arena.node_mut(leaf).subscribers.remove(&id);
            self.trim(leaf);
        }
        self.metrics.subscribers.dec();
        tracing::debug!(subscriber = %id, leaves = count, "unsubscribed from all topics");
    }

    /// Buffer `message` at every node matching `topic` and mark those nodes
    /// triggered for the next drain.
    ///
    /// Rejects wildcard segments in the topic and refuses to trigger more
    /// than the configured number of distinct topics per tick. A capacity
    /// rejection can land mid-walk, after the message already reached the
    /// topics matched earlier; the tick stays consistent and drainable.
    pub fn publish(&mut self, topic: &str, message: impl Into<Bytes>) -> Result<(), PublishError> {
        topic::validate_publish_topic(topic)?;
        let message: Bytes = message.into();
        let segs: Vec<&str> = topic::segments(topic).collect();
        let routed = self.route(NodeId::ROOT, &segs, &message);
        // The id is consumed even when routing fails mid-walk: topics
        // matched before the failure already buffered under it.
        self.next_message_id += 1;
        routed?;
        self.metrics.publishes.inc();
        tracing::trace!(
            topic = %topic,
            bytes = message.len(),
            triggered = self.triggered.len(),
            "published"
        );
        Ok(())
    }

    /// Recursive routing walk. A terminating wildcard child matches at every
    /// node arrival, including the final one, so `a/#` also covers a publish
    /// to `a`; a `+` child consumes exactly one segment; exact children
    /// continue the walk; when the topic is consumed the current node itself
    /// matches.
    fn route(&mut self, node: NodeId, remaining: &[&str], message: &Bytes) -> Result<(), PublishError> {
        if let Some(tw) = self.arena.node(node).terminating_wildcard_child {
            self.record(tw, message)?;
        }
        let Some((segment, rest)) = remaining.split_first() else {
            return self.record(node, message);
        };
        if let Some(wildcard) = self.arena.node(node).wildcard_child {
            self.route(wildcard, rest, message)?;
        }
        if let Some(child) = self.arena.node(node).children.get(*segment).copied() {
            self.route(child, rest, message)?;
        }
        Ok(())
    }

    fn record(&mut self, node: NodeId, message: &Bytes) -> Result<(), PublishError> {
        if !self.arena.node(node).triggered {
            if self.triggered.len() >= self.config.max_triggered_topics {
                return Err(PublishError::TriggeredCapacity(self.config.max_triggered_topics));
            }
            self.triggered.push(node);
            self.arena.node_mut(node).triggered = true;
        }
        self.arena
            .node_mut(node)
            .messages
            .insert(self.next_message_id, message.clone());
        self.metrics.messages_buffered.inc();
        Ok(())
    }

    /// Prune empty nodes from `node` toward the root. A node survives while
    /// it has subscribers, children, wildcard aliases, or buffered tick
    /// state; the root always survives.
    fn trim(&mut self, node: NodeId) {
        let mut current = node;
        while current != NodeId::ROOT {
            if !self.arena.node(current).is_prunable() {
                break;
            }
            let Some(parent) = self.arena.node(current).parent else {
                break;
            };
            let name = self.arena.node(current).name.clone();
            let parent_node = self.arena.node_mut(parent);
            if topic::is_single_wildcard(&name) {
                parent_node.wildcard_child = None;
            } else if topic::is_terminating_wildcard(&name) {
                parent_node.terminating_wildcard_child = None;
            }
            parent_node.children.remove(&name);
            self.arena.free(current);
            self.metrics.nodes_trimmed.inc();
            self.metrics.live_nodes.dec();
            current = parent;
        }
    }

    /// Live topic nodes, root excluded.
    pub fn topic_count(&self) -> usize {
        self.arena.live_count() - 1
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Distinct topics triggered in the current tick.
    pub fn triggered_count(&self) -> usize {
        self.triggered.len()
    }

    pub fn metrics(&self) -> &TreeMetrics {
        &self.metrics
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::NoopSink;

    fn tree() -> TopicTree<NoopSink> {
        TopicTree::new(NoopSink)
    }

    #[test]
    fn test_subscribe_builds_path() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("news/sports/football", s).unwrap();
        assert_eq!(t.topic_count(), 3);
    }

    #[test]
    fn test_shared_prefix_is_not_duplicated() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("news/sports", s).unwrap();
        t.subscribe("news/politics", s).unwrap();
        assert_eq!(t.topic_count(), 3);
    }

    #[test]
    fn test_wildcard_aliases_installed() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a/+/c", s).unwrap();
        t.subscribe("a/#", s).unwrap();

        let a = *t.arena.node(NodeId::ROOT).children.get("a").unwrap();
        let plus = *t.arena.node(a).children.get("+").unwrap();
        let hash = *t.arena.node(a).children.get("#").unwrap();
        assert_eq!(t.arena.node(a).wildcard_child, Some(plus));
        assert_eq!(t.arena.node(a).terminating_wildcard_child, Some(hash));
    }

    #[test]
    fn test_subscribe_same_filter_twice_is_set_idempotent() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a/b", s).unwrap();
        t.subscribe("a/b", s).unwrap();
        let a = *t.arena.node(NodeId::ROOT).children.get("a").unwrap();
        let b = *t.arena.node(a).children.get("b").unwrap();
        assert_eq!(t.arena.node(b).subscribers.len(), 1);
        // Teardown still works through the duplicate leaf entries.
        t.unsubscribe_all(s);
        assert_eq!(t.topic_count(), 0);
    }

    #[test]
    fn test_subscribe_rejects_interior_hash() {
        let mut t = tree();
        let s = t.register_subscriber();
        assert_eq!(
            t.subscribe("a/#/b", s),
            Err(SubscribeError::InvalidFilter(
                TopicError::TerminatingWildcardNotLast
            ))
        );
        assert_eq!(t.topic_count(), 0);
    }

    #[test]
    fn test_subscribe_unknown_subscriber() {
        let mut t = tree();
        assert_eq!(
            t.subscribe("a", SubscriberId(99)),
            Err(SubscribeError::UnknownSubscriber(SubscriberId(99)))
        );
    }

    #[test]
    fn test_unsubscribe_all_prunes_to_root() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a/b/c", s).unwrap();
        t.subscribe("a/+", s).unwrap();
        t.unsubscribe_all(s);
        assert_eq!(t.topic_count(), 0);
        assert_eq!(t.subscriber_count(), 0);
        assert!(t.arena.node(NodeId::ROOT).children.is_empty());
        assert!(t.arena.node(NodeId::ROOT).wildcard_child.is_none());
    }

    #[test]
    fn test_unsubscribe_all_unknown_id_is_noop() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a", s).unwrap();
        t.unsubscribe_all(SubscriberId(42));
        assert_eq!(t.topic_count(), 1);
    }

    #[test]
    fn test_trim_stops_at_shared_ancestor() {
        let mut t = tree();
        let s1 = t.register_subscriber();
        let s2 = t.register_subscriber();
        t.subscribe("a/b/c", s1).unwrap();
        t.subscribe("a/b", s2).unwrap();
        t.unsubscribe_all(s1);
        // `a/b` keeps its subscriber, so only `c` goes away.
        assert_eq!(t.topic_count(), 2);
    }

    #[test]
    fn test_per_topic_unsubscribe() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a/b", s).unwrap();
        t.subscribe("a/c", s).unwrap();
        assert!(t.unsubscribe("a/b", s));
        assert!(!t.unsubscribe("a/b", s));
        assert!(!t.unsubscribe("missing/path", s));
        assert_eq!(t.topic_count(), 2);
        t.unsubscribe_all(s);
        assert_eq!(t.topic_count(), 0);
    }

    #[test]
    fn test_publish_rejects_wildcards() {
        let mut t = tree();
        assert!(matches!(
            t.publish("a/+/c", Bytes::from_static(b"m")),
            Err(PublishError::InvalidTopic(_))
        ));
        assert!(matches!(
            t.publish("a/#", Bytes::from_static(b"m")),
            Err(PublishError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_publish_buffers_at_all_matches() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a/b", s).unwrap();
        t.subscribe("a/+", s).unwrap();
        t.subscribe("a/#", s).unwrap();
        t.publish("a/b", Bytes::from_static(b"m")).unwrap();
        assert_eq!(t.triggered_count(), 3);
        assert_eq!(t.metrics().messages_buffered.get(), 3);
    }

    #[test]
    fn test_publish_without_match_reaches_no_subscriber_topics() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a/b", s).unwrap();
        t.publish("x/y", Bytes::from_static(b"m")).unwrap();
        assert_eq!(t.triggered_count(), 0);
    }

    #[test]
    fn test_message_id_increments_per_publish() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a", s).unwrap();
        t.publish("a", Bytes::from_static(b"1")).unwrap();
        t.publish("nomatch", Bytes::from_static(b"2")).unwrap();
        t.publish("a", Bytes::from_static(b"3")).unwrap();
        let a = *t.arena.node(NodeId::ROOT).children.get("a").unwrap();
        let ids: Vec<u64> = t.arena.node(a).messages.keys().copied().collect();
        // The unmatched publish still consumed id 1.
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_trigger_capacity_is_enforced() {
        let config = TreeConfig {
            max_triggered_topics: 2,
            ..TreeConfig::default()
        };
        let mut t = TopicTree::with_config(config, NoopSink).unwrap();
        let s = t.register_subscriber();
        t.subscribe("a", s).unwrap();
        t.subscribe("b", s).unwrap();
        t.subscribe("c", s).unwrap();
        t.publish("a", Bytes::from_static(b"1")).unwrap();
        t.publish("b", Bytes::from_static(b"2")).unwrap();
        assert_eq!(
            t.publish("c", Bytes::from_static(b"3")),
            Err(PublishError::TriggeredCapacity(2))
        );
        // Re-publishing into already-triggered topics still works.
        t.publish("a", Bytes::from_static(b"4")).unwrap();
        t.drain();
        t.publish("c", Bytes::from_static(b"5")).unwrap();
        assert_eq!(t.triggered_count(), 1);
    }

    #[test]
    fn test_triggered_leaf_survives_unsubscribe_until_drain() {
        let mut t = tree();
        let s = t.register_subscriber();
        t.subscribe("a/b", s).unwrap();
        t.publish("a/b", Bytes::from_static(b"m")).unwrap();
        t.unsubscribe_all(s);
        // Buffered tick state pins the path until the drain sweeps it.
        assert_eq!(t.topic_count(), 2);
        t.drain();
        assert_eq!(t.topic_count(), 0);
    }
}
