//! Tick drain: one coalesced delivery per subscriber.
//!
//! The drain performs a simultaneous ordered walk over the subscriber sets
//! of every triggered topic. Each distinct subscriber is visited once, in
//! ascending id order, and receives the concatenation of the tick's
//! matching messages in publish order. Subscribers whose subscriptions
//! intersect the triggered topics in the same pattern share one serialized
//! payload through a bitmap-keyed cache.

use std::collections::btree_set;
use std::collections::{BTreeMap, HashMap};
use std::iter::Peekable;

use bytes::{Bytes, BytesMut};

use super::arena::{NodeArena, NodeId};
use super::TopicTree;
use crate::delivery::DeliverySink;
use crate::metrics::TreeMetrics;
use crate::subscriber::SubscriberId;

impl<S: DeliverySink> TopicTree<S> {
    /// Emit the tick's payloads and return the tree to its quiescent state.
    ///
    /// With nothing triggered this is a no-op. Afterwards no node is
    /// triggered, every per-topic buffer is empty, and nodes the tick left
    /// empty are pruned.
    pub fn drain(&mut self) {
        if self.triggered.is_empty() {
            return;
        }

        let TopicTree {
            arena,
            sink,
            metrics,
            triggered,
            config,
            ..
        } = self;

        if config.single_topic_fast_path && triggered.len() == 1 {
            // One triggered topic: every subscriber gets the same bytes, no
            // intersection bookkeeping needed.
            let node = arena.node(triggered[0]);
            let payload = concat_buffer(&node.messages);
            for &subscriber in &node.subscribers {
                sink.deliver(subscriber, &payload);
                metrics.deliveries.inc();
            }
        } else {
            merge_deliver(arena, triggered, sink, metrics);
        }

        let cleared = std::mem::take(&mut self.triggered);
        for &topic in &cleared {
            let node = self.arena.node_mut(topic);
            node.messages.clear();
            node.triggered = false;
        }
        self.metrics.drains.inc();
        // Clearing tick state may leave nodes empty; sweep them now. A trim
        // can cascade into a later entry of `cleared`, hence the liveness
        // check.
        for topic in cleared.iter().copied() {
            if self.arena.is_live(topic) {
                self.trim(topic);
            }
        }
        tracing::debug!(topics = cleared.len(), "drained tick");
    }
}

/// Multi-way merge keyed by subscriber order across all triggered topics.
fn merge_deliver<S: DeliverySink>(
    arena: &NodeArena,
    triggered: &[NodeId],
    sink: &mut S,
    metrics: &TreeMetrics,
) {
    let mut cursors: Vec<Peekable<btree_set::Iter<'_, SubscriberId>>> = triggered
        .iter()
        .map(|&topic| arena.node(topic).subscribers.iter().peekable())
        .collect();

    // Smallest subscriber across the live cursors; computed here rather
    // than carried over from publish so subscriptions dropped since then
    // cannot leave a stale floor.
    let mut remaining = 0usize;
    let mut min: Option<SubscriberId> = None;
    for cursor in &mut cursors {
        if let Some(&&head) = cursor.peek() {
            remaining += 1;
            min = Some(min.map_or(head, |m| m.min(head)));
        }
    }

    let mut cache: HashMap<u64, Bytes> = HashMap::new();

    while remaining > 0 {
        let Some(current) = min else { break };
        let mut intersection: u64 = 0;
        let mut next_min: Option<SubscriberId> = None;

        for (i, cursor) in cursors.iter_mut().enumerate() {
            if let Some(&&head) = cursor.peek() {
                if head == current {
                    intersection |= 1u64 << i;
                    cursor.next();
                    if cursor.peek().is_none() {
                        remaining -= 1;
                    }
                }
            }
            // Cursors not positioned at `current` still bound the next
            // round, so progress stays monotone.
            if let Some(&&head) = cursor.peek() {
                next_min = Some(next_min.map_or(head, |m| m.min(head)));
            }
        }

        let payload = match cache.get(&intersection) {
            Some(cached) => {
                metrics.cache_hits.inc();
                cached.clone()
            }
            None => {
                metrics.cache_misses.inc();
                let built = build_payload(arena, triggered, intersection);
                cache.insert(intersection, built.clone());
                built
            }
        };
        sink.deliver(current, &payload);
        metrics.deliveries.inc();

        min = next_min;
    }
}

/// Union the selected topics' buffers by message id and concatenate in id
/// order. The id keying collapses duplicates from overlapping matches and
/// preserves global publish order.
fn build_payload(arena: &NodeArena, triggered: &[NodeId], intersection: u64) -> Bytes {
    let mut merged: BTreeMap<u64, &Bytes> = BTreeMap::new();
    for (i, &topic) in triggered.iter().enumerate() {
        if intersection & (1u64 << i) != 0 {
            for (&id, payload) in &arena.node(topic).messages {
                merged.insert(id, payload);
            }
        }
    }
    let mut out = BytesMut::with_capacity(merged.values().map(|p| p.len()).sum());
    for payload in merged.values() {
        out.extend_from_slice(payload);
    }
    out.freeze()
}

fn concat_buffer(messages: &BTreeMap<u64, Bytes>) -> Bytes {
    let mut out = BytesMut::with_capacity(messages.values().map(|p| p.len()).sum());
    for payload in messages.values() {
        out.extend_from_slice(payload);
    }
    out.freeze()
}
