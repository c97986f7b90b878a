//! Engine configuration.

use serde::Deserialize;
use thiserror::Error;

/// Widest intersection bitmap the drain engine can key its payload cache
/// with; the triggered-topic capacity may not exceed it.
pub const MAX_TRIGGER_CAPACITY: usize = 64;

fn default_max_triggered_topics() -> usize {
    MAX_TRIGGER_CAPACITY
}

fn default_single_topic_fast_path() -> bool {
    true
}

fn default_initial_node_capacity() -> usize {
    64
}

/// Tuning knobs for a [`TopicTree`](crate::TopicTree).
#[derive(Debug, Clone, Deserialize)]
pub struct TreeConfig {
    /// Distinct topics that may be triggered within one tick. Publishing
    /// beyond this without draining is rejected.
    #[serde(default = "default_max_triggered_topics")]
    pub max_triggered_topics: usize,
    /// Skip intersection bookkeeping when a tick triggered exactly one
    /// topic and deliver its concatenated buffer directly.
    #[serde(default = "default_single_topic_fast_path")]
    pub single_topic_fast_path: bool,
    /// Node slots to preallocate in the arena.
    #[serde(default = "default_initial_node_capacity")]
    pub initial_node_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_triggered_topics: default_max_triggered_topics(),
            single_topic_fast_path: default_single_topic_fast_path(),
            initial_node_capacity: default_initial_node_capacity(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_triggered_topics must be between 1 and {MAX_TRIGGER_CAPACITY}, got {0}")]
    TriggerCapacityOutOfRange(usize),
}

impl TreeConfig {
    /// The intersection bitmap is 64 bits wide, so the trigger capacity is
    /// bounded by [`MAX_TRIGGER_CAPACITY`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_triggered_topics == 0 || self.max_triggered_topics > MAX_TRIGGER_CAPACITY {
            return Err(ConfigError::TriggerCapacityOutOfRange(
                self.max_triggered_topics,
            ));
        }
        Ok(())
    }
}
