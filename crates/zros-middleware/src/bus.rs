//! Headless, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every sample without any single subscriber blocking
//! the others.
//!
//! Each named topic gets its own lane. The lane's capacity is fixed by
//! whoever creates it first: [`EventBus::advertise`] with an explicit depth,
//! or [`EventBus::subscribe_to`] with the bus default.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use zros_types::{BridgeError, Sample};

/// Default lane capacity (number of buffered samples before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

type Lanes = HashMap<String, broadcast::Sender<Sample>>;

/// Shared event bus. Clone it cheaply – all clones share the same lanes.
#[derive(Clone, Debug)]
pub struct EventBus {
    lanes: Arc<Mutex<Lanes>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus whose implicitly created lanes hold `capacity`
    /// samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, like [`broadcast::channel`].
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be non-zero");
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Register `topic` with a lane holding at most `depth` samples.
    ///
    /// Returns `false` if the lane already existed, in which case its
    /// original capacity is kept.
    pub fn advertise(&self, topic: &str, depth: usize) -> Result<bool, BridgeError> {
        if depth == 0 {
            return Err(BridgeError::Registration {
                topic: topic.to_string(),
                reason: "queue depth must be at least 1".to_string(),
            });
        }
        let mut lanes = self.lock();
        if lanes.contains_key(topic) {
            debug!(topic, "topic already advertised");
            return Ok(false);
        }
        let (sender, _) = broadcast::channel(depth);
        lanes.insert(topic.to_string(), sender);
        Ok(true)
    }

    /// Publish `sample` to the lane named by `sample.topic`.
    ///
    /// Returns the number of active receivers that were handed the sample.
    /// Returns `Ok(0)` when nobody is listening (this is a normal condition,
    /// not an error). Publishing to a topic that was never advertised or
    /// subscribed is an error.
    pub fn publish_to(&self, sample: Sample) -> Result<usize, BridgeError> {
        let lanes = self.lock();
        let Some(sender) = lanes.get(&sample.topic) else {
            return Err(BridgeError::Publish {
                topic: sample.topic,
                reason: "topic is not advertised".to_string(),
            });
        };
        Ok(sender.send(sample).unwrap_or(0))
    }

    /// Subscribe to a topic lane, creating it with the default capacity if
    /// needed.
    pub fn subscribe_to(&self, topic: &str) -> TopicReceiver {
        let mut lanes = self.lock();
        let receiver = lanes
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        TopicReceiver {
            topic: topic.to_string(),
            receiver,
        }
    }

    /// Drop the lane for `topic`. Existing receivers observe `Closed` once
    /// they drain what is buffered.
    pub fn unadvertise(&self, topic: &str) -> bool {
        self.lock().remove(topic).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        // A panic while holding the guard cannot leave the map half-updated.
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single topic lane.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<Sample>,
}

impl TopicReceiver {
    /// Wait for the next sample on this topic.
    ///
    /// Returns:
    /// * `Ok(sample)` – a successfully received sample.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` samples were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the lane was removed.
    pub async fn recv(&mut self) -> Result<Sample, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next sample, skipping over lag notifications.
    ///
    /// Returns `None` when the lane is closed and no further samples will
    /// arrive.
    pub async fn next(&mut self) -> Option<Sample> {
        loop {
            match self.receiver.recv().await {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicReceiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The topic this receiver is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
