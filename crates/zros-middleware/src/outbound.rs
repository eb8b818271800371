//! Outbound side of the bridge.
//!
//! A [`Float64Publisher`] is a handle registered for exactly one named topic
//! on the destination messaging system.  Publishing is fire-and-forget: the
//! result only says whether the call itself went through.

use async_trait::async_trait;
use tracing::debug;
use zros_types::{BridgeError, Float64, Sample};

use crate::bus::EventBus;

/// Queue depth every outbound handle is registered with.  The bridge does not
/// buffer a backlog of its own beyond what the transport keeps.
pub const OUTBOUND_QUEUE_DEPTH: usize = 1;

/// Every outbound transport must implement this trait.
///
/// # Contract
///
/// * `publish` – hands one typed message to the transport.  No
///   acknowledgement, no retry.
///
/// * `close` – releases the registration.  Called exactly once when the
///   bridge stops; publishing after `close` is an error.
#[async_trait]
pub trait Float64Publisher: Send {
    /// The topic this handle publishes on.
    fn topic(&self) -> &str;

    /// Publish a single value.
    async fn publish(&mut self, msg: Float64) -> Result<(), BridgeError>;

    /// Release the outbound registration.
    async fn close(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Publisher onto a lane of the in-process [`EventBus`].
///
/// Lets components in the same process consume bridged values as
/// [`Sample`]s without going through an external ROS graph.
pub struct BusPublisher {
    bus: EventBus,
    topic: String,
    closed: bool,
}

impl BusPublisher {
    /// Advertise `topic` on `bus` with a lane of [`OUTBOUND_QUEUE_DEPTH`].
    pub fn register(bus: EventBus, topic: impl Into<String>) -> Result<Self, BridgeError> {
        let topic = topic.into();
        bus.advertise(&topic, OUTBOUND_QUEUE_DEPTH)?;
        Ok(Self {
            bus,
            topic,
            closed: false,
        })
    }
}

#[async_trait]
impl Float64Publisher for BusPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&mut self, msg: Float64) -> Result<(), BridgeError> {
        if self.closed {
            return Err(BridgeError::Publish {
                topic: self.topic.clone(),
                reason: "publisher is closed".to_string(),
            });
        }
        let receivers = self.bus.publish_to(Sample::new(self.topic.clone(), msg))?;
        debug!(topic = %self.topic, receivers, value = msg.data, "sample published on bus");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        if !self.closed {
            self.closed = true;
            self.bus.unadvertise(&self.topic);
        }
        Ok(())
    }
}
