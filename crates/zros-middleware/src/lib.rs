//! `zros-middleware` – the bridge between a ZeroMQ PUB/SUB bus and ROS.
//!
//! Routes numeric samples from one inbound subscription to one outbound
//! topic without caring which side produced them.
//!
//! # Modules
//!
//! - [`bridge`] – The receive → decode → filter → convert → publish loop.
//! - [`inbound`] – The [`InboundSource`] seam and its ZeroMQ SUB
//!   implementation.
//! - [`outbound`] – The [`Float64Publisher`] seam and the in-process
//!   [`EventBus`] publisher.
//! - [`rosbridge`] – Publisher that speaks the rosbridge v2 JSON protocol
//!   over a WebSocket.
//! - [`bus`] – Headless, topic-based publish/subscribe bus built on Tokio
//!   broadcast channels.

pub mod bridge;
pub mod bus;
pub mod inbound;
pub mod outbound;
pub mod rosbridge;

pub use bridge::{Bridge, BridgeSettings, BridgeStats};
pub use bus::{EventBus, TopicReceiver};
pub use inbound::{InboundSource, SubscriberSettings, ZmqSubscriber};
pub use outbound::{BusPublisher, Float64Publisher};
pub use rosbridge::RosbridgePublisher;
