//! Inbound side of the bridge.
//!
//! The bridge never talks to ZeroMQ directly; it pulls frames through the
//! [`InboundSource`] trait so the run loop can be driven by any transport
//! (and by scripted sources in tests).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};
use zeromq::{Socket, SocketRecv, SubSocket, ZmqError};
use zros_types::BridgeError;

/// Default bound on connecting and subscribing.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default silence after which the SUB socket is rebuilt.
pub const DEFAULT_IDLE_RESUBSCRIBE: Duration = Duration::from_secs(5);

/// A transport that delivers framed byte messages, one receive at a time.
///
/// # Contract
///
/// * `recv` suspends until the next message is available. A multipart
///   message is returned as its frames, in arrival order; each frame carries
///   its exact length.
/// * An `Err` is a transport-level failure of this one receive. Callers are
///   free to call `recv` again.
#[async_trait]
pub trait InboundSource: Send {
    /// Wait for the next message.
    async fn recv(&mut self) -> Result<Vec<Bytes>, BridgeError>;

    /// Human-readable description of where frames come from.
    fn describe(&self) -> String;
}

/// Connection knobs for [`ZmqSubscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberSettings {
    /// Upper bound on connecting to the endpoint and registering the
    /// subscription, both at startup and when the socket is rebuilt.
    pub connect_timeout: Duration,
    /// Silence after which the socket is torn down and connected again.
    /// Zero waits forever.
    pub idle_resubscribe: Duration,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_resubscribe: DEFAULT_IDLE_RESUBSCRIBE,
        }
    }
}

/// ZeroMQ SUB socket connected to a single publisher endpoint.
///
/// The `zeromq` SUB socket neither reconnects nor reports it when its
/// publisher goes away: `recv` just stays pending. Once nothing has arrived
/// for [`SubscriberSettings::idle_resubscribe`], the subscriber opens a fresh
/// socket to the same endpoint, so a restarted publisher is picked up again.
pub struct ZmqSubscriber {
    socket: SubSocket,
    endpoint: String,
    filter: String,
    settings: SubscriberSettings,
}

impl ZmqSubscriber {
    /// Connect to `endpoint` (e.g. `"tcp://localhost:4242"`) and subscribe
    /// to every message whose first frame starts with `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] if the endpoint cannot be reached
    /// within `settings.connect_timeout` or the subscription cannot be
    /// registered.
    pub async fn connect(
        endpoint: impl Into<String>,
        filter: impl Into<String>,
        settings: SubscriberSettings,
    ) -> Result<Self, BridgeError> {
        let endpoint = endpoint.into();
        let filter = filter.into();
        let socket = open(&endpoint, &filter, settings.connect_timeout).await?;

        info!(endpoint = %endpoint, filter = %filter, "zmq subscriber connected");
        Ok(Self {
            socket,
            endpoint,
            filter,
            settings,
        })
    }

    /// Replace the socket with a freshly connected one.  The old socket is
    /// only dropped once the new one is subscribed.
    async fn resubscribe(&mut self) -> Result<(), BridgeError> {
        let socket = open(&self.endpoint, &self.filter, self.settings.connect_timeout)
            .await
            .map_err(|e| BridgeError::Transport(format!("resubscribe failed: {e}")))?;
        self.socket = socket;
        Ok(())
    }
}

async fn open(
    endpoint: &str,
    filter: &str,
    connect_timeout: Duration,
) -> Result<SubSocket, BridgeError> {
    let mut socket = SubSocket::new();
    let handshake = async {
        socket.connect(endpoint).await?;
        socket.subscribe(filter).await?;
        Ok::<_, ZmqError>(())
    };
    let outcome = tokio::time::timeout(connect_timeout, handshake).await;

    let reason = match outcome {
        Ok(Ok(())) => return Ok(socket),
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("not reachable within {} ms", connect_timeout.as_millis()),
    };
    Err(BridgeError::Connection {
        endpoint: endpoint.to_string(),
        reason,
    })
}

#[async_trait]
impl InboundSource for ZmqSubscriber {
    async fn recv(&mut self) -> Result<Vec<Bytes>, BridgeError> {
        loop {
            let message = if self.settings.idle_resubscribe.is_zero() {
                self.socket.recv().await
            } else {
                let idle = self.settings.idle_resubscribe;
                let outcome = tokio::time::timeout(idle, self.socket.recv()).await;
                match outcome {
                    Ok(message) => message,
                    Err(_) => {
                        debug!(
                            endpoint = %self.endpoint,
                            idle_ms = idle.as_millis() as u64,
                            "no traffic; resubscribing"
                        );
                        self.resubscribe().await?;
                        continue;
                    }
                }
            };

            let frames = message
                .map_err(|e| BridgeError::Transport(e.to_string()))?
                .into_vec();
            debug!(frames = frames.len(), "zmq message received");
            return Ok(frames);
        }
    }

    fn describe(&self) -> String {
        format!("zmq+sub {} [{}]", self.endpoint, self.filter)
    }
}
