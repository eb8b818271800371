//! The bridge run loop.
//!
//! [`Bridge`] exclusively owns one [`InboundSource`] and one
//! [`Float64Publisher`] and moves values between them:
//!
//! ```text
//! recv ─► decode ─► filter ─► convert ─► publish
//! ```
//!
//! Every frame is handled to completion before the next receive.  The only
//! suspension points are the receive itself and the publish call, so values
//! leave in exactly the order they arrived.
//!
//! # Failure handling
//!
//! | Condition | Outcome |
//! |---|---|
//! | receive error | logged, counted, retried after `retry_backoff` |
//! | payload not null-free UTF-8 | logged, skipped |
//! | payload equals the outbound topic | dropped as an echo |
//! | payload not a number | skipped, or fatal under [`ParseFailurePolicy::FailFast`] |
//! | publish error | logged, counted, dropped |

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace, warn};
use zros_types::{BridgeError, Float64, ParseFailurePolicy};

use crate::inbound::InboundSource;
use crate::outbound::Float64Publisher;

/// Default pause after a failed receive.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Run-loop knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub parse_failure: ParseFailurePolicy,
    /// Pause after a failed receive. Zero retries immediately.
    pub retry_backoff: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            parse_failure: ParseFailurePolicy::default(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Counters collected while the bridge runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Frames handed over by the inbound transport.
    pub received: u64,
    pub published: u64,
    /// Frames dropped because they equalled the outbound topic.
    pub echoes: u64,
    pub decode_failures: u64,
    pub parse_failures: u64,
    pub publish_failures: u64,
    pub transport_errors: u64,
}

/// One inbound subscription bridged to one outbound topic.
pub struct Bridge<S, P> {
    source: S,
    publisher: P,
    settings: BridgeSettings,
    stats: BridgeStats,
}

impl<S, P> Bridge<S, P>
where
    S: InboundSource,
    P: Float64Publisher,
{
    /// Assemble a bridge from already-connected transports.
    ///
    /// The publisher's topic doubles as the self-topic identifier used for
    /// echo suppression.
    pub fn new(source: S, publisher: P, settings: BridgeSettings) -> Self {
        Self {
            source,
            publisher,
            settings,
            stats: BridgeStats::default(),
        }
    }

    /// The outbound topic (and self-topic identifier).
    pub fn topic(&self) -> &str {
        self.publisher.topic()
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Run until the process is torn down externally.
    ///
    /// Only returns under [`ParseFailurePolicy::FailFast`].
    pub async fn run(self) -> Result<BridgeStats, BridgeError> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    ///
    /// Both transport handles are released before this returns, on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidNumber`] when a payload fails to parse
    /// under [`ParseFailurePolicy::FailFast`].
    #[instrument(
        name = "bridge",
        skip_all,
        fields(source = %self.source.describe(), topic = %self.topic())
    )]
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<BridgeStats, BridgeError>
    where
        F: Future<Output = ()>,
    {
        info!(policy = %self.settings.parse_failure, "bridge running");

        let outcome = tokio::select! {
            result = self.consume() => match result {
                Ok(never) => match never {},
                Err(e) => Err(e),
            },
            () = shutdown => {
                info!("shutdown requested");
                Ok(())
            }
        };

        if let Err(e) = self.publisher.close().await {
            warn!(error = %e, "outbound publisher did not close cleanly");
        }
        let Self { source, stats, .. } = self;
        drop(source);

        match outcome {
            Ok(()) => {
                info!(?stats, "bridge stopped");
                Ok(stats)
            }
            Err(e) => {
                error!(error = %e, ?stats, "bridge terminated");
                Err(e)
            }
        }
    }

    async fn consume(&mut self) -> Result<Infallible, BridgeError> {
        loop {
            let frames = match self.source.recv().await {
                Ok(frames) => frames,
                Err(e) => {
                    self.stats.transport_errors += 1;
                    warn!(error = %e, "receive failed; retrying");
                    if !self.settings.retry_backoff.is_zero() {
                        tokio::time::sleep(self.settings.retry_backoff).await;
                    }
                    continue;
                }
            };
            for frame in &frames {
                self.handle_frame(frame).await?;
            }
        }
    }

    /// Decode, filter, convert and publish one frame.
    ///
    /// Only a fatal condition is returned as `Err`.
    async fn handle_frame(&mut self, frame: &[u8]) -> Result<(), BridgeError> {
        self.stats.received += 1;

        let payload = match decode(frame) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(error = %e, len = frame.len(), "skipping undecodable payload");
                return Ok(());
            }
        };

        if is_echo(payload, self.publisher.topic()) {
            self.stats.echoes += 1;
            debug!(payload, "dropping echo of own topic");
            return Ok(());
        }

        let value = match convert(payload) {
            Ok(value) => value,
            Err(e) => {
                self.stats.parse_failures += 1;
                return match self.settings.parse_failure {
                    ParseFailurePolicy::Skip => {
                        warn!(error = %e, "skipping non-numeric payload");
                        Ok(())
                    }
                    ParseFailurePolicy::FailFast => Err(e),
                };
            }
        };

        match self.publisher.publish(Float64 { data: value }).await {
            Ok(()) => {
                self.stats.published += 1;
                trace!(value, "value bridged");
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!(error = %e, value, "publish failed; value dropped");
            }
        }
        Ok(())
    }
}

/// Interpret the whole frame as UTF-8 text.
///
/// The frame length is authoritative; no terminator is searched for.  An
/// embedded NUL is rejected because the payload must be null-free.
pub fn decode(frame: &[u8]) -> Result<&str, BridgeError> {
    let text = std::str::from_utf8(frame).map_err(|e| BridgeError::Decode(e.to_string()))?;
    if let Some(pos) = text.find('\0') {
        return Err(BridgeError::Decode(format!("NUL byte at offset {pos}")));
    }
    Ok(text)
}

/// Whether `payload` is an echo of the bridge's own topic name.
pub fn is_echo(payload: &str, own_topic: &str) -> bool {
    payload == own_topic
}

/// Parse a decimal literal, ignoring surrounding ASCII whitespace.
pub fn convert(payload: &str) -> Result<f64, BridgeError> {
    payload
        .trim_matches(|c: char| c.is_ascii_whitespace())
        .parse::<f64>()
        .map_err(|e| BridgeError::InvalidNumber {
            payload: payload.to_string(),
            reason: e.to_string(),
        })
}
