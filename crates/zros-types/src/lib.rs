use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// ROS type name of [`Float64`] as advertised to the outbound system.
pub const FLOAT64_TYPE: &str = "std_msgs/Float64";

/// Typed outbound message, wire-compatible with `std_msgs/Float64`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Float64 {
    pub data: f64,
}

impl From<f64> for Float64 {
    fn from(data: f64) -> Self {
        Self { data }
    }
}

/// Envelope for a value routed over the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Outbound topic the value was published on, e.g. `"B"`.
    pub topic: String,
    pub payload: Float64,
}

impl Sample {
    /// Stamp a fresh envelope around `payload`.
    pub fn new(topic: impl Into<String>, payload: Float64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            payload,
        }
    }
}

/// What the bridge does with a payload that is not a decimal literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseFailurePolicy {
    /// Log the payload and continue with the next message.
    #[default]
    Skip,
    /// End the run loop with [`BridgeError::InvalidNumber`].
    #[serde(rename = "fail")]
    FailFast,
}

impl fmt::Display for ParseFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailurePolicy::Skip => write!(f, "skip"),
            ParseFailurePolicy::FailFast => write!(f, "fail"),
        }
    }
}

impl FromStr for ParseFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ParseFailurePolicy::Skip),
            "fail" | "fail-fast" | "failfast" => Ok(ParseFailurePolicy::FailFast),
            other => Err(format!("unknown parse failure policy '{other}' (expected skip or fail)")),
        }
    }
}

/// Error taxonomy shared by every bridge crate.
///
/// Only `Connection`, `Registration`, `Config` and (under
/// [`ParseFailurePolicy::FailFast`]) `InvalidNumber` are ever surfaced to the
/// operator. The others are recovered inside the run loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Inbound connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Outbound topic '{topic}' could not be registered: {reason}")]
    Registration { topic: String, reason: String },

    #[error("Inbound transport error: {0}")]
    Transport(String),

    #[error("Payload is not valid text: {0}")]
    Decode(String),

    #[error("Payload '{payload}' is not a number: {reason}")]
    InvalidNumber { payload: String, reason: String },

    #[error("Publish on '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
