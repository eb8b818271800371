//! rosbridge publisher.
//!
//! [`RosbridgePublisher`] registers one `std_msgs/Float64` topic with a
//! `rosbridge_server` and forwards values to it as rosbridge v2 JSON frames
//! over a WebSocket:
//!
//! 1. **advertise** – sent once on connect, with `queue_size` 1.
//! 2. **publish** – one frame per value, `{"data": <f64>}`.
//! 3. **unadvertise** – sent on [`close`][Float64Publisher::close], followed
//!    by a WebSocket close handshake.
//!
//! Frames coming back from the server (status reports) are not read; the
//! rosbridge protocol gives nothing to acknowledge a publish against.

use async_trait::async_trait;
use futures_util::SinkExt;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use zros_types::{BridgeError, FLOAT64_TYPE, Float64};

use crate::outbound::{Float64Publisher, OUTBOUND_QUEUE_DEPTH};

/// Publisher for a single topic on a `rosbridge_server`.
pub struct RosbridgePublisher {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    topic: String,
    advertise_id: String,
    closed: bool,
}

impl RosbridgePublisher {
    /// Connect to `url` (e.g. `"ws://localhost:9090"`) and advertise `topic`.
    ///
    /// `node_name` only tags the advertisement id so the server's logs show
    /// who registered the topic.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Registration`] if the WebSocket cannot be opened
    /// or the advertisement cannot be sent.
    pub async fn connect(
        url: impl Into<String>,
        topic: impl Into<String>,
        node_name: &str,
    ) -> Result<Self, BridgeError> {
        let url = url.into();
        let topic = topic.into();
        let registration_error = |reason: String| BridgeError::Registration {
            topic: topic.clone(),
            reason,
        };

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| registration_error(format!("rosbridge connect to {url}: {e}")))?;

        let advertise_id = format!("advertise:{node_name}:{topic}");
        let mut publisher = Self {
            ws,
            url,
            topic: topic.clone(),
            advertise_id,
            closed: false,
        };
        let frame = Self::build_advertise_frame(&publisher.topic, &publisher.advertise_id);
        publisher
            .send(frame)
            .await
            .map_err(|e| registration_error(format!("advertise: {e}")))?;

        info!(url = %publisher.url, topic = %publisher.topic, "rosbridge topic advertised");
        Ok(publisher)
    }

    /// Return the rosbridge URL this publisher is connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the `advertise` frame registering `topic` as `std_msgs/Float64`.
    pub fn build_advertise_frame(topic: &str, id: &str) -> String {
        json!({
            "op": "advertise",
            "id": id,
            "topic": topic,
            "type": FLOAT64_TYPE,
            "queue_size": OUTBOUND_QUEUE_DEPTH,
            "latch": false
        })
        .to_string()
    }

    /// Build the `publish` frame carrying one `std_msgs/Float64`.
    pub fn build_publish_frame(topic: &str, msg: Float64) -> String {
        json!({
            "op": "publish",
            "topic": topic,
            "msg": msg
        })
        .to_string()
    }

    /// Build the `unadvertise` frame releasing `topic`.
    pub fn build_unadvertise_frame(topic: &str, id: &str) -> String {
        json!({
            "op": "unadvertise",
            "id": id,
            "topic": topic
        })
        .to_string()
    }

    async fn send(&mut self, frame: String) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        self.ws.send(Message::Text(frame.into())).await
    }

    fn publish_error(&self, reason: impl Into<String>) -> BridgeError {
        BridgeError::Publish {
            topic: self.topic.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Float64Publisher for RosbridgePublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&mut self, msg: Float64) -> Result<(), BridgeError> {
        if self.closed {
            return Err(self.publish_error("publisher is closed"));
        }
        // JSON has no NaN or infinity; rosbridge would receive `null`.
        if !msg.data.is_finite() {
            return Err(self.publish_error(format!("{} cannot be encoded as JSON", msg.data)));
        }
        let frame = Self::build_publish_frame(&self.topic, msg);
        self.send(frame)
            .await
            .map_err(|e| self.publish_error(e.to_string()))?;
        debug!(topic = %self.topic, value = msg.data, "rosbridge publish sent");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = Self::build_unadvertise_frame(&self.topic, &self.advertise_id);
        let unadvertised = self.send(frame).await;
        // Close the socket even when the unadvertise frame could not be sent.
        let closed = self.ws.close(None).await;
        info!(url = %self.url, topic = %self.topic, "rosbridge publisher closed");
        unadvertised
            .and(closed)
            .map_err(|e| self.publish_error(format!("close: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_async;

    /// Accept one rosbridge client and collect every text frame it sends
    /// until it closes the connection.
    async fn spawn_fake_rosbridge() -> (String, oneshot::Receiver<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut frames = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => {
                        frames.push(serde_json::from_str(text.as_str()).unwrap())
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            let _ = tx.send(frames);
        });
        (format!("ws://{addr}"), rx)
    }

    #[tokio::test]
    async fn advertise_publish_unadvertise_sequence() {
        let (url, frames_rx) = spawn_fake_rosbridge().await;

        let mut publisher = RosbridgePublisher::connect(url.clone(), "B", "zmq_to_ros")
            .await
            .unwrap();
        assert_eq!(publisher.url(), url);
        publisher.publish(Float64 { data: 3.14 }).await.unwrap();
        publisher.publish(Float64 { data: -2.5 }).await.unwrap();
        publisher.close().await.unwrap();

        let frames = frames_rx.await.unwrap();
        assert_eq!(frames.len(), 4, "got frames: {frames:?}");
        assert_eq!(frames[0]["op"], "advertise");
        assert_eq!(frames[0]["type"], "std_msgs/Float64");
        assert_eq!(frames[0]["queue_size"], 1);
        assert_eq!(frames[1]["op"], "publish");
        assert_eq!(frames[1]["topic"], "B");
        assert_eq!(frames[1]["msg"]["data"], 3.14);
        assert_eq!(frames[2]["msg"]["data"], -2.5);
        assert_eq!(frames[3]["op"], "unadvertise");
        assert_eq!(frames[3]["id"], frames[0]["id"]);
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let (url, _frames_rx) = spawn_fake_rosbridge().await;
        let mut publisher = RosbridgePublisher::connect(url, "B", "zmq_to_ros").await.unwrap();
        publisher.close().await.unwrap();
        assert!(publisher.close().await.is_ok());
        assert!(matches!(
            publisher.publish(Float64 { data: 1.0 }).await,
            Err(BridgeError::Publish { .. })
        ));
    }

    #[tokio::test]
    async fn non_finite_values_are_not_sent() {
        let (url, frames_rx) = spawn_fake_rosbridge().await;
        let mut publisher = RosbridgePublisher::connect(url, "B", "zmq_to_ros").await.unwrap();
        assert!(publisher.publish(Float64 { data: f64::NAN }).await.is_err());
        assert!(publisher.publish(Float64 { data: f64::INFINITY }).await.is_err());
        publisher.close().await.unwrap();

        let frames = frames_rx.await.unwrap();
        assert!(frames.iter().all(|f| f["op"] != "publish"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_registration_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RosbridgePublisher::connect(format!("ws://{addr}"), "B", "zmq_to_ros").await;
        assert!(matches!(result, Err(BridgeError::Registration { .. })));
    }

    #[test]
    fn build_publish_frame_contains_expected_fields() {
        let frame = RosbridgePublisher::build_publish_frame("B", Float64 { data: 0.0 });
        let json: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["op"], "publish");
        assert_eq!(json["topic"], "B");
        assert_eq!(json["msg"]["data"], 0.0);
    }
}
