//! WebSocket client speaking the envelope protocol.

use futures::{SinkExt, StreamExt};
use rt_service::protocol::{Envelope, MessageType};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long [`TestWsClient::recv`] waits before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestWsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWsClient {
    /// Connect to `url` (see `TestRtServer::ws_url`).
    ///
    /// A refused upgrade surfaces as `tungstenite::Error::Http`, reachable
    /// through `anyhow::Error::downcast_ref`.
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _response) = connect_async(url).await?;
        Ok(Self { stream })
    }

    /// Connect and consume the `connected` greeting.
    pub async fn connect_ready(url: &str) -> Result<Self, anyhow::Error> {
        let mut client = Self::connect(url).await?;
        let greeting = client.recv().await?;
        anyhow::ensure!(
            greeting.kind == MessageType::System && greeting.event.as_deref() == Some("connected"),
            "expected connected greeting, got {:?}",
            greeting
        );
        Ok(client)
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), anyhow::Error> {
        let text = serde_json::to_string(envelope)?;
        self.send_text(text).await
    }

    /// Send a raw text frame, for malformed-input tests.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<Envelope, anyhow::Error> {
        let mut request = Envelope::new(MessageType::Subscribe);
        request.topic = Some(topic.to_string());
        self.send(&request).await?;
        self.recv().await
    }

    pub async fn publish(
        &mut self,
        kind: MessageType,
        topic: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<(), anyhow::Error> {
        let mut envelope = Envelope::new(kind);
        envelope.topic = Some(topic.to_string());
        envelope.event = Some(event.to_string());
        envelope.data = Some(data);
        self.send(&envelope).await
    }

    /// Next envelope, skipping transport pings. Fails after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Result<Envelope, anyhow::Error> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a message"))?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;

            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(frame) => anyhow::bail!("connection closed: {:?}", frame),
                other => anyhow::bail!("unexpected frame: {:?}", other),
            }
        }
    }

    /// Assert nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) -> Result<(), anyhow::Error> {
        match tokio::time::timeout(wait, self.stream.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => Ok(()),
            Ok(other) => anyhow::bail!("expected silence, got {:?}", other),
        }
    }

    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream.close(None).await?;
        Ok(())
    }
}
