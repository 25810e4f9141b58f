//! WebSocket test client speaking the race protocol.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uplink_proto::{ClientMessage, ServerMessage};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// One connected protocol client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Open a connection with the given token, optionally targeting a room.
    pub async fn connect(port: u16, token: &str, room_id: Option<&str>) -> anyhow::Result<Self> {
        let mut url = format!("ws://127.0.0.1:{port}/ws?token={token}");
        if let Some(room_id) = room_id {
            url.push_str(&format!("&room_id={room_id}"));
        }
        let (ws, _response) = connect_async(&url).await?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Next protocol message, or `None` when the server closes the
    /// connection without a close frame of interest.
    pub async fn recv(&mut self) -> anyhow::Result<Option<ServerMessage>> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a server message"))?;
            match frame {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(serde_json::from_str(&text)?));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Drain messages until one satisfies the predicate.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> anyhow::Result<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        for _ in 0..500 {
            match self.recv().await? {
                Some(msg) if pred(&msg) => return Ok(msg),
                Some(_) => continue,
                None => anyhow::bail!("connection closed while waiting for a message"),
            }
        }
        anyhow::bail!("expected message never arrived")
    }

    /// Wait for the server to close the connection, returning the close
    /// frame if one was sent.
    pub async fn expect_close(&mut self) -> anyhow::Result<Option<CloseFrame<'static>>> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?;
            match frame {
                Some(Ok(Message::Close(close))) => {
                    return Ok(close.map(|c| CloseFrame {
                        code: c.code,
                        reason: c.reason.into_owned().into(),
                    }));
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    pub async fn close(&mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
