//! Per-connection task: admission, then the read/write pump.
//!
//! A connection first resolves its room (explicit `room_id` from the
//! handshake, or the first `join` message for solo/matchmaking), then pumps
//! frames both ways until either side closes. Admission failures close the
//! socket with the application close code; in-race protocol violations are
//! dropped without ending the connection.

use crate::auth::Identity;
use crate::game::manager::SessionManager;
use crate::game::room::{RoomEvent, RoomHandle};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace};
use uplink_proto::{ClientMessage, JoinRequest};

/// One client socket, post-handshake.
pub struct Connection {
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    identity: Identity,
    room_id: Option<String>,
    manager: Arc<SessionManager>,
}

impl Connection {
    pub fn new(
        ws: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        identity: Identity,
        room_id: Option<String>,
        manager: Arc<SessionManager>,
    ) -> Self {
        Self {
            ws,
            addr,
            identity,
            room_id,
            manager,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let result = match self.room_id.take() {
            Some(id) => self.manager.join_room(&id, self.identity.clone()).await,
            None => match self.await_join_request().await {
                Some(req) => {
                    self.manager
                        .join_request(self.identity.clone(), &req)
                        .await
                }
                // Client went away before asking for a room.
                None => return Ok(()),
            },
        };

        let (room, mut outbound) = match result {
            Ok(pair) => pair,
            Err(e) => {
                debug!(addr = %self.addr, user_id = %self.identity.user_id, error = %e,
                       "admission refused");
                if let Some((code, reason)) = e.close_frame() {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = self.ws.close(Some(frame)).await;
                }
                return Ok(());
            }
        };

        let user_id = self.identity.user_id.clone();
        let (mut sink, mut stream) = self.ws.split();

        loop {
            tokio::select! {
                out = outbound.recv() => match out {
                    Some(msg) => {
                        if sink.send(Message::Text(msg.to_json())).await.is_err() {
                            break;
                        }
                    }
                    // Room retired or server shutting down: normal closure.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&room, &user_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by the stream
                    Some(Err(e)) => {
                        debug!(user_id = %user_id, error = %e, "read error");
                        break;
                    }
                },
            }
        }

        room.event(RoomEvent::Leave { user_id }).await;
        Ok(())
    }

    /// Wait for the initial `join` message. Anything else before it is
    /// ignored; `None` means the client disconnected first.
    async fn await_join_request(&mut self) -> Option<JoinRequest> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => match ClientMessage::from_json(&text) {
                    Ok(ClientMessage::Join(req)) => return Some(req),
                    Ok(other) => trace!(?other, "message before join ignored"),
                    Err(e) => trace!(error = %e, "malformed message before join ignored"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => {
                    debug!(addr = %self.addr, error = %e, "read error before join");
                    return None;
                }
            }
        }
        None
    }
}

/// Translate an inbound frame into a room event. Malformed frames and a
/// repeated `join` are dropped, never fatal.
async fn dispatch(room: &RoomHandle, user_id: &str, text: &str) {
    let event = match ClientMessage::from_json(text) {
        Ok(ClientMessage::PlayerReady) => RoomEvent::Ready {
            user_id: user_id.into(),
        },
        Ok(ClientMessage::GameStart) => RoomEvent::Start {
            user_id: user_id.into(),
        },
        Ok(ClientMessage::UpdateSettings(payload)) => RoomEvent::UpdateSettings {
            user_id: user_id.into(),
            payload,
        },
        Ok(ClientMessage::ChatMessage(payload)) => RoomEvent::Chat {
            user_id: user_id.into(),
            payload,
        },
        Ok(ClientMessage::ClientInput(payload)) => RoomEvent::Input {
            user_id: user_id.into(),
            payload,
        },
        Ok(ClientMessage::Join(_)) => {
            trace!(user_id, "join after admission ignored");
            return;
        }
        Err(e) => {
            trace!(user_id, error = %e, "malformed frame ignored");
            return;
        }
    };
    room.event(event).await;
}
