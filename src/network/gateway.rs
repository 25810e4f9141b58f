//! Gateway - TCP listener that accepts incoming WebSocket connections.
//!
//! Each accepted socket goes through the handshake callback, which enforces
//! the Origin allow-list and the identity token before the upgrade
//! completes, then a Connection task owns the socket for its lifetime.

use crate::auth::{Identity, TokenVerifier};
use crate::game::manager::SessionManager;
use crate::network::connection::Connection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{error, info, instrument, warn};

/// Accepts incoming connections and spawns a task per client.
pub struct Gateway {
    listener: TcpListener,
    manager: Arc<SessionManager>,
    verifier: Arc<TokenVerifier>,
    allow_origins: Vec<String>,
}

/// What the handshake callback extracts from a valid upgrade request.
struct Admission {
    identity: Identity,
    room_id: Option<String>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(
        addr: SocketAddr,
        manager: Arc<SessionManager>,
        verifier: Arc<TokenVerifier>,
        allow_origins: Vec<String>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "WebSocket listener bound");
        Ok(Self {
            listener,
            manager,
            verifier,
            allow_origins,
        })
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let manager = Arc::clone(&self.manager);
                    let verifier = Arc::clone(&self.verifier);
                    let allowed = self.allow_origins.clone();

                    tokio::spawn(async move {
                        let mut admission: Option<Admission> = None;
                        let callback = |req: &Request, response: Response| {
                            admission =
                                Some(check_handshake(req, &allowed, &verifier, addr)?);
                            Ok(response)
                        };

                        // Bound to a local so the handshake future (and its
                        // borrow of `admission`) is dropped before the match.
                        let handshake = accept_hdr_async(stream, callback).await;
                        match handshake {
                            Ok(ws_stream) => {
                                // The callback ran exactly once on success.
                                let Some(admission) = admission else {
                                    return;
                                };
                                info!(%addr, user_id = %admission.identity.user_id,
                                      "WebSocket handshake successful");
                                let connection = Connection::new(
                                    ws_stream,
                                    addr,
                                    admission.identity,
                                    admission.room_id,
                                    manager,
                                );
                                if let Err(e) = connection.run().await {
                                    error!(%addr, error = %e, "WebSocket connection error");
                                }
                                info!(%addr, "WebSocket connection closed");
                            }
                            Err(e) => {
                                warn!(%addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Validate Origin and the identity token; pull the target room id from the
/// request query. Runs inside the handshake so rejects are plain HTTP
/// responses, not upgraded sockets.
fn check_handshake(
    req: &Request,
    allowed: &[String],
    verifier: &TokenVerifier,
    addr: SocketAddr,
) -> Result<Admission, ErrorResponse> {
    // Empty allow-list means any origin is accepted.
    if !allowed.is_empty() {
        let origin = req
            .headers()
            .get("Origin")
            .and_then(|o| o.to_str().ok())
            .unwrap_or("");
        if !allowed.iter().any(|a| a == origin || a == "*") {
            warn!(%addr, origin, "WebSocket origin rejected");
            return Err(http_error(http::StatusCode::FORBIDDEN, "origin not allowed"));
        }
    }

    let query = req.uri().query().unwrap_or("");
    let token = query_param(query, "token").unwrap_or_default();
    let Some(identity) = verifier.verify(&token) else {
        warn!(%addr, "WebSocket token rejected");
        return Err(http_error(
            http::StatusCode::UNAUTHORIZED,
            "invalid or missing token",
        ));
    };

    Ok(Admission {
        identity,
        room_id: query_param(query, "room_id").map(str::to_string),
    })
}

fn http_error(status: http::StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

/// First value for `key` in a raw query string. Tokens and room ids are
/// URL-safe by construction, so no percent-decoding is needed.
fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}
