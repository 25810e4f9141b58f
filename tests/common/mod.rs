//! Shared test infrastructure.

pub mod client;
pub mod server;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Secret baked into every test server config.
pub const TEST_SECRET: &str = "integration-test-secret";

/// Mint an identity token the way the account layer would.
pub fn sign_token(user_id: &str, username: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(TEST_SECRET.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(user_id.as_bytes());
    mac.update(b"\n");
    mac.update(username.as_bytes());
    let tag = mac.finalize().into_bytes();

    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(user_id),
        URL_SAFE_NO_PAD.encode(username),
        URL_SAFE_NO_PAD.encode(tag),
    )
}

/// Minimal HTTP/1.1 request against the API listener. Returns the status
/// code and the response body.
pub async fn http_request(
    port: u16,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> anyhow::Result<(u16, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    let auth = token
        .map(|t| format!("Authorization: Bearer {t}\r\n"))
        .unwrap_or_default();
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         {auth}Connection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let response = String::from_utf8_lossy(&raw).into_owned();

    let status: u16 = response
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("malformed response: {response}"))?
        .parse()?;
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    Ok((status, body))
}

/// Create a lobby room over the HTTP API, returning its id.
pub async fn create_room(
    http_port: u16,
    owner: &str,
    max_players: u32,
) -> anyhow::Result<String> {
    let token = sign_token(owner, &owner.to_uppercase());
    let body = format!(
        r#"{{"mode":"lobby","language":"en","category":"general","max_players":{max_players}}}"#
    );
    let (status, response) = http_request(
        http_port,
        "POST",
        "/api/v1/rooms",
        Some(&token),
        Some(&body),
    )
    .await?;
    anyhow::ensure!(status == 200, "room creation failed: {status} {response}");

    let parsed: serde_json::Value = serde_json::from_str(response.trim())?;
    parsed["room_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no room_id in {response}"))
}
