//! Test server management.
//!
//! Spawns and manages uplinkd instances for integration testing.

use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// A test server instance. The child process is killed on drop.
pub struct TestServer {
    child: Child,
    ws_port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Spawn a new test server on the given ports. Each test must use its
    /// own port pair; tests in one binary run concurrently.
    pub async fn spawn(ws_port: u16, http_port: u16) -> anyhow::Result<Self> {
        let data_dir = TempDir::new()?;

        let config_path = data_dir.path().join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "uplink.test"

[listen]
websocket = "127.0.0.1:{ws_port}"
http = "127.0.0.1:{http_port}"

[database]
path = "{}/test.db"

[auth]
secret = "{}"

[game]
countdown_secs = 1
broadcast_interval_ms = 50
matchmaking_players = 2
finished_grace_secs = 60
"#,
            data_dir.path().display(),
            super::TEST_SECRET,
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_uplinkd"))
            .arg(&config_path)
            .spawn()?;

        let server = Self {
            child,
            ws_port,
            _data_dir: data_dir,
        };
        server.wait_until_ready().await?;
        Ok(server)
    }

    /// Wait until the WebSocket listener accepts connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.ws_port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server failed to start within 5 seconds")
    }

    pub fn ws_port(&self) -> u16 {
        self.ws_port
    }

    /// Connect a client under the given identity, optionally to an explicit
    /// room.
    pub async fn connect(
        &self,
        user_id: &str,
        room_id: Option<&str>,
    ) -> anyhow::Result<super::client::TestClient> {
        let token = super::sign_token(user_id, &user_id.to_uppercase());
        super::client::TestClient::connect(self.ws_port, &token, room_id).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
