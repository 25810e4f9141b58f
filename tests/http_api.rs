//! HTTP API tests: health, read-side queries, and persistence after a race.

mod common;

use common::server::TestServer;
use uplink_proto::{ClientMessage, InputPayload, JoinRequest, RoomMode, ServerMessage};

#[tokio::test]
async fn health_reports_room_count() -> anyhow::Result<()> {
    let _server = TestServer::spawn(9390, 9391).await?;

    let (status, body) = common::http_request(9391, "GET", "/healthz", None, None).await?;
    assert_eq!(status, 200);
    let parsed: serde_json::Value = serde_json::from_str(body.trim())?;
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["rooms"], 0);
    Ok(())
}

#[tokio::test]
async fn categories_come_from_the_seeded_pool() -> anyhow::Result<()> {
    let _server = TestServer::spawn(9400, 9401).await?;

    let (status, body) =
        common::http_request(9401, "GET", "/api/v1/categories?language=en", None, None).await?;
    assert_eq!(status, 200);
    let categories: Vec<String> = serde_json::from_str(body.trim())?;
    assert!(categories.contains(&"general".to_string()));
    assert!(categories.contains(&"quotes".to_string()));
    Ok(())
}

#[tokio::test]
async fn room_creation_requires_a_token() -> anyhow::Result<()> {
    let _server = TestServer::spawn(9410, 9411).await?;

    let body = r#"{"mode":"lobby","language":"en","category":"general"}"#;
    let (status, _) =
        common::http_request(9411, "POST", "/api/v1/rooms", None, Some(body)).await?;
    assert_eq!(status, 401);

    let token = common::sign_token("owner", "OWNER");
    let (status, _) =
        common::http_request(9411, "POST", "/api/v1/rooms", Some(&token), Some(body)).await?;
    assert_eq!(status, 200);
    Ok(())
}

#[tokio::test]
async fn finished_race_shows_up_in_history_and_leaderboard() -> anyhow::Result<()> {
    let server = TestServer::spawn(9420, 9421).await?;

    // Run one solo race to completion so a match gets persisted.
    let mut client = server.connect("historian", None).await?;
    client
        .send(&ClientMessage::Join(JoinRequest {
            mode: RoomMode::Solo,
            language: "en".into(),
            text_mode: "standard".into(),
            category: "general".into(),
        }))
        .await?;
    client
        .recv_until(|m| matches!(m, ServerMessage::PlayerJoined(_)))
        .await?;
    client.send(&ClientMessage::PlayerReady).await?;
    let started = client
        .recv_until(|m| matches!(m, ServerMessage::GameStart { .. }))
        .await?;
    let ServerMessage::GameStart { text, .. } = started else {
        unreachable!();
    };
    client
        .recv_until(|m| matches!(m, ServerMessage::StateUpdate(_)))
        .await?;
    for i in 1..=text.chars().count() {
        client
            .send(&ClientMessage::ClientInput(InputPayload {
                current_index: i,
                wpm: 0,
                accuracy: 100,
            }))
            .await?;
    }
    client
        .recv_until(|m| matches!(m, ServerMessage::GameEnd { .. }))
        .await?;

    let token = common::sign_token("historian", "HISTORIAN");
    let (status, body) =
        common::http_request(9421, "GET", "/api/v1/history", Some(&token), None).await?;
    assert_eq!(status, 200);
    let page: serde_json::Value = serde_json::from_str(body.trim())?;
    let entries = page["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["rank"], 1);
    // A solo race has no opponents, so no rating movement.
    assert_eq!(entries[0]["rating_delta"], 0);

    let (status, body) =
        common::http_request(9421, "GET", "/api/v1/leaderboard", None, None).await?;
    assert_eq!(status, 200);
    let board: serde_json::Value = serde_json::from_str(body.trim())?;
    let top = board.as_array().expect("leaderboard array");
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["user_id"], "historian");
    assert_eq!(top[0]["rating"], 1000);
    Ok(())
}
