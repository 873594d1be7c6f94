//! End-to-end scenarios (§8) driven over a real WebSocket connection against
//! a live `axum::serve` instance. Every test is a no-op when
//! `TEST_DATABASE_URL` isn't set, matching the teacher's own tolerance for
//! running without a configured database in CI sandboxes.

mod common;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

async fn recv_json(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    loop {
        match ws.next().await.expect("stream ended").expect("ws error") {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn subscribe_and_snapshot() {
    let Some(pool) = common::test_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    sqlx::query("INSERT INTO token_snapshots (symbol, data) VALUES ('SOL', '{\"price\":1}') ON CONFLICT (symbol) DO NOTHING")
        .execute(&pool)
        .await
        .unwrap();

    let app = common::spawn_app(pool).await;
    let addr = app.addr;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/market-data"))
        .await
        .unwrap();

    ws.send(Message::Text(
        json!({"type": "SUBSCRIBE", "topic": "market.tokens"}).to_string(),
    ))
    .await
    .unwrap();

    let ack = recv_json(&mut ws).await;
    assert_eq!(ack["type"], "ACKNOWLEDGMENT");

    let snapshot = recv_json(&mut ws).await;
    assert_eq!(snapshot["type"], "TOKEN_DATA");
    assert!(snapshot["data"].as_array().unwrap().len() > 0);
}

#[tokio::test]
async fn contest_join_without_participation_is_rejected() {
    let Some(pool) = common::test_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let wallet = "0xnonparticipant";
    common::upsert_user(&pool, wallet, "user").await;
    sqlx::query("INSERT INTO contests (id, status) VALUES (42, 'open') ON CONFLICT (id) DO NOTHING")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM contest_participants WHERE contest_id = 42 AND wallet_address = $1")
        .bind(wallet)
        .execute(&pool)
        .await
        .unwrap();

    let token = common::issue_token(wallet);
    let app = common::spawn_app(pool).await;
    let addr = app.addr;
    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws/contest?token={token}"))
            .await
            .unwrap();

    ws.send(Message::Text(
        json!({"type": "JOIN_ROOM", "contestId": 42}).to_string(),
    ))
    .await
    .unwrap();

    let error = recv_json(&mut ws).await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["code"], 4032);
}

#[tokio::test]
async fn chat_rate_limit_caps_at_ten_per_window() {
    let Some(pool) = common::test_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let wallet = "0xchatty";
    common::upsert_user(&pool, wallet, "user").await;
    sqlx::query("INSERT INTO contests (id, status) VALUES (7, 'open') ON CONFLICT (id) DO NOTHING")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO contest_participants (contest_id, wallet_address) VALUES (7, $1)
         ON CONFLICT DO NOTHING",
    )
    .bind(wallet)
    .execute(&pool)
    .await
    .unwrap();

    let token = common::issue_token(wallet);
    let app = common::spawn_app(pool).await;
    let addr = app.addr;
    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws/contest?token={token}"))
            .await
            .unwrap();

    ws.send(Message::Text(json!({"type": "JOIN_ROOM", "contestId": 7}).to_string()))
        .await
        .unwrap();
    let _room_state = recv_json(&mut ws).await;

    for _ in 0..10 {
        ws.send(Message::Text(
            json!({"type": "SEND_CHAT_MESSAGE", "contestId": 7, "text": "hi"}).to_string(),
        ))
        .await
        .unwrap();
        let broadcast = recv_json(&mut ws).await;
        assert_eq!(broadcast["type"], "CHAT_MESSAGE");
    }

    ws.send(Message::Text(
        json!({"type": "SEND_CHAT_MESSAGE", "contestId": 7, "text": "one too many"}).to_string(),
    ))
    .await
    .unwrap();
    let rejected = recv_json(&mut ws).await;
    assert_eq!(rejected["type"], "ERROR");
    assert_eq!(rejected["code"], 4290);
}

#[tokio::test]
async fn settings_update_broadcasts_and_rejects_non_admin() {
    let Some(pool) = common::test_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    common::upsert_user(&pool, "0xadmin", "admin").await;
    common::upsert_user(&pool, "0xplain", "user").await;

    let app = common::spawn_app(pool).await;
    let addr = app.addr;

    let admin_token = common::issue_token("0xadmin");
    let (mut admin_ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/ws/system-settings?token={admin_token}"
    ))
    .await
    .unwrap();

    admin_ws
        .send(Message::Text(
            json!({
                "type": "SUBSCRIBE",
                "topic": "settings.ui.banner"
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let _sub_ack = recv_json(&mut admin_ws).await;
    let _sub_snapshot = recv_json(&mut admin_ws).await;

    admin_ws
        .send(Message::Text(
            json!({
                "type": "COMMAND",
                "topic": "settings",
                "key": "ui.banner",
                "value": {"text": "hi"}
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let ack = recv_json(&mut admin_ws).await;
    assert_eq!(ack["type"], "ACKNOWLEDGMENT");
    assert_eq!(ack["data"]["key"], "ui.banner");
    assert_eq!(ack["data"]["success"], true);

    let update = recv_json(&mut admin_ws).await;
    assert_eq!(update["type"], "SETTING_UPDATE");

    let plain_token = common::issue_token("0xplain");
    let (mut plain_ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/ws/system-settings?token={plain_token}"
    ))
    .await
    .unwrap();

    plain_ws
        .send(Message::Text(
            json!({
                "type": "COMMAND",
                "topic": "settings",
                "key": "ui.banner",
                "value": {"text": "nope"}
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let denied = recv_json(&mut plain_ws).await;
    assert_eq!(denied["type"], "ERROR");
    assert_eq!(denied["code"], 4003);
}

#[tokio::test]
async fn notification_delivery_is_idempotent_under_redelivery() {
    let Some(pool) = common::test_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let wallet = "0xnotifyme";
    common::upsert_user(&pool, wallet, "user").await;
    sqlx::query("DELETE FROM notifications_outbox WHERE wallet_address = $1")
        .bind(wallet)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO notifications_outbox (wallet_address, type, data, delivered)
         VALUES ($1, 'SYSTEM_ANNOUNCEMENT', '{\"order\":1}', false),
                ($1, 'SYSTEM_ANNOUNCEMENT', '{\"order\":2}', false)",
    )
    .bind(wallet)
    .execute(&pool)
    .await
    .unwrap();

    let token = common::issue_token(wallet);
    let app = common::spawn_app(pool.clone()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{}/ws/notifications?token={token}",
        app.addr
    ))
    .await
    .unwrap();

    let first = recv_json(&mut ws).await;
    let second = recv_json(&mut ws).await;
    assert_eq!(first["type"], "DATA");
    assert_eq!(second["type"], "DATA");
    let mut ids: Vec<i64> = vec![
        first["data"]["id"].as_i64().unwrap(),
        second["data"]["id"].as_i64().unwrap(),
    ];
    ids.sort();

    // Give the pump's own UPDATE a moment to land before asserting on the
    // row, since delivery to the socket and the delivered-flag write are
    // two separate steps (§4.7) — a crash between them just means the
    // client sees the same id again next pump, which it already tolerates.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let delivered: Vec<(i64, bool)> =
        sqlx::query_as("SELECT id, delivered FROM notifications_outbox WHERE id = ANY($1)")
            .bind(&ids[..])
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|(_, d)| *d));
}

#[tokio::test]
async fn slow_subscriber_drops_frames_while_others_keep_receiving() {
    let Some(pool) = common::test_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let app = common::spawn_app(pool).await;

    // The "slow" subscriber is registered straight through `Hub::register`
    // rather than a live socket, and its `outbound_rx` is never polled —
    // that's the actual backpressure condition (a reader that has stopped
    // keeping up), without depending on task-scheduling order or real
    // network timing to reproduce it.
    let slow = app.hub.register(
        realtime_hub::models::Principal::anonymous(),
        realtime_hub::hub::Endpoint::MarketData,
        None,
    );
    app.topics
        .subscribe(
            &slow.handle,
            realtime_hub::protocol::TopicKey::parse("market.tokens"),
        )
        .await
        .unwrap();

    let (mut healthy, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws/market-data", app.addr))
            .await
            .unwrap();
    healthy
        .send(Message::Text(
            json!({"type": "SUBSCRIBE", "topic": "market.tokens"}).to_string(),
        ))
        .await
        .unwrap();
    let _ack = recv_json(&mut healthy).await;
    let _snapshot = recv_json(&mut healthy).await;

    // `slow` has no consuming task at all — nothing ever polls its
    // `outbound_rx` — so its queue fills and starts dropping after
    // `outbound_queue_capacity` sends no matter how the broadcasts are
    // paced. `healthy` is read in lockstep with each broadcast, the way a
    // live client that keeps up with the feed would be, so it must see
    // every tick with no gap.
    let topic = realtime_hub::protocol::TopicKey::parse("market.tokens");
    let mut seen = Vec::new();
    for i in 0..20 {
        app.topics.broadcast(
            &topic,
            realtime_hub::protocol::ServerFrame::named(
                "TOKEN_DATA",
                "market.tokens",
                json!({"tick": i}),
            ),
        );
        let frame = recv_json(&mut healthy).await;
        assert_eq!(frame["type"], "TOKEN_DATA");
        seen.push(frame["data"]["tick"].as_i64().unwrap());
    }
    assert_eq!(seen, (0..20).collect::<Vec<_>>());

    let dropped = app
        .diagnostics
        .frames_dropped
        .load(std::sync::atomic::Ordering::Relaxed);
    assert!(dropped > 0, "expected the slow subscriber's queue to overflow");
    assert!(slow.handle.dropped.load(std::sync::atomic::Ordering::Relaxed) > 0);
}
