//! E2E tests over a live server
//!
//! Binds an ephemeral port, then drives the REST API with reqwest and the
//! sample stream with a real WebSocket client.

use biostream::{AppState, Coordinator, CoordinatorHandle, ServerConfig, StreamConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

const PASSWORD: &str = "e2e-secret";

struct TestServer {
    base: String,
    ws: String,
    _shutdown: oneshot::Sender<()>,
}

async fn start() -> TestServer {
    let stream = StreamConfig {
        password: PASSWORD.to_string(),
        max_clients: 2,
        ..StreamConfig::default()
    };
    let handle = CoordinatorHandle::spawn(Coordinator::new(stream).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        port: addr.port(),
        bind_addr: "127.0.0.1".to_string(),
    };
    let state = AppState::new(handle, config);

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = rx.await;
        };
        biostream_server::serve(listener, state, shutdown).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        ws: format!("ws://{}/api/v1/ws", addr),
        _shutdown: tx,
    }
}

async fn login(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{}/api/v1/auth", base))
        .json(&json!({ "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Test login rejects a wrong password and security headers are set
#[tokio::test]
async fn test_login_and_headers() {
    let server = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/auth", server.base))
        .json(&json!({ "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.headers()["x-frame-options"], "DENY");
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");

    let token = login(&client, &server.base).await;
    let sessions: Value = client
        .get(format!("{}/api/v1/sessions", server.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 1);

    let resp = client
        .delete(format!("{}/api/v1/auth", server.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/api/v1/sessions", server.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

/// Test a viewer streams pushed samples and its acks show up in quality
#[tokio::test]
async fn test_stream_and_ack_round_trip() {
    let server = start().await;
    let client = reqwest::Client::new();

    assert!(
        tokio_tungstenite::connect_async(server.ws.as_str()).await.is_err(),
        "connecting without a token must fail"
    );
    assert!(
        tokio_tungstenite::connect_async(format!("{}?token=bogus", server.ws))
            .await
            .is_err()
    );

    let token = login(&client, &server.base).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}?token={}", server.ws, token))
        .await
        .unwrap();

    let config = next_json(&mut ws).await;
    assert_eq!(config["type"], "config");
    assert_eq!(config["sample_rate"], 100);
    let client_id = config["client_id"].as_str().unwrap().to_string();

    for i in 0..3 {
        let resp: Value = client
            .post(format!("{}/api/v1/data/push", server.base))
            .json(&json!({ "timestamp": i as f64 * 0.01, "value": 512.0 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["seq"], i + 1);
    }

    for expected in 1..=3u64 {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["type"], "data");
        assert_eq!(frame["seq"], expected);
        assert_eq!(frame["raw"], 512.0);
        let ack = json!({ "type": "ack", "seq": expected, "client_time": 0.0 });
        ws.send(Message::Text(ack.to_string().into())).await.unwrap();
    }

    let url = format!("{}/api/v1/quality/{}", server.base, client_id);
    let mut received = 0;
    for _ in 0..50 {
        let report: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        received = report["packets_received"].as_u64().unwrap();
        if received == 3 {
            assert_eq!(report["packets_lost"], 0);
            assert_eq!(report["quality"], "excellent");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(received, 3);

    ws.close(None).await.unwrap();
    let mut gone = false;
    for _ in 0..50 {
        if client.get(&url).send().await.unwrap().status() == 404 {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "closed viewer should be unregistered");
}

/// Test filter updates need a token and invalid bands are refused
#[tokio::test]
async fn test_filter_endpoints() {
    let server = start().await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/filter", server.base);
    let update = json!({ "lowcut": 0.7, "highcut": 8.0, "order": 2 });

    let resp = client.post(&url).json(&update).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let token = login(&client, &server.base).await;
    let resp = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({ "lowcut": 10.0, "highcut": 2.0, "order": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);

    let resp = client
        .post(&url)
        .bearer_auth(&token)
        .json(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({ "lowcut": 0.7, "highcut": 8.0, "order": 1u64 << 40 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);

    let current: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(current["lowcut_hz"], 0.7);
    assert_eq!(current["highcut_hz"], 8.0);
    assert_eq!(current["order"], 2);

    let applied: Value = client
        .post(format!("{}/api/v1/filter/apply", server.base))
        .json(&json!({ "data": [1.0, 2.0] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(applied["filtered"], json!([1.0, 2.0]));
    assert_eq!(applied["warning"]["actual"], 2);
}

/// Test history windows and their validation
#[tokio::test]
async fn test_history_endpoints() {
    let server = start().await;
    let client = reqwest::Client::new();

    for i in 0..200 {
        client
            .post(format!("{}/api/v1/data/push", server.base))
            .json(&json!({ "timestamp": i as f64 * 0.01, "value": i as f64 }))
            .send()
            .await
            .unwrap();
    }

    let all: Value = client
        .get(format!("{}/api/v1/history", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["count"], 200);

    let recent: Value = client
        .get(format!("{}/api/v1/history?window=0.5", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let count = recent["count"].as_u64().unwrap();
    assert!((50..=51).contains(&count), "got {}", count);

    let resp = client
        .get(format!("{}/api/v1/history?window=-1", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/v1/history/clear", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let token = login(&client, &server.base).await;
    let resp = client
        .post(format!("{}/api/v1/history/clear", server.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let status: Value = client
        .get(format!("{}/api/v1/status", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["buffered_samples"], 0);
    assert_eq!(status["last_seq"], 200);
    assert_eq!(status["source_active"], true);
    assert_eq!(status["source_stats"]["samples_read"], 0);
}
