//! End-to-end tests driving the real server over TCP.

use std::net::SocketAddr;

use axum::extract::Request;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

use cors_relay::config::ProxyServerConfig;
use cors_relay::proxy::ProxyServer;

async fn echo(req: Request) -> Json<Value> {
    let method = req.method().to_string();
    let uri = req.uri().to_string();
    let host = req
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let accept = req
        .headers()
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .unwrap();

    Json(json!({
        "method": method,
        "uri": uri,
        "host": host,
        "accept": accept,
        "body_len": body.len(),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn start_upstream() -> SocketAddr {
    let router = Router::new()
        .route("/moved", get(|| async { Redirect::permanent("/users/7") }))
        .fallback(echo);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn start_relay() -> (SocketAddr, watch::Sender<bool>) {
    let server = ProxyServer::new(ProxyServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        identity: "relay-test".to_string(),
        ..ProxyServerConfig::default()
    })
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        server.serve(listener, rx).await.unwrap();
    });
    (addr, tx)
}

#[tokio::test]
async fn test_end_to_end_get() {
    let upstream = start_upstream().await;
    let (relay, _shutdown) = start_relay().await;
    let target = format!("http://{}/users/42?x=1", upstream);

    let response = reqwest::Client::new()
        .get(format!("http://{}/{}", relay, target))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-target-url"], target.as_str());
    assert_eq!(response.headers()["x-proxied-by"], "relay-test");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["method"], "GET");
    assert_eq!(body["uri"], "/users/42?x=1");
    assert_eq!(body["accept"], "application/json");
    assert_eq!(body["host"], upstream.to_string());
}

#[tokio::test]
async fn test_end_to_end_large_post_round_trip() {
    let upstream = start_upstream().await;
    let (relay, _shutdown) = start_relay().await;

    let payload = "relay-".repeat(200_000);
    let response = reqwest::Client::new()
        .post(format!("http://{}/http://{}/upload", relay, upstream))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["body_len"], payload.len());
    assert_eq!(body["body"], payload);
}

#[tokio::test]
async fn test_end_to_end_redirect_is_followed() {
    let upstream = start_upstream().await;
    let (relay, _shutdown) = start_relay().await;
    let target = format!("http://{}/moved", upstream);

    let response = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
        .get(format!("http://{}/{}", relay, target))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-target-url"], target.as_str());
    let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["uri"], "/users/7");
}

#[tokio::test]
async fn test_end_to_end_preflight_greeting_and_errors() {
    let (relay, _shutdown) = start_relay().await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(
            reqwest::Method::OPTIONS,
            format!("http://{}/https://api.example.com/", relay),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 200);
    assert_eq!(preflight.headers()["access-control-max-age"], "86400");
    assert!(preflight.bytes().await.unwrap().is_empty());

    let greeting = client
        .get(format!("http://{}/", relay))
        .send()
        .await
        .unwrap();
    assert_eq!(greeting.status(), 200);
    assert_eq!(greeting.text().await.unwrap(), "Hello World");

    let invalid = client
        .get(format!("http://{}/not-a-url", relay))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
    let body: Value = serde_json::from_slice(&invalid.bytes().await.unwrap()).unwrap();
    assert_eq!(body["error"], "Invalid URL");
    assert_eq!(body["usage"], format!("http://{}/https://example.com", relay));
}

#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let server = ProxyServer::new(ProxyServerConfig {
        host: "127.0.0.1".to_string(),
        ..ProxyServerConfig::default()
    })
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(async move { server.serve(listener, rx).await });

    tx.send(true).unwrap();
    let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
