#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::RawQuery;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use lazy_static::lazy_static;

lazy_static! {
    static ref SERVER: SocketAddr = start_server();
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr() -> SocketAddr {
    *SERVER
}

pub fn url(path: &str) -> String {
    format!("http://{}{}", addr(), path)
}

/// A local port nothing listens on.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind free port");
    let port = listener.local_addr().expect("free port addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/ok")
}

// Runs on its own thread and runtime so both #[test] and #[tokio::test] can use it.
fn start_server() -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("server runtime");
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
            tx.send(listener.local_addr().expect("local addr")).expect("report addr");
            axum::serve(listener, app()).await.expect("serve");
        });
    });
    rx.recv().expect("server address")
}

fn app() -> Router {
    Router::new()
        .route("/ok", get(|| async { "pong" }))
        .route("/slow", get(slow))
        .route("/echo", post(echo))
        .route("/query", get(query))
        .route("/json", get(json))
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }))
}

async fn json() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "items": [1, 2, 3] }))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

/// Returns the request body unchanged, with request headers mirrored as `x-echo-*`.
async fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let mirror = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    (
        [
            ("x-echo-content-type", mirror(header::CONTENT_TYPE)),
            ("x-echo-user-agent", mirror(header::USER_AGENT)),
            ("x-echo-authorization", mirror(header::AUTHORIZATION)),
        ],
        body,
    )
}

async fn query(RawQuery(query): RawQuery) -> String {
    query.unwrap_or_default()
}
