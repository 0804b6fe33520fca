//! Test origin server for the fetch integration tests.
//!
//! Every route is deterministic. `/hits` reports how many requests the other
//! routes have served, which lets a test prove a fetch never reached the
//! network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::debug;

pub const TEXT_BODY: &str = "hello from mock-server";

/// What `/echo` saw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

#[derive(Clone, Default)]
pub struct AppState {
    hits: Arc<AtomicU64>,
}

impl AppState {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn app() -> Router {
    Router::new()
        .route("/text", get(text))
        .route("/echo", any(echo))
        .route("/status/{code}", any(status))
        .route("/bytes/{n}", get(bytes))
        .route("/slow/{ms}", get(slow))
        .route("/redirect", get(redirect))
        .route("/hits", get(hits))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn text(State(state): State<AppState>) -> impl IntoResponse {
    state.hit();
    ([(header::CONTENT_TYPE, "text/plain")], TEXT_BODY)
}

async fn echo(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    state.hit();
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        seen.entry(name.as_str().to_string()).or_default().push(value);
    }
    debug!(%method, body_len = body.len(), "echo");
    Json(Echo {
        method: method.to_string(),
        headers: seen,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn status(State(state): State<AppState>, Path(code): Path<u16>) -> StatusCode {
    state.hit();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// `n` bytes counting up from 0 and wrapping at 256.
async fn bytes(State(state): State<AppState>, Path(n): Path<usize>) -> impl IntoResponse {
    state.hit();
    let body: Vec<u8> = (0..n).map(|i| (i % 256) as u8).collect();
    ([(header::CONTENT_TYPE, "application/octet-stream")], body)
}

async fn slow(State(state): State<AppState>, Path(ms): Path<u64>) -> &'static str {
    state.hit();
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn redirect(State(state): State<AppState>) -> Redirect {
    state.hit();
    Redirect::temporary("/text")
}

async fn hits(State(state): State<AppState>) -> String {
    state.hits.load(Ordering::SeqCst).to_string()
}
