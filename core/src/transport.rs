//! The single call boundary to the network-performing host.
//!
//! # Design
//! The coordinator never does I/O. It hands a [`TransportCall`] and the
//! materialized body bytes to a [`Transport`], together with a [`Reply`] the
//! host must complete exactly once. `Reply::send` consumes the handle, so a
//! second completion is unrepresentable; a completion that arrives after the
//! fetch already settled (for example, after an abort) is dropped quietly.
//!
//! On the wire the host answers with a two-layer result:
//!
//! ```text
//! {"SystemOk": {"RequestOk": {"status": 200, "headers": [["k","v"]], "body": {"Text": "..."}}}}
//! {"SystemOk": {"RequestErr": "connection refused"}}
//! {"SystemErr": "service unavailable"}
//! ```
//!
//! [`SystemResult`] models that nesting for serde; [`Outcome`] flattens it into
//! the three terminal cases the coordinator matches on.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::headers::HeaderValues;

/// Method, URL and grouped headers of an outbound exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderValues,
}

/// Tagged envelope sent to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportCall {
    HttpRequest(TransportRequest),
}

impl TransportCall {
    pub fn request(&self) -> &TransportRequest {
        match self {
            TransportCall::HttpRequest(request) => request,
        }
    }
}

/// Response payload as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpBody {
    Text(String),
    Binary(Vec<u8>),
}

impl HttpBody {
    pub fn into_bytes(self) -> Bytes {
        match self {
            HttpBody::Text(text) => Bytes::from(text),
            HttpBody::Binary(bytes) => Bytes::from(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: HttpBody,
}

impl HttpResult {
    pub fn text(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: HttpBody::Text(body.into()),
        }
    }

    pub fn binary(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: HttpBody::Binary(body.into()),
        }
    }
}

/// Inner layer: did the HTTP exchange itself succeed?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestResult {
    RequestOk(HttpResult),
    RequestErr(String),
}

/// Outer layer: did invoking the exchange succeed?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemResult {
    SystemOk(RequestResult),
    SystemErr(String),
}

/// Flattened transport result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Response(HttpResult),
    /// The exchange failed (DNS, refused connection, TLS, ...).
    RequestFailed(String),
    /// The call mechanism itself failed.
    SystemFailed(String),
}

impl Outcome {
    /// Decode the JSON wire encoding.
    pub fn from_json(json: &str) -> Result<Outcome, serde_json::Error> {
        serde_json::from_str::<SystemResult>(json).map(Outcome::from)
    }
}

impl From<SystemResult> for Outcome {
    fn from(result: SystemResult) -> Self {
        match result {
            SystemResult::SystemErr(detail) => Outcome::SystemFailed(detail),
            SystemResult::SystemOk(RequestResult::RequestErr(reason)) => {
                Outcome::RequestFailed(reason)
            }
            SystemResult::SystemOk(RequestResult::RequestOk(result)) => Outcome::Response(result),
        }
    }
}

impl From<Outcome> for SystemResult {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Response(result) => SystemResult::SystemOk(RequestResult::RequestOk(result)),
            Outcome::RequestFailed(reason) => {
                SystemResult::SystemOk(RequestResult::RequestErr(reason))
            }
            Outcome::SystemFailed(detail) => SystemResult::SystemErr(detail),
        }
    }
}

impl From<HttpResult> for Outcome {
    fn from(result: HttpResult) -> Self {
        Outcome::Response(result)
    }
}

/// Single-use completion handle for one transport call.
#[derive(Debug)]
pub struct Reply {
    tx: oneshot::Sender<Outcome>,
}

impl Reply {
    pub(crate) fn channel() -> (Reply, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Reply { tx }, rx)
    }

    /// Complete the call. Returns `false` if the fetch already settled, in
    /// which case the outcome is discarded.
    pub fn send(self, outcome: impl Into<Outcome>) -> bool {
        let delivered = self.tx.send(outcome.into()).is_ok();
        if !delivered {
            trace!("transport replied after the fetch settled; outcome dropped");
        }
        delivered
    }

    /// Complete the call from the JSON wire encoding. Malformed JSON still
    /// completes the call, as a system failure, and the parse error is
    /// returned to the host.
    pub fn send_json(self, json: &str) -> Result<bool, serde_json::Error> {
        match Outcome::from_json(json) {
            Ok(outcome) => Ok(self.send(outcome)),
            Err(err) => {
                warn!(error = %err, "malformed transport outcome");
                self.send(Outcome::SystemFailed(format!("malformed transport outcome: {err}")));
                Err(err)
            }
        }
    }

    /// `true` once nobody is waiting for this reply.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when nobody is waiting for this reply any more.
    pub async fn closed(&mut self) {
        self.tx.closed().await
    }
}

/// The host side of the call boundary.
///
/// Implementations must eventually call [`Reply::send`] (or drop the reply,
/// which the coordinator reports as a system failure). `call` itself must not
/// block; do the exchange elsewhere and reply from there.
pub trait Transport: Send + Sync {
    fn call(&self, call: TransportCall, body: Bytes, reply: Reply);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn call(&self, call: TransportCall, body: Bytes, reply: Reply) {
        (**self).call(call, body, reply)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn call(&self, call: TransportCall, body: Bytes, reply: Reply) {
        (**self).call(call, body, reply)
    }
}

/// Adapts an async function into a [`Transport`]. Each call is spawned on the
/// current Tokio runtime and is dropped early if the fetch settles first.
pub struct FnTransport<F> {
    f: F,
}

pub fn from_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(TransportCall, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    FnTransport { f }
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(TransportCall, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    fn call(&self, call: TransportCall, body: Bytes, mut reply: Reply) {
        let exchange = (self.f)(call, body);
        tokio::spawn(async move {
            let finished = tokio::select! {
                outcome = exchange => Some(outcome),
                _ = reply.closed() => None,
            };
            match finished {
                Some(outcome) => {
                    reply.send(outcome);
                }
                None => trace!("fetch settled before the transport finished; exchange dropped"),
            }
        });
    }
}

/// A call waiting for the host to perform it.
#[derive(Debug)]
pub struct PendingCall {
    pub call: TransportCall,
    pub body: Bytes,
    pub reply: Reply,
}

/// Queues every call for a host loop to pick up.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<PendingCall>,
}

impl ChannelTransport {
    pub fn new() -> (ChannelTransport, mpsc::UnboundedReceiver<PendingCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelTransport { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn call(&self, call: TransportCall, body: Bytes, reply: Reply) {
        if let Err(mpsc::error::SendError(pending)) = self.tx.send(PendingCall { call, body, reply }) {
            pending
                .reply
                .send(Outcome::SystemFailed("transport host is gone".to_string()));
        }
    }
}
