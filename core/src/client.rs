//! The fetch lifecycle coordinator.
//!
//! # Design
//! `Client` holds a [`Transport`] and a [`ClientConfig`] and nothing else; it
//! carries no state between calls. Each `fetch` walks the same fixed order:
//!
//! 1. scheme gate, before anything is registered anywhere
//! 2. abort precheck, which destroys the outbound body and returns
//! 3. `data:` shortcut, which never reaches the transport
//! 4. one abort subscription for the rest of the call
//! 5. body materialization, dispatch, and translation of the outcome
//!
//! The first of {reply, abort} to be observed settles the call. Whatever
//! loses is dropped: a late reply finds its receiver gone, a late abort finds
//! its listener already removed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abort::{abort_error, check_not_aborted, AbortWatch};
use crate::body::DEFAULT_HIGH_WATER_MARK;
use crate::data_uri;
use crate::error::Error;
use crate::headers::collect_headers;
use crate::request::{Request, RequestInit, Resource};
use crate::response::Response;
use crate::scheme::Scheme;
use crate::transport::{Outcome, Reply, Transport, TransportCall, TransportRequest};
use crate::translate::translate;

/// Reported when a transport drops its [`Reply`] without completing it.
pub const DROPPED_REPLY: &str = "transport dropped the call without replying";

/// Client-wide defaults. Values set on a request win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub accept: String,
    pub high_water_mark: usize,
    /// Maximum response body size in bytes; 0 disables the limit.
    pub size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("fetch-core/", env!("CARGO_PKG_VERSION")).to_string(),
            accept: "*/*".to_string(),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            size: 0,
        }
    }
}

#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl Client {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: impl Transport + 'static, config: ClientConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `fetch(input, init)`.
    pub async fn fetch(
        &self,
        resource: impl Into<Resource>,
        init: RequestInit,
    ) -> Result<Response, Error> {
        let request = self.request(resource.into(), init)?;
        self.send(request).await
    }

    /// Run an already-built request.
    pub async fn send(&self, request: Request) -> Result<Response, Error> {
        let scheme = Scheme::of(request.url())?;
        check_not_aborted(&request)?;
        if scheme == Scheme::Data {
            debug!(url = %request.url(), "data url answered locally");
            return data_uri::respond(&request);
        }

        let mut watch = AbortWatch::register(&request);

        let body = tokio::select! {
            biased;
            _ = watch.fired() => {
                debug!(url = %request.url(), "aborted while reading request body");
                return Err(abort_error());
            }
            body = request.bytes() => body?,
        };

        let mut headers = request.headers().clone();
        if !headers.has("accept") {
            headers.set("Accept", &self.config.accept)?;
        }
        if !headers.has("user-agent") {
            headers.set("User-Agent", &self.config.user_agent)?;
        }
        let call = TransportCall::HttpRequest(TransportRequest {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: collect_headers(headers.iter()),
        });

        let (reply, rx) = Reply::channel();
        debug!(method = %request.method(), url = %request.url(), body_len = body.len(), "dispatching");
        self.transport.call(call, body, reply);

        let outcome = tokio::select! {
            biased;
            _ = watch.fired() => {
                debug!(url = %request.url(), "aborted in flight");
                return Err(abort_error());
            }
            outcome = rx => outcome.unwrap_or_else(|_| Outcome::SystemFailed(DROPPED_REPLY.to_string())),
        };

        let result = translate(outcome, &request);
        if let Ok(response) = &result {
            watch.attach_response(response.body().clone());
            debug!(url = %request.url(), status = response.status(), "fetch resolved");
        }
        watch.release();
        result
    }

    fn request(&self, resource: Resource, mut init: RequestInit) -> Result<Request, Error> {
        if let Resource::Url(_) = resource {
            init.size = init.size.or(Some(self.config.size));
            init.high_water_mark = init.high_water_mark.or(Some(self.config.high_water_mark));
        }
        Request::new(resource, init)
    }
}
