//! WHATWG-style `fetch` over a host-owned transport.
//!
//! # Overview
//! The crate coordinates the lifecycle of a fetch without doing any network
//! I/O itself (host-does-IO pattern). A [`Client`] builds a transport call
//! envelope, hands it to a [`Transport`] implemented by the host, and turns
//! the host's layered reply into a [`Response`] or a typed [`Error`].
//!
//! # Design
//! - The host is reached through one boundary: [`Transport::call`] plus a
//!   single-use [`Reply`]. Anything that can answer a `Reply` can be a host:
//!   a Tokio task ([`transport::from_fn`]), a queue ([`ChannelTransport`]), or
//!   a C callback (the `fetch-ffi` crate).
//! - Cancellation comes from an [`AbortSignal`] the caller owns. Each call
//!   subscribes at most once and always unsubscribes before it settles.
//! - `data:` URLs are answered locally and never reach the transport.
//! - Redirects, compression, TLS and status text belong to the host.

mod abort;
pub mod body;
pub mod client;
pub mod data_uri;
pub mod error;
pub mod headers;
pub mod request;
pub mod response;
pub mod scheme;
pub mod signal;
mod translate;
pub mod transport;

pub use body::{BodyKind, RequestBody, ResponseBody};
pub use client::{Client, ClientConfig};
pub use data_uri::DataUri;
pub use error::{AbortError, Error, ErrorKind, FetchError};
pub use headers::{collect_headers, HeaderValues, Headers};
pub use request::{Request, RequestInit, Resource};
pub use response::{is_redirect, Response, ResponseInit, PLACEHOLDER_STATUS_TEXT};
pub use scheme::Scheme;
pub use signal::{AbortController, AbortSignal, ListenerId, Subscription};
pub use transport::{
    ChannelTransport, HttpBody, HttpResult, Outcome, PendingCall, Reply, Transport,
    TransportCall, TransportRequest,
};
