//! Request value object.
//!
//! # Design
//! A `Request` is immutable once built. It is constructed from a URL or from
//! another `Request` plus a [`RequestInit`] whose `Some` fields override the
//! base, mirroring `new Request(input, init)`. The URL is parsed here, so
//! everything downstream works with an absolute [`Url`].

use bytes::Bytes;
use url::Url;

use crate::body::{BodyKind, RequestBody, DEFAULT_HIGH_WATER_MARK};
use crate::error::Error;
use crate::headers::Headers;
use crate::signal::AbortSignal;

const STANDARD_METHODS: [&str; 6] = ["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];

/// What `fetch` was called with.
#[derive(Debug, Clone)]
pub enum Resource {
    Url(String),
    Request(Request),
}

impl From<&str> for Resource {
    fn from(url: &str) -> Self {
        Resource::Url(url.to_string())
    }
}

impl From<String> for Resource {
    fn from(url: String) -> Self {
        Resource::Url(url)
    }
}

impl From<&Url> for Resource {
    fn from(url: &Url) -> Self {
        Resource::Url(url.to_string())
    }
}

impl From<Url> for Resource {
    fn from(url: Url) -> Self {
        Resource::Url(url.into())
    }
}

impl From<Request> for Resource {
    fn from(request: Request) -> Self {
        Resource::Request(request)
    }
}

/// Per-call options. `None` keeps the value from the base request or the
/// default.
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
    pub method: Option<String>,
    pub headers: Option<Headers>,
    pub body: Option<RequestBody>,
    pub signal: Option<AbortSignal>,
    /// Maximum response body size in bytes; 0 disables the limit.
    pub size: Option<u64>,
    pub counter: Option<u32>,
    pub high_water_mark: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    method: String,
    headers: Headers,
    body: RequestBody,
    signal: Option<AbortSignal>,
    size: u64,
    counter: u32,
    high_water_mark: usize,
}

impl Request {
    pub fn new(resource: impl Into<Resource>, init: RequestInit) -> Result<Request, Error> {
        let base = match resource.into() {
            Resource::Request(request) => request,
            Resource::Url(input) => {
                let url = Url::parse(&input).map_err(|e| Error::InvalidUrl {
                    input: input.clone(),
                    reason: e.to_string(),
                })?;
                Request {
                    url,
                    method: "GET".to_string(),
                    headers: Headers::new(),
                    body: RequestBody::empty(),
                    signal: None,
                    size: 0,
                    counter: 0,
                    high_water_mark: DEFAULT_HIGH_WATER_MARK,
                }
            }
        };

        let method = match init.method {
            Some(method) => normalize_method(&method)?,
            None => base.method,
        };
        let body = init.body.unwrap_or(base.body);
        if !body.is_empty() && (method == "GET" || method == "HEAD") {
            return Err(Error::InvalidRequest(
                "Request with GET/HEAD method cannot have body".to_string(),
            ));
        }

        let mut headers = init.headers.unwrap_or(base.headers);
        if body.kind() == BodyKind::Text && !headers.has("content-type") {
            headers.set("Content-Type", "text/plain;charset=UTF-8")?;
        }

        Ok(Request {
            url: base.url,
            method,
            headers,
            body,
            signal: init.signal.or(base.signal),
            size: init.size.unwrap_or(base.size),
            counter: init.counter.unwrap_or(base.counter),
            high_water_mark: init.high_water_mark.unwrap_or(base.high_water_mark),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn signal(&self) -> Option<&AbortSignal> {
        self.signal.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Materialize the body into raw bytes.
    pub async fn bytes(&self) -> Result<Bytes, Error> {
        self.body.bytes().await
    }

    pub async fn text(&self) -> Result<String, Error> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn normalize_method(method: &str) -> Result<String, Error> {
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(Error::InvalidRequest(format!("invalid method {method:?}")));
    }
    Ok(STANDARD_METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .map_or_else(|| method.to_string(), |m| m.to_string()))
}
