//! Response value object.
//!
//! The transport does not report a reason phrase, so every response built by
//! the coordinator carries [`PLACEHOLDER_STATUS_TEXT`] instead of one derived
//! from the status code.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::body::{ResponseBody, DEFAULT_HIGH_WATER_MARK};
use crate::error::{Error, ErrorKind, FetchError};
use crate::headers::Headers;

/// Status text used when the transport supplies none.
pub const PLACEHOLDER_STATUS_TEXT: &str = "";

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// `true` for the statuses a client follows as redirects.
pub fn is_redirect(status: u16) -> bool {
    REDIRECT_STATUSES.contains(&status)
}

/// Options for [`Response::new`].
#[derive(Debug, Clone)]
pub struct ResponseInit {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub size: u64,
    pub counter: u32,
    pub high_water_mark: usize,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self {
            url: String::new(),
            status: 200,
            status_text: PLACEHOLDER_STATUS_TEXT.to_string(),
            headers: Headers::new(),
            size: 0,
            counter: 0,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// A fetched response. Cloning gives the copy its own read position over the
/// same buffered payload.
#[derive(Debug)]
pub struct Response {
    url: String,
    status: u16,
    status_text: String,
    headers: Headers,
    size: u64,
    counter: u32,
    high_water_mark: usize,
    body: ResponseBody,
}

impl Clone for Response {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            size: self.size,
            counter: self.counter,
            high_water_mark: self.high_water_mark,
            body: self.body.fork(),
        }
    }
}

impl Response {
    pub fn new(body: impl Into<Bytes>, init: ResponseInit) -> Self {
        let body = ResponseBody::new(body.into(), init.high_water_mark, init.size, init.url.clone());
        Self {
            url: init.url,
            status: init.status,
            status_text: init.status_text,
            headers: init.headers,
            size: init.size,
            counter: init.counter,
            high_water_mark: init.high_water_mark,
            body,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// `true` for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `true` when the response was reached through at least one redirect.
    pub fn redirected(&self) -> bool {
        self.counter > 0
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
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

    /// Shared handle to the body stream.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn into_body_stream(self) -> ResponseBody {
        self.body
    }

    pub async fn bytes(self) -> Result<Bytes, Error> {
        self.body.into_bytes().await
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub async fn text(self) -> Result<String, Error> {
        let bytes = self.body.into_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let url = self.url.clone();
        let bytes = self.body.into_bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            FetchError::new(
                format!("invalid json response body at {url} reason: {e}"),
                ErrorKind::InvalidJson,
            )
            .into()
        })
    }
}
