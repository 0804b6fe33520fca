//! `data:` URL decoding and the transport-free response path.
//!
//! Follows RFC 2397: `data:[<mediatype>][;base64],<data>`. An empty media
//! type means `text/plain;charset=US-ASCII`. Non-base64 payloads are
//! percent-decoded byte by byte; invalid escapes are kept literally.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;
use url::Url;

use crate::error::Error;
use crate::headers::Headers;
use crate::request::Request;
use crate::response::{Response, ResponseInit};

/// Media type used when the URL omits one.
pub const DEFAULT_MIME_TYPE: &str = "text/plain;charset=US-ASCII";

const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: Bytes,
}

impl DataUri {
    pub fn parse(url: &Url) -> Result<DataUri, Error> {
        if url.scheme() != "data" {
            return Err(Error::InvalidDataUri(format!(
                "expected a data: URL, got scheme {:?}",
                url.scheme()
            )));
        }
        // Everything after "data:" up to the fragment.
        let rest = &url.as_str()["data:".len()..];
        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);

        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidDataUri("missing ',' separator".to_string()))?;

        let meta = meta.trim();
        let (meta, is_base64) = match meta.rsplit_once(';') {
            Some((head, tail)) if tail.trim().eq_ignore_ascii_case("base64") => (head.trim(), true),
            _ => (meta, false),
        };

        let mime_type = if meta.is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else if meta.starts_with(';') {
            format!("text/plain{meta}")
        } else {
            meta.to_string()
        };

        let decoded = percent_decode(payload.as_bytes());
        let data = if is_base64 {
            let compact: Vec<u8> = decoded
                .into_iter()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            BASE64
                .decode(compact)
                .map_err(|e| Error::InvalidDataUri(format!("bad base64 payload: {e}")))?
        } else {
            decoded
        };

        Ok(DataUri {
            mime_type,
            data: Bytes::from(data),
        })
    }
}

/// Build the response for a `data:` request without touching the transport.
pub(crate) fn respond(request: &Request) -> Result<Response, Error> {
    let uri = DataUri::parse(request.url())?;
    let mut headers = Headers::new();
    headers.append("Content-Type", &uri.mime_type)?;
    Ok(Response::new(
        uri.data,
        ResponseInit {
            url: request.url().to_string(),
            headers,
            size: request.size(),
            counter: request.counter(),
            high_water_mark: request.high_water_mark(),
            ..ResponseInit::default()
        },
    ))
}

fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) = (hex_val(input[i + 1]), hex_val(input[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
