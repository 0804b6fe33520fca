//! Transport outcome → `Response` or error.

use tracing::debug;

use crate::error::{Error, FetchError};
use crate::headers::Headers;
use crate::request::Request;
use crate::response::{Response, ResponseInit, PLACEHOLDER_STATUS_TEXT};
use crate::transport::{HttpResult, Outcome};

/// Map one transport outcome for `request` into the fetch result.
///
/// Size, counter and high-water mark are carried over from the request; the
/// status text is always [`PLACEHOLDER_STATUS_TEXT`].
pub(crate) fn translate(outcome: Outcome, request: &Request) -> Result<Response, Error> {
    match outcome {
        Outcome::SystemFailed(detail) => {
            debug!(url = %request.url(), %detail, "transport call failed");
            Err(FetchError::system(format!("transport call failed: {detail}"), detail).into())
        }
        Outcome::RequestFailed(reason) => {
            debug!(url = %request.url(), %reason, "request failed");
            Err(FetchError::system(
                format!("request to {} failed, reason: {reason}", request.url()),
                reason,
            )
            .into())
        }
        Outcome::Response(result) => Ok(into_response(result, request)),
    }
}

fn into_response(result: HttpResult, request: &Request) -> Response {
    let HttpResult {
        status,
        headers,
        body,
    } = result;
    Response::new(
        body.into_bytes(),
        ResponseInit {
            url: request.url().to_string(),
            status,
            status_text: PLACEHOLDER_STATUS_TEXT.to_string(),
            headers: Headers::from_wire(headers),
            size: request.size(),
            counter: request.counter(),
            high_water_mark: request.high_water_mark(),
        },
    )
}
