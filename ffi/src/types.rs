//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Handles (`FfiFetchClient`, `FfiReply`, `FfiAbortController`) are opaque to
//! C and only travel as pointers. Results are plain data: `*mut c_char` for
//! strings, pointer + length for arrays, and explicit discriminants for enums.
//! Conversion helpers live here to keep `lib.rs` focused on the `extern "C"`
//! surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use bytes::Bytes;
use fetch_core::{Error, Headers};
use serde::Deserialize;

/// Host callback performing one transport call.
///
/// `call_json` is the serialized `TransportCall` and is only valid for the
/// duration of the callback, as is `body`. `reply` must be completed with
/// `fetch_reply_complete` or released with `fetch_reply_free`, either inside
/// the callback or later from any thread.
pub type FfiTransportCallback = extern "C" fn(
    user_data: *mut c_void,
    call_json: *const c_char,
    body: *const u8,
    body_len: usize,
    reply: *mut FfiReply,
);

/// Opaque handle to a `Client` plus the runtime `fetch_blocking` drives it on.
pub struct FfiFetchClient {
    pub(crate) inner: fetch_core::Client,
    pub(crate) runtime: tokio::runtime::Runtime,
}

/// Opaque single-use completion handle for one transport call.
pub struct FfiReply {
    pub(crate) inner: fetch_core::Reply,
}

/// Opaque handle to an `AbortController`.
pub struct FfiAbortController {
    pub(crate) inner: fetch_core::AbortController,
}

/// Per-call options accepted by `fetch_blocking` as JSON.
///
/// ```json
/// {"method": "POST", "headers": [["content-type", "application/json"]], "body": "{}"}
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FetchOptions {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub size: Option<u64>,
    pub high_water_mark: Option<usize>,
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Error codes returned by the FFI surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NullArg = 1,
    InvalidArg = 2,
    /// Rejected before dispatch: bad URL, scheme, header, or data URI.
    TypeError = 3,
    Aborted = 4,
    System = 5,
    MaxSize = 6,
    InvalidJson = 7,
    /// A reply arrived after its fetch had already settled.
    Settled = 8,
    Panic = 9,
}

impl From<&Error> for FfiErrorCode {
    fn from(err: &Error) -> Self {
        match err.tag() {
            "aborted" => FfiErrorCode::Aborted,
            "system" => FfiErrorCode::System,
            "max-size" => FfiErrorCode::MaxSize,
            "invalid-json" => FfiErrorCode::InvalidJson,
            _ => FfiErrorCode::TypeError,
        }
    }
}

/// A single header as a pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub name: *mut c_char,
    pub value: *mut c_char,
}

/// Outcome of `fetch_blocking`.
///
/// On success `error_code` is `Ok`, `error_message` is null, and the response
/// fields are populated. On failure only `error_code` and `error_message` are
/// set; every pointer field is null and every length is zero.
#[repr(C)]
pub struct FfiFetchResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub status: u16,
    pub status_text: *mut c_char,
    pub url: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: usize,
    pub body: *mut u8,
    pub body_len: usize,
}

/// Response fields captured before the body is read.
pub(crate) struct ResponseParts {
    pub status: u16,
    pub status_text: String,
    pub url: String,
    pub headers: Headers,
}

impl FfiFetchResult {
    fn empty(error_code: FfiErrorCode, error_message: *mut c_char) -> *mut Self {
        Box::into_raw(Box::new(FfiFetchResult {
            error_code,
            error_message,
            status: 0,
            status_text: std::ptr::null_mut(),
            url: std::ptr::null_mut(),
            headers: std::ptr::null_mut(),
            headers_len: 0,
            body: std::ptr::null_mut(),
            body_len: 0,
        }))
    }

    pub(crate) fn ok(parts: ResponseParts, body: Bytes) -> *mut Self {
        let headers: Box<[FfiHeader]> = parts
            .headers
            .iter()
            .map(|(name, value)| FfiHeader {
                name: c_string(name),
                value: c_string(value),
            })
            .collect();
        let headers_len = headers.len();
        let headers = if headers.is_empty() {
            std::ptr::null_mut()
        } else {
            Box::into_raw(headers) as *mut FfiHeader
        };

        let body_len = body.len();
        let body = if body.is_empty() {
            std::ptr::null_mut()
        } else {
            let owned: Box<[u8]> = body.to_vec().into_boxed_slice();
            Box::into_raw(owned) as *mut u8
        };

        Box::into_raw(Box::new(FfiFetchResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            status: parts.status,
            status_text: c_string(&parts.status_text),
            url: c_string(&parts.url),
            headers,
            headers_len,
            body,
            body_len,
        }))
    }

    pub(crate) fn from_error(err: &Error) -> *mut Self {
        Self::empty(err.into(), c_string(&err.to_string()))
    }

    pub(crate) fn invalid_arg(msg: &str) -> *mut Self {
        Self::empty(FfiErrorCode::InvalidArg, c_string(msg))
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::empty(FfiErrorCode::NullArg, c_string(&format!("null argument: {name}")))
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::empty(FfiErrorCode::Panic, c_string(msg))
    }
}

/// Heap C string owned by the caller. Interior NULs are dropped.
pub(crate) fn c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', ""))
        .unwrap_or_default()
        .into_raw()
}

/// Release the fields of a result, then the result itself.
///
/// # Safety
/// `result` must come from an `FfiFetchResult` constructor above and must not
/// have been freed.
pub(crate) unsafe fn free_result(result: *mut FfiFetchResult) {
    let result = unsafe { Box::from_raw(result) };
    for s in [result.error_message, result.status_text, result.url] {
        if !s.is_null() {
            drop(unsafe { CString::from_raw(s) });
        }
    }
    if !result.headers.is_null() && result.headers_len > 0 {
        let headers = unsafe {
            Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                result.headers,
                result.headers_len,
            ))
        };
        for h in headers.iter() {
            if !h.name.is_null() {
                drop(unsafe { CString::from_raw(h.name) });
            }
            if !h.value.is_null() {
                drop(unsafe { CString::from_raw(h.value) });
            }
        }
    }
    if !result.body.is_null() && result.body_len > 0 {
        drop(unsafe {
            Box::from_raw(std::ptr::slice_from_raw_parts_mut(result.body, result.body_len))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetch_core::{AbortError, FetchError};

    #[test]
    fn error_codes_follow_tags() {
        let abort: Error = AbortError::default().into();
        assert_eq!(FfiErrorCode::from(&abort), FfiErrorCode::Aborted);
        let system: Error = FetchError::system("down", "down").into();
        assert_eq!(FfiErrorCode::from(&system), FfiErrorCode::System);
        let scheme = Error::UnsupportedScheme {
            url: "ftp://x/".to_string(),
            scheme: "ftp".to_string(),
        };
        assert_eq!(FfiErrorCode::from(&scheme), FfiErrorCode::TypeError);
    }

    #[test]
    fn options_default_when_fields_missing() {
        let options: FetchOptions = serde_json::from_str(r#"{"method":"PUT"}"#).unwrap();
        assert_eq!(options.method.as_deref(), Some("PUT"));
        assert!(options.headers.is_empty());
        assert!(options.body.is_none());
    }

    #[test]
    fn unknown_options_are_rejected() {
        let err = serde_json::from_str::<FetchOptions>(r#"{"follow":3}"#).unwrap_err();
        assert!(err.to_string().contains("follow"), "{err}");
    }

    #[test]
    fn ok_result_reports_every_header() {
        let pairs: Vec<(String, String)> = (0..300)
            .map(|i| (format!("x-h{i}"), i.to_string()))
            .collect();
        let parts = ResponseParts {
            status: 200,
            status_text: String::new(),
            url: "http://example.com/".to_string(),
            headers: Headers::try_from_pairs(pairs).unwrap(),
        };
        let result = FfiFetchResult::ok(parts, Bytes::from_static(b"x"));
        let r = unsafe { &*result };
        assert_eq!(r.headers_len, 300);
        assert_eq!(r.body_len, 1);
        unsafe { free_result(result) };
    }

    #[test]
    fn c_string_drops_interior_nul() {
        let s = c_string("a\0b");
        let back = unsafe { CString::from_raw(s) };
        assert_eq!(back.to_str().unwrap(), "ab");
    }
}
