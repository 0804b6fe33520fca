//! C-ABI wrapper around `fetch-core`.
//!
//! # Overview
//! Lets a C host own the network. The host registers one callback when it
//! creates a client; every transport call arrives there as JSON plus raw body
//! bytes and a reply handle, and the host answers with the wire outcome JSON.
//! `fetch_blocking` runs a whole fetch on the client's private runtime and
//! returns a flat result struct.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Handles are opaque boxes. The C caller owns every returned pointer and
//!   must release it with the matching `fetch_*_free` function.
//! - A reply handle is consumed by `fetch_reply_complete` or
//!   `fetch_reply_free`, whichever comes first. Releasing it without an
//!   outcome fails the fetch with a system error.
//! - Aborting is thread-safe: `fetch_abort_controller_abort` may be called
//!   from any thread while `fetch_blocking` waits on another.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;
use fetch_core::{
    Client, ClientConfig, Error, Headers, Outcome, Reply, RequestBody, RequestInit, Transport,
    TransportCall,
};

use types::*;

// ---------------------------------------------------------------------------
// Host transport
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// SAFETY: the host guarantees `user_data` may be used from whichever thread
// runs `fetch_blocking`; this crate never dereferences it.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

/// Forwards every transport call to the host callback.
struct HostCallback {
    callback: FfiTransportCallback,
    user_data: UserData,
}

impl Transport for HostCallback {
    fn call(&self, call: TransportCall, body: Bytes, reply: Reply) {
        let json = serde_json::to_string(&call)
            .map_err(|e| e.to_string())
            .and_then(|json| CString::new(json).map_err(|e| e.to_string()));
        let json = match json {
            Ok(json) => json,
            Err(err) => {
                reply.send(Outcome::SystemFailed(format!("cannot encode transport call: {err}")));
                return;
            }
        };
        let reply = Box::into_raw(Box::new(FfiReply { inner: reply }));
        (self.callback)(self.user_data.0, json.as_ptr(), body.as_ptr(), body.len(), reply);
    }
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client whose transport is `callback`.
///
/// `config_json` may be null for defaults, otherwise a `ClientConfig` object
/// such as `{"user_agent": "host/1.0", "size": 1048576}`. Returns null if
/// `callback` is null or the config does not parse.
/// The caller must free the returned pointer with `fetch_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_client_new(
    callback: Option<FfiTransportCallback>,
    user_data: *mut c_void,
    config_json: *const c_char,
) -> *mut FfiFetchClient {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(callback) = callback else {
            return std::ptr::null_mut();
        };
        let config = if config_json.is_null() {
            ClientConfig::default()
        } else {
            let parsed = unsafe { CStr::from_ptr(config_json) }
                .to_str()
                .ok()
                .and_then(|s| serde_json::from_str::<ClientConfig>(s).ok());
            match parsed {
                Some(config) => config,
                None => return std::ptr::null_mut(),
            }
        };
        let runtime = match tokio::runtime::Builder::new_current_thread().build() {
            Ok(runtime) => runtime,
            Err(_) => return std::ptr::null_mut(),
        };
        let transport = HostCallback {
            callback,
            user_data: UserData(user_data),
        };
        Box::into_raw(Box::new(FfiFetchClient {
            inner: Client::with_config(transport, config),
            runtime,
        }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `fetch_client_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_client_free(client: *mut FfiFetchClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Complete a transport call with the wire outcome JSON and release `reply`.
///
/// Returns `Ok` when the fetch received the outcome, `Settled` when the fetch
/// had already finished (for example, it was aborted), and `InvalidArg` when
/// the JSON is malformed; the fetch then fails with a system error. A null
/// `outcome_json` releases the reply and returns `NullArg`.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_reply_complete(
    reply: *mut FfiReply,
    outcome_json: *const c_char,
) -> FfiErrorCode {
    if reply.is_null() {
        return FfiErrorCode::NullArg;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let reply = unsafe { Box::from_raw(reply) }.inner;
        if outcome_json.is_null() {
            drop(reply);
            return FfiErrorCode::NullArg;
        }
        let json = match unsafe { CStr::from_ptr(outcome_json) }.to_str() {
            Ok(json) => json,
            Err(_) => {
                reply.send(Outcome::SystemFailed("outcome is not valid UTF-8".to_string()));
                return FfiErrorCode::InvalidArg;
            }
        };
        match reply.send_json(json) {
            Ok(true) => FfiErrorCode::Ok,
            Ok(false) => FfiErrorCode::Settled,
            Err(_) => FfiErrorCode::InvalidArg,
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Release a reply without completing it. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_reply_free(reply: *mut FfiReply) {
    if !reply.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(reply) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Abort controllers
// ---------------------------------------------------------------------------

/// Create an abort controller. Free it with `fetch_abort_controller_free`.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_abort_controller_new() -> *mut FfiAbortController {
    catch_unwind(|| {
        Box::into_raw(Box::new(FfiAbortController {
            inner: fetch_core::AbortController::new(),
        }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Abort every fetch observing this controller. Repeated calls do nothing.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_abort_controller_abort(controller: *const FfiAbortController) {
    if !controller.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            unsafe { &*controller }.inner.abort();
        }));
    }
}

/// Free a controller. Safe to call with null. Fetches already holding its
/// signal are unaffected.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_abort_controller_free(controller: *mut FfiAbortController) {
    if !controller.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(controller) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// Run one fetch to completion, reading the whole response body.
///
/// `options_json` (nullable) holds method, headers, body, size and
/// high_water_mark. `controller` (nullable) supplies the abort signal.
/// The transport callback is invoked on the calling thread.
/// The caller must free the result with `fetch_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_blocking(
    client: *const FfiFetchClient,
    url: *const c_char,
    options_json: *const c_char,
    controller: *const FfiAbortController,
) -> *mut FfiFetchResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiFetchResult::null_arg("client");
        }
        if url.is_null() {
            return FfiFetchResult::null_arg("url");
        }
        let client = unsafe { &*client };
        let url = match unsafe { CStr::from_ptr(url) }.to_str() {
            Ok(url) => url.to_string(),
            Err(_) => return FfiFetchResult::invalid_arg("url is not valid UTF-8"),
        };
        let options = if options_json.is_null() {
            FetchOptions::default()
        } else {
            let parsed = unsafe { CStr::from_ptr(options_json) }
                .to_str()
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<FetchOptions>(s).map_err(|e| e.to_string()));
            match parsed {
                Ok(options) => options,
                Err(err) => return FfiFetchResult::invalid_arg(&format!("invalid options: {err}")),
            }
        };
        let signal = if controller.is_null() {
            None
        } else {
            Some(unsafe { &*controller }.inner.signal())
        };

        let result = client.runtime.block_on(async {
            let init = RequestInit {
                method: options.method,
                headers: Some(Headers::try_from_pairs(options.headers)?),
                body: options.body.map(RequestBody::from),
                signal,
                size: options.size,
                high_water_mark: options.high_water_mark,
                ..RequestInit::default()
            };
            let response = client.inner.fetch(url, init).await?;
            let parts = ResponseParts {
                status: response.status(),
                status_text: response.status_text().to_string(),
                url: response.url().to_string(),
                headers: response.headers().clone(),
            };
            let body = response.bytes().await?;
            Ok::<_, Error>((parts, body))
        });

        match result {
            Ok((parts, body)) => FfiFetchResult::ok(parts, body),
            Err(err) => FfiFetchResult::from_error(&err),
        }
    }))
    .unwrap_or_else(|_| FfiFetchResult::panic("panic in fetch_blocking"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a result returned by `fetch_blocking`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn fetch_free_result(result: *mut FfiFetchResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        unsafe { free_result(result) };
    }));
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// State shared with the test callbacks through `user_data`.
    #[derive(Default)]
    struct Host {
        calls: AtomicUsize,
        reply_codes: Mutex<Vec<FfiErrorCode>>,
        parked: Mutex<Vec<usize>>,
    }

    impl Host {
        fn user_data(&self) -> *mut c_void {
            self as *const Host as *mut c_void
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn host<'a>(user_data: *mut c_void) -> &'a Host {
        unsafe { &*(user_data as *const Host) }
    }

    fn complete(host: &Host, reply: *mut FfiReply, outcome: &str) {
        let json = CString::new(outcome).unwrap();
        let code = fetch_reply_complete(reply, json.as_ptr());
        host.reply_codes.lock().unwrap().push(code);
    }

    /// Replies with a JSON echo of the call and its body.
    extern "C" fn echo(
        user_data: *mut c_void,
        call_json: *const c_char,
        body: *const u8,
        body_len: usize,
        reply: *mut FfiReply,
    ) {
        let host = host(user_data);
        host.calls.fetch_add(1, Ordering::SeqCst);
        let call: serde_json::Value =
            serde_json::from_str(unsafe { CStr::from_ptr(call_json) }.to_str().unwrap_or("null"))
                .unwrap_or_default();
        let body = unsafe { std::slice::from_raw_parts(body, body_len) };
        let echoed = serde_json::json!({
            "call": call,
            "body": String::from_utf8_lossy(body),
        });
        let outcome = serde_json::json!({
            "SystemOk": {"RequestOk": {
                "status": 200,
                "headers": [["content-type", "application/json"], ["x-echo", "1"]],
                "body": {"Text": echoed.to_string()}
            }}
        });
        complete(host, reply, &outcome.to_string());
    }

    extern "C" fn network_down(
        user_data: *mut c_void,
        _call_json: *const c_char,
        _body: *const u8,
        _body_len: usize,
        reply: *mut FfiReply,
    ) {
        let host = host(user_data);
        host.calls.fetch_add(1, Ordering::SeqCst);
        complete(host, reply, r#"{"SystemErr":"network down"}"#);
    }

    extern "C" fn malformed(
        user_data: *mut c_void,
        _call_json: *const c_char,
        _body: *const u8,
        _body_len: usize,
        reply: *mut FfiReply,
    ) {
        let host = host(user_data);
        host.calls.fetch_add(1, Ordering::SeqCst);
        complete(host, reply, "{not json");
    }

    extern "C" fn discard(
        user_data: *mut c_void,
        _call_json: *const c_char,
        _body: *const u8,
        _body_len: usize,
        reply: *mut FfiReply,
    ) {
        host(user_data).calls.fetch_add(1, Ordering::SeqCst);
        fetch_reply_free(reply);
    }

    /// Keeps the reply for the test to complete later.
    extern "C" fn park(
        user_data: *mut c_void,
        _call_json: *const c_char,
        _body: *const u8,
        _body_len: usize,
        reply: *mut FfiReply,
    ) {
        let host = host(user_data);
        host.calls.fetch_add(1, Ordering::SeqCst);
        host.parked.lock().unwrap().push(reply as usize);
    }

    fn new_client(callback: FfiTransportCallback, host: &Host) -> *mut FfiFetchClient {
        let client = fetch_client_new(Some(callback), host.user_data(), std::ptr::null());
        assert!(!client.is_null());
        client
    }

    fn fetch(
        client: *const FfiFetchClient,
        url: &str,
        options: Option<&str>,
        controller: *const FfiAbortController,
    ) -> *mut FfiFetchResult {
        let url = CString::new(url).unwrap();
        let options = options.map(|o| CString::new(o).unwrap());
        let options_ptr = options.as_ref().map_or(std::ptr::null(), |o| o.as_ptr());
        fetch_blocking(client, url.as_ptr(), options_ptr, controller)
    }

    fn message(result: &FfiFetchResult) -> String {
        unsafe { CStr::from_ptr(result.error_message) }
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn client_new_and_free() {
        let host = Host::default();
        let client = new_client(echo, &host);
        fetch_client_free(client);
    }

    #[test]
    fn client_new_without_callback_returns_null() {
        let client = fetch_client_new(None, std::ptr::null_mut(), std::ptr::null());
        assert!(client.is_null());
    }

    #[test]
    fn client_new_bad_config_returns_null() {
        let config = CString::new(r#"{"size":"big"}"#).unwrap();
        let client = fetch_client_new(Some(echo), std::ptr::null_mut(), config.as_ptr());
        assert!(client.is_null());
    }

    #[test]
    fn fetch_through_host_callback() {
        let host = Host::default();
        let config = CString::new(r#"{"user_agent":"ffi-test/1"}"#).unwrap();
        let client = fetch_client_new(Some(echo), host.user_data(), config.as_ptr());
        let options = r#"{"method":"POST","headers":[["X-Trace","a"],["x-trace","b"]],"body":"ping"}"#;
        let result = fetch(client, "http://example.com/submit", Some(options), std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Ok);
        assert!(r.error_message.is_null());
        assert_eq!(r.status, 200);
        assert_eq!(unsafe { CStr::from_ptr(r.status_text) }.to_str().unwrap(), "");
        assert_eq!(
            unsafe { CStr::from_ptr(r.url) }.to_str().unwrap(),
            "http://example.com/submit"
        );
        assert_eq!(r.headers_len, 2);
        let headers = unsafe { std::slice::from_raw_parts(r.headers, r.headers_len) };
        assert_eq!(unsafe { CStr::from_ptr(headers[1].name) }.to_str().unwrap(), "x-echo");

        let body = unsafe { std::slice::from_raw_parts(r.body, r.body_len) };
        let echoed: serde_json::Value = serde_json::from_slice(body).unwrap();
        let call = &echoed["call"]["HttpRequest"];
        assert_eq!(call["method"], "POST");
        assert_eq!(call["url"], "http://example.com/submit");
        assert_eq!(call["headers"]["x-trace"], serde_json::json!(["a", "b"]));
        assert_eq!(call["headers"]["user-agent"], serde_json::json!(["ffi-test/1"]));
        assert_eq!(echoed["body"], "ping");

        assert_eq!(host.calls(), 1);
        assert_eq!(*host.reply_codes.lock().unwrap(), vec![FfiErrorCode::Ok]);
        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn system_error_from_host() {
        let host = Host::default();
        let client = new_client(network_down, &host);
        let result = fetch(client, "https://example.com/", None, std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::System);
        assert!(message(r).contains("network down"));
        assert!(r.body.is_null());
        assert_eq!(r.headers_len, 0);

        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn unknown_option_is_invalid_arg() {
        let host = Host::default();
        let client = new_client(echo, &host);
        let result = fetch(client, "http://example.com/", Some(r#"{"follow":3}"#), std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::InvalidArg);
        assert!(message(r).contains("follow"));
        assert_eq!(host.calls(), 0);

        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn malformed_outcome_fails_the_fetch() {
        let host = Host::default();
        let client = new_client(malformed, &host);
        let result = fetch(client, "http://example.com/", None, std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::System);
        assert_eq!(*host.reply_codes.lock().unwrap(), vec![FfiErrorCode::InvalidArg]);

        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn discarded_reply_fails_the_fetch() {
        let host = Host::default();
        let client = new_client(discard, &host);
        let result = fetch(client, "http://example.com/", None, std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::System);
        assert!(message(r).contains(fetch_core::client::DROPPED_REPLY));

        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn data_url_skips_the_host() {
        let host = Host::default();
        let client = new_client(echo, &host);
        let result = fetch(client, "data:text/plain,hi", None, std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Ok);
        let body = unsafe { std::slice::from_raw_parts(r.body, r.body_len) };
        assert_eq!(body, b"hi");
        assert_eq!(host.calls(), 0);

        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn unsupported_scheme_is_type_error() {
        let host = Host::default();
        let client = new_client(echo, &host);
        let result = fetch(client, "ftp://example.com/", None, std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::TypeError);
        assert!(message(r).contains("ftp"));
        assert_eq!(host.calls(), 0);

        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn pre_aborted_controller_skips_the_host() {
        let host = Host::default();
        let client = new_client(echo, &host);
        let controller = fetch_abort_controller_new();
        fetch_abort_controller_abort(controller);
        fetch_abort_controller_abort(controller);

        let result = fetch(client, "http://example.com/", None, controller);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Aborted);
        assert_eq!(message(r), "The operation was aborted.");
        assert_eq!(host.calls(), 0);

        fetch_free_result(result);
        fetch_abort_controller_free(controller);
        fetch_client_free(client);
    }

    #[test]
    fn abort_from_another_thread_then_late_reply() {
        let host = Host::default();
        let client = new_client(park, &host);
        let controller = fetch_abort_controller_new();

        let host_addr = &host as *const Host as usize;
        let controller_addr = controller as usize;
        let aborter = std::thread::spawn(move || {
            let host = unsafe { &*(host_addr as *const Host) };
            while host.parked.lock().unwrap().is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
            fetch_abort_controller_abort(controller_addr as *const FfiAbortController);
        });

        let result = fetch(client, "http://example.com/slow", None, controller);
        aborter.join().unwrap();
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Aborted);

        let reply = host.parked.lock().unwrap().pop().unwrap() as *mut FfiReply;
        let late = CString::new(r#"{"SystemErr":"too late"}"#).unwrap();
        assert_eq!(fetch_reply_complete(reply, late.as_ptr()), FfiErrorCode::Settled);

        fetch_free_result(result);
        fetch_abort_controller_free(controller);
        fetch_client_free(client);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let host = Host::default();
        let client = new_client(echo, &host);
        let result = fetch(client, "http://example.com/", Some("[1,2"), std::ptr::null());

        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::InvalidArg);
        assert!(message(r).starts_with("invalid options"));
        assert_eq!(host.calls(), 0);

        fetch_free_result(result);
        fetch_client_free(client);
    }

    #[test]
    fn null_arguments() {
        let result = fetch_blocking(
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
        );
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::NullArg);
        assert_eq!(message(r), "null argument: client");
        fetch_free_result(result);

        assert_eq!(
            fetch_reply_complete(std::ptr::null_mut(), std::ptr::null()),
            FfiErrorCode::NullArg
        );
    }

    #[test]
    fn free_functions_accept_null() {
        fetch_client_free(std::ptr::null_mut());
        fetch_reply_free(std::ptr::null_mut());
        fetch_abort_controller_abort(std::ptr::null());
        fetch_abort_controller_free(std::ptr::null_mut());
        fetch_free_result(std::ptr::null_mut());
    }
}
