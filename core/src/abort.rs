//! Per-call abort coordination.
//!
//! # Design
//! Three things can end a fetch: the signal was already aborted, it fires
//! while the call is in flight, or the call completes. [`AbortWatch`] folds
//! the first two into one once-only handler and owns the single listener
//! registration, which is released on every exit path: when the handler
//! fires, when the coordinator calls [`AbortWatch::release`], and on drop
//! (the caller dropped the fetch future).
//!
//! The handler runs on whatever thread called `abort()`. It never settles the
//! fetch itself; it notifies the coordinator through a oneshot channel and
//! cancels the bodies it knows about.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::body::{RequestBody, ResponseBody};
use crate::error::{AbortError, Error};
use crate::request::Request;
use crate::signal::Subscription;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn abort_error() -> Error {
    AbortError::default().into()
}

/// Fail fast when the request's signal has already fired. The outbound body
/// is destroyed with the abort error; no listener is registered.
pub(crate) fn check_not_aborted(request: &Request) -> Result<(), Error> {
    match request.signal() {
        Some(signal) if signal.aborted() => {
            let err = abort_error();
            request.body().cancel(err.clone());
            debug!(url = %request.url(), "signal already aborted; transport not invoked");
            Err(err)
        }
        _ => Ok(()),
    }
}

struct Shared {
    fired: AtomicBool,
    body: RequestBody,
    response: Mutex<Option<ResponseBody>>,
    notify: Mutex<Option<oneshot::Sender<()>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl Shared {
    fn fire(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let err = abort_error();
        if let Some(notify) = lock(&self.notify).take() {
            let _ = notify.send(());
        }
        if self.body.cancel(err.clone()) {
            trace!("outbound body stream destroyed");
        }
        if let Some(response) = lock(&self.response).as_ref() {
            response.fail(err);
        }
        // Unsubscribing from inside a listener is safe: the signal invokes
        // listeners outside its lock.
        drop(lock(&self.subscription).take());
    }
}

pub(crate) struct AbortWatch {
    shared: Arc<Shared>,
    aborted: Option<oneshot::Receiver<()>>,
}

impl AbortWatch {
    /// Register the one abort listener for this call, if the request has a
    /// signal.
    pub(crate) fn register(request: &Request) -> AbortWatch {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            fired: AtomicBool::new(false),
            body: request.body().clone(),
            response: Mutex::new(None),
            notify: Mutex::new(Some(tx)),
            subscription: Mutex::new(None),
        });

        let Some(signal) = request.signal() else {
            return AbortWatch {
                shared,
                aborted: None,
            };
        };

        let handler = Arc::clone(&shared);
        let subscription = signal.subscribe(move || handler.fire());
        *lock(&shared.subscription) = Some(subscription);

        // The signal may have fired between the entry check and subscribing.
        if signal.aborted() {
            shared.fire();
        }

        AbortWatch {
            shared,
            aborted: Some(rx),
        }
    }

    /// Resolves when the abort handler fires. Never resolves without a
    /// signal, or once the watch has been released.
    pub(crate) async fn fired(&mut self) {
        match self.aborted.as_mut() {
            Some(rx) => {
                if rx.await.is_err() {
                    std::future::pending::<()>().await
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Let a late abort reach the response body while it is still being
    /// handed over.
    pub(crate) fn attach_response(&self, body: ResponseBody) {
        *lock(&self.shared.response) = Some(body);
    }

    /// Remove the listener. Safe to call more than once.
    pub(crate) fn release(&self) {
        drop(lock(&self.shared.subscription).take());
    }

    #[cfg(test)]
    fn fire(&self) {
        self.shared.fire();
    }
}

impl Drop for AbortWatch {
    fn drop(&mut self) {
        self.release();
    }
}
