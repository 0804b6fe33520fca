//! Cancellation signal shared between a caller and in-flight fetches.
//!
//! # Design
//! An [`AbortSignal`] is a cheap handle to shared state: an `aborted` flag and
//! a list of listeners. The caller owns the [`AbortController`]; fetches only
//! observe the signal and manage their own listener. Many fetches, and
//! unrelated caller code, may listen on one signal at the same time, so
//! removal is always by [`ListenerId`] and never touches other listeners.
//!
//! Listeners run on the thread that calls [`AbortController::abort`], after
//! the signal's lock is released. A listener may therefore remove itself (or
//! anything else) without deadlocking.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`AbortSignal::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct SignalState {
    aborted: bool,
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Read side of a cancellation source.
#[derive(Clone, Default)]
pub struct AbortSignal {
    state: Arc<Mutex<SignalState>>,
}

impl AbortSignal {
    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Register `listener` for the abort event.
    ///
    /// The event is dispatched once; registering on a signal that has already
    /// fired does not invoke the listener.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        trace!(listener = id.0, total = state.listeners.len(), "abort listener added");
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(candidate, _)| *candidate != id);
        let removed = state.listeners.len() != before;
        if removed {
            trace!(listener = id.0, total = state.listeners.len(), "abort listener removed");
        }
        removed
    }

    /// Like [`add_listener`](Self::add_listener), but the listener is removed
    /// when the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.add_listener(listener);
        Subscription {
            signal: self.clone(),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn fire(&self) {
        let listeners: Vec<Listener> = {
            let mut state = self.lock();
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        debug!(listeners = listeners.len(), "abort signal fired");
        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("AbortSignal")
            .field("aborted", &state.aborted)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// Write side of a cancellation source.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Mark the signal aborted and notify listeners. Later calls do nothing.
    pub fn abort(&self) {
        self.signal.fire();
    }
}

/// Scoped listener registration; unregisters on drop.
#[must_use = "dropping a Subscription removes its listener immediately"]
#[derive(Debug)]
pub struct Subscription {
    signal: AbortSignal,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.signal.remove_listener(self.id);
    }
}
