//! Request and response body resources.
//!
//! # Design
//! Both bodies are shared handles (`Arc<Mutex<..>>`) because two parties act
//! on them: the owner reads, and the fetch coordinator may cancel. Neither
//! type propagates cancellation on its own; the coordinator calls
//! [`RequestBody::cancel`] and [`ResponseBody::fail`] explicitly.
//!
//! A [`ResponseBody`] is always fully buffered (the transport hands back the
//! whole payload) and is streamed back out in chunks of the request's
//! high-water mark via zero-copy `Bytes::slice()`.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::{Error, ErrorKind, FetchError};

/// Default chunk size for streamed bodies (16 KiB).
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// A type-erased, fallible async stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the caller handed in, used for `Content-Type` inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Text,
    Bytes,
    Stream,
}

enum RequestState {
    Empty,
    Buffered(Bytes),
    Streaming(ByteStream),
    Reading,
    Cancelled(Error),
    /// The stream errored, or its reader went away before the end.
    Failed(Error),
}

/// Parks the body in `Failed` if a read is dropped while still `Reading`.
struct ReadGuard<'a> {
    state: &'a Mutex<RequestState>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if let RequestState::Reading = *state {
            *state = RequestState::Failed(Error::InvalidRequest(
                "request body stream was dropped before it was fully read".to_string(),
            ));
        }
    }
}

/// Outbound body: empty, buffered, or a live stream.
#[derive(Clone)]
pub struct RequestBody {
    kind: BodyKind,
    state: Arc<Mutex<RequestState>>,
}

impl RequestBody {
    fn with(kind: BodyKind, state: RequestState) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn empty() -> Self {
        Self::with(BodyKind::Empty, RequestState::Empty)
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, Error>> + Send + 'static,
    {
        Self::with(BodyKind::Stream, RequestState::Streaming(Box::pin(stream)))
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.kind == BodyKind::Empty
    }

    /// `true` while a stream body has not finished or been cancelled.
    pub fn is_live_stream(&self) -> bool {
        matches!(
            *lock(&self.state),
            RequestState::Streaming(_) | RequestState::Reading
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_cause().is_some()
    }

    /// The error passed to [`cancel`](Self::cancel), if any.
    pub fn cancel_cause(&self) -> Option<Error> {
        match &*lock(&self.state) {
            RequestState::Cancelled(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    /// The error that ended the stream, if it failed on its own.
    pub fn failure(&self) -> Option<Error> {
        match &*lock(&self.state) {
            RequestState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Destroy a live stream with `cause`. Buffered and empty bodies are left
    /// alone. Returns `false` when there was nothing to cancel, including a
    /// second call.
    pub fn cancel(&self, cause: Error) -> bool {
        let previous = {
            let mut state = lock(&self.state);
            match *state {
                RequestState::Streaming(_) | RequestState::Reading => {
                    std::mem::replace(&mut *state, RequestState::Cancelled(cause))
                }
                _ => return false,
            }
        };
        // The stream, if still parked here, is dropped outside the lock.
        drop(previous);
        true
    }

    /// Materialize the body. A stream is drained once; afterwards the
    /// collected bytes are returned on every call.
    pub async fn bytes(&self) -> Result<Bytes, Error> {
        let mut stream = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, RequestState::Reading) {
                RequestState::Streaming(stream) => stream,
                RequestState::Empty => {
                    *state = RequestState::Empty;
                    return Ok(Bytes::new());
                }
                RequestState::Buffered(bytes) => {
                    *state = RequestState::Buffered(bytes.clone());
                    return Ok(bytes);
                }
                RequestState::Reading => {
                    return Err(Error::InvalidRequest(
                        "request body is already being read".to_string(),
                    ));
                }
                RequestState::Cancelled(cause) => {
                    *state = RequestState::Cancelled(cause.clone());
                    return Err(cause);
                }
                RequestState::Failed(err) => {
                    *state = RequestState::Failed(err.clone());
                    return Err(err);
                }
            }
        };
        let _guard = ReadGuard { state: &self.state };

        let mut collected = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            if let Some(cause) = self.cancel_cause() {
                return Err(cause);
            }
            match chunk {
                Ok(chunk) => collected.extend_from_slice(&chunk),
                Err(err) => {
                    *lock(&self.state) = RequestState::Failed(err.clone());
                    return Err(err);
                }
            }
        }

        let bytes = collected.freeze();
        let mut state = lock(&self.state);
        if let RequestState::Cancelled(cause) = &*state {
            return Err(cause.clone());
        }
        *state = RequestState::Buffered(bytes.clone());
        Ok(bytes)
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("kind", &self.kind)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::with(BodyKind::Bytes, RequestState::Buffered(bytes))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::with(BodyKind::Text, RequestState::Buffered(Bytes::from(text)))
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        text.to_string().into()
    }
}

struct ResponseState {
    data: Bytes,
    offset: usize,
    chunk_size: usize,
    limit: u64,
    url: String,
    error: Option<Error>,
    finished: bool,
}

/// Inbound body. Implements `Stream`; clones share one read cursor, so the
/// coordinator's clone can [`fail`](Self::fail) a reader mid-stream. Use
/// [`Response::clone`](crate::Response) for an independent reader.
#[derive(Clone)]
pub struct ResponseBody {
    state: Arc<Mutex<ResponseState>>,
}

impl ResponseBody {
    /// `limit` of 0 means unlimited. A `chunk_size` of 0 yields the body in
    /// one chunk.
    pub fn new(data: Bytes, chunk_size: usize, limit: u64, url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ResponseState {
                data,
                offset: 0,
                chunk_size,
                limit,
                url: url.into(),
                error: None,
                finished: false,
            })),
        }
    }

    /// Independent reader over the same payload, positioned at the start.
    pub(crate) fn fork(&self) -> Self {
        let state = lock(&self.state);
        Self::new(state.data.clone(), state.chunk_size, state.limit, state.url.clone())
    }

    /// Emit `error` to the reader. The next poll yields it and the stream
    /// ends. Ignored once the stream has finished; a second error before it
    /// is observed replaces nothing.
    pub fn fail(&self, error: Error) -> bool {
        let mut state = lock(&self.state);
        if state.finished || state.error.is_some() {
            return false;
        }
        state.error = Some(error);
        true
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }

    /// Total buffered length, regardless of how much has been read.
    pub fn len(&self) -> usize {
        lock(&self.state).data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the remaining chunks into one buffer.
    pub async fn into_bytes(mut self) -> Result<Bytes, Error> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected.freeze())
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = lock(&self.state);
        if state.finished {
            return Poll::Ready(None);
        }
        if let Some(error) = state.error.take() {
            state.finished = true;
            return Poll::Ready(Some(Err(error)));
        }
        if state.offset >= state.data.len() {
            state.finished = true;
            return Poll::Ready(None);
        }

        let step = if state.chunk_size == 0 {
            state.data.len()
        } else {
            state.chunk_size
        };
        let end = std::cmp::min(state.offset + step, state.data.len());
        if state.limit > 0 && end as u64 > state.limit {
            state.finished = true;
            let message = format!("content size at {} over limit: {}", state.url, state.limit);
            return Poll::Ready(Some(Err(FetchError::new(message, ErrorKind::MaxSize).into())));
        }
        let chunk = state.data.slice(state.offset..end);
        state.offset = end;
        Poll::Ready(Some(Ok(chunk)))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ResponseBody")
            .field("len", &state.data.len())
            .field("offset", &state.offset)
            .field("finished", &state.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AbortError;

    fn chunks(body: &mut ResponseBody) -> Vec<Result<Bytes, Error>> {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut out = Vec::new();
        while let Poll::Ready(Some(item)) = Pin::new(&mut *body).poll_next(&mut cx) {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn buffered_body_is_reusable() {
        let body = RequestBody::from("hello");
        assert_eq!(body.kind(), BodyKind::Text);
        assert_eq!(body.bytes().await.unwrap().as_ref(), b"hello");
        assert_eq!(body.bytes().await.unwrap().as_ref(), b"hello");
        assert!(!body.is_live_stream());
    }

    #[tokio::test]
    async fn stream_body_is_collected() {
        let parts = vec![Ok(Bytes::from("ab")), Ok(Bytes::from("cd"))];
        let body = RequestBody::stream(futures_util::stream::iter(parts));
        assert!(body.is_live_stream());
        assert_eq!(body.bytes().await.unwrap().as_ref(), b"abcd");
        assert!(!body.is_live_stream());
        assert_eq!(body.bytes().await.unwrap().as_ref(), b"abcd");
    }

    #[tokio::test]
    async fn stream_error_is_returned() {
        let parts = vec![
            Ok(Bytes::from("ab")),
            Err(Error::InvalidRequest("broken pipe".to_string())),
        ];
        let body = RequestBody::stream(futures_util::stream::iter(parts));
        assert!(matches!(body.bytes().await, Err(Error::InvalidRequest(_))));

        // A failing stream is not a cancellation.
        assert!(!body.is_cancelled());
        assert!(!body.is_live_stream());
        assert!(matches!(body.failure(), Some(Error::InvalidRequest(_))));
        assert!(!body.cancel(AbortError::default().into()));
        assert!(matches!(body.bytes().await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn dropped_read_ends_the_stream() {
        let body = RequestBody::stream(futures_util::stream::pending::<Result<Bytes, Error>>());
        let read = tokio::time::timeout(std::time::Duration::from_millis(10), body.bytes()).await;
        assert!(read.is_err());

        assert!(!body.is_live_stream());
        assert!(!body.cancel(AbortError::default().into()));
        assert!(body.cancel_cause().is_none());
        match body.bytes().await {
            Err(Error::InvalidRequest(msg)) => assert!(msg.contains("dropped"), "{msg}"),
            other => panic!("expected dropped-stream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_during_read_is_kept() {
        let body = RequestBody::stream(futures_util::stream::pending::<Result<Bytes, Error>>());
        let reader = body.clone();
        let read = tokio::spawn(async move { reader.bytes().await });
        tokio::task::yield_now().await;

        assert!(body.cancel(AbortError::default().into()));
        read.abort();
        let _ = read.await;
        assert!(body.cancel_cause().unwrap().is_abort());
        assert!(body.failure().is_none());
    }

    #[tokio::test]
    async fn cancel_destroys_stream_once() {
        let body = RequestBody::stream(futures_util::stream::pending::<Result<Bytes, Error>>());
        let cause: Error = AbortError::default().into();
        assert!(body.cancel(cause.clone()));
        assert!(!body.cancel(cause));
        assert!(body.is_cancelled());
        assert!(body.bytes().await.unwrap_err().is_abort());
    }

    #[test]
    fn cancel_ignores_buffered_body() {
        let body = RequestBody::from(vec![1u8, 2, 3]);
        assert!(!body.cancel(AbortError::default().into()));
        assert!(!body.is_cancelled());
    }

    #[test]
    fn response_body_chunks_by_high_water_mark() {
        let mut body = ResponseBody::new(Bytes::from(vec![7u8; 10]), 4, 0, "http://x/");
        let out = chunks(&mut body);
        let sizes: Vec<usize> = out.into_iter().map(|c| c.unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(body.is_finished());
    }

    #[test]
    fn zero_chunk_size_yields_whole_body() {
        let mut body = ResponseBody::new(Bytes::from("whole"), 0, 0, "http://x/");
        let out = chunks(&mut body);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn fail_is_observed_by_reader() {
        let mut reader = ResponseBody::new(Bytes::from(vec![0u8; 8]), 4, 0, "http://x/");
        let handle = reader.clone();
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);

        assert!(matches!(
            Pin::new(&mut reader).poll_next(&mut cx),
            Poll::Ready(Some(Ok(_)))
        ));
        assert!(handle.fail(AbortError::default().into()));
        assert!(!handle.fail(AbortError::default().into()));
        match Pin::new(&mut reader).poll_next(&mut cx) {
            Poll::Ready(Some(Err(e))) => assert!(e.is_abort()),
            other => panic!("expected abort error, got {other:?}"),
        }
        assert!(matches!(
            Pin::new(&mut reader).poll_next(&mut cx),
            Poll::Ready(None)
        ));
        assert!(!handle.fail(AbortError::default().into()));
    }

    #[tokio::test]
    async fn size_limit_is_enforced() {
        let body = ResponseBody::new(Bytes::from(vec![1u8; 32]), 8, 20, "http://x/big");
        match body.into_bytes().await {
            Err(Error::Fetch(e)) => {
                assert_eq!(e.kind(), ErrorKind::MaxSize);
                assert!(e.message().contains("http://x/big"));
            }
            other => panic!("expected max-size error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_within_limit() {
        let body = ResponseBody::new(Bytes::from("exact"), 2, 5, "http://x/");
        assert_eq!(body.into_bytes().await.unwrap().as_ref(), b"exact");
    }
}
