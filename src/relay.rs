//! Streaming Relay
//!
//! One relay per inbound request. The relay resolves the prompt, opens a
//! generator subscription, and forwards fragments to the client as a live
//! event stream. The response body implements [`futures::Stream`], so
//! fragments are handed over only when hyper polls for more, which happens
//! only when the transport can accept more bytes. Combined with the bounded
//! subscription channel, that is the backpressure path: a slow client stalls
//! the generator instead of growing a buffer.
//!
//! The first subscription event decides the status line. A failure before
//! any output becomes a plain 500 with no event-stream headers; a failure
//! after streaming has begun can only be reported by dropping the
//! connection, since the status line is long gone.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures::Stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::{header, Method, Request, Response, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::generator::{StreamEvent, TextGenerator};

/// Response body type produced by the relay
pub type RelayBody = BoxBody<Bytes, io::Error>;

/// Shared state handed to every relay instance
pub struct RelayState<G> {
    generator: Arc<G>,
    config: Arc<RelayConfig>,
    active_relays: Arc<AtomicUsize>,
}

impl<G> RelayState<G> {
    /// Create relay state shared across all requests
    pub fn new(
        generator: Arc<G>,
        config: Arc<RelayConfig>,
        active_relays: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            generator,
            config,
            active_relays,
        }
    }
}

impl<G> Clone for RelayState<G> {
    fn clone(&self) -> Self {
        Self {
            generator: Arc::clone(&self.generator),
            config: Arc::clone(&self.config),
            active_relays: Arc::clone(&self.active_relays),
        }
    }
}

/// Handle one request
///
/// Never returns an error; every failure is mapped to a client-visible
/// outcome here so nothing unwinds into the connection task.
pub async fn handle<G: TextGenerator, B>(
    req: Request<B>,
    state: RelayState<G>,
) -> Result<Response<RelayBody>, Infallible> {
    if req.method() != Method::GET || req.uri().path() != "/" {
        return Ok(status_response(StatusCode::NOT_FOUND));
    }

    let prompt = effective_prompt(req.uri().query(), &state.config.default_prompt);
    let guard = ActiveRelayGuard::new(Arc::clone(&state.active_relays));
    debug!(prompt_len = prompt.len(), "relay started");

    let mut rx = match state.generator.subscribe(&prompt).await {
        Ok(rx) => rx,
        Err(e) => {
            error!(error = %e, "upstream subscription failed");
            return Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    // The first event decides the status line; response metadata is final
    // once the stream starts.
    let first = rx.recv().await;
    if let Some(StreamEvent::Failed(reason)) = first {
        error!(error = %reason, "upstream failed before any output");
        return Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR));
    }

    let body = FragmentBody::new(first, rx, guard);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONNECTION, "keep-alive")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(BodyExt::boxed(StreamBody::new(body)))
        .expect("static response parts are valid");
    Ok(response)
}

/// Resolve the effective prompt from the query string
///
/// Absent and empty both fall back to the default; an empty prompt is not
/// an error.
fn effective_prompt(query: Option<&str>, default: &str) -> String {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "prompt")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn status_response(status: StatusCode) -> Response<RelayBody> {
    Response::builder()
        .status(status)
        .body(empty_body())
        .expect("static response parts are valid")
}

fn empty_body() -> RelayBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Keeps the server's active-relay count honest. Increments on creation,
/// decrements on drop, so completion and cancellation are counted the same
/// way.
struct ActiveRelayGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveRelayGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveRelayGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Streaming response body for one relay
///
/// Owns the generator subscription. Dropping the body (client disconnect,
/// forced shutdown) drops the receiver, which is the cancellation signal
/// the generator contract requires.
struct FragmentBody {
    /// First event, already received while deciding the status line
    pending: Option<StreamEvent>,
    /// Subscription; cleared once a terminal event is seen
    rx: Option<mpsc::Receiver<StreamEvent>>,
    /// Bytes handed to the transport so far; monotonically non-decreasing
    bytes_sent: u64,
    started: Instant,
    finished: bool,
    _guard: ActiveRelayGuard,
}

impl FragmentBody {
    fn new(
        pending: Option<StreamEvent>,
        rx: mpsc::Receiver<StreamEvent>,
        guard: ActiveRelayGuard,
    ) -> Self {
        Self {
            pending,
            rx: Some(rx),
            bytes_sent: 0,
            started: Instant::now(),
            finished: false,
            _guard: guard,
        }
    }

    fn terminate(&mut self) {
        self.finished = true;
        self.rx = None;
    }
}

impl Stream for FragmentBody {
    type Item = Result<Frame<Bytes>, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let event = if let Some(event) = this.pending.take() {
                Some(event)
            } else {
                let Some(rx) = this.rx.as_mut() else {
                    return Poll::Ready(None);
                };
                match rx.poll_recv(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(event) => event,
                }
            };

            match event {
                Some(StreamEvent::Fragment(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    this.bytes_sent += text.len() as u64;
                    debug!(bytes = text.len(), "fragment relayed");
                    return Poll::Ready(Some(Ok(Frame::data(Bytes::from(text)))));
                }
                Some(StreamEvent::Failed(reason)) => {
                    this.terminate();
                    error!(
                        error = %reason,
                        bytes_sent = this.bytes_sent,
                        "upstream failed mid-stream, dropping connection"
                    );
                    return Poll::Ready(Some(Err(io::Error::other(reason))));
                }
                // A closed channel without a done marker still ends the
                // stream cleanly.
                Some(StreamEvent::Done) | None => {
                    this.terminate();
                    info!(
                        bytes_sent = this.bytes_sent,
                        elapsed_ms = this.started.elapsed().as_millis() as u64,
                        "relay complete"
                    );
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl Drop for FragmentBody {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                bytes_sent = self.bytes_sent,
                "client disconnected, relay cancelled"
            );
        }
    }
}
